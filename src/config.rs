use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfaceConfig {
    #[serde(default = "SurfaceConfig::default_width")]
    pub width: u32,
    #[serde(default = "SurfaceConfig::default_height")]
    pub height: u32,
    #[serde(default = "SurfaceConfig::default_target_fps")]
    pub target_fps: u32,
}

/// What the execution loop does when the tick callback raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TickErrorPolicy {
    /// Report and keep scheduling frames.
    #[default]
    Continue,
    /// Report, and end the loop in the error state after this many failing ticks in a row.
    StopAfter { consecutive_failures: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Rhai operations a single tick callback may run before it is aborted. Zero disables the cap.
    #[serde(default = "ScriptConfig::default_max_operations_per_tick")]
    pub max_operations_per_tick: u64,
    #[serde(default = "ScriptConfig::default_max_call_levels")]
    pub max_call_levels: usize,
    #[serde(default)]
    pub tick_error_policy: TickErrorPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssetValidation {
    #[default]
    Lenient,
    Strict,
}

impl AssetValidation {
    pub fn label(self) -> &'static str {
        match self {
            AssetValidation::Lenient => "lenient",
            AssetValidation::Strict => "strict",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssetConfig {
    #[serde(default)]
    pub validation: AssetValidation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "AudioConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "AudioConfig::default_master_volume")]
    pub master_volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub script: ScriptConfig,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfigOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub target_fps: Option<u32>,
}

impl SurfaceConfig {
    const fn default_width() -> u32 {
        800
    }

    const fn default_height() -> u32 {
        600
    }

    const fn default_target_fps() -> u32 {
        60
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: Self::default_width(),
            height: Self::default_height(),
            target_fps: Self::default_target_fps(),
        }
    }
}

impl ScriptConfig {
    const fn default_max_operations_per_tick() -> u64 {
        5_000_000
    }

    const fn default_max_call_levels() -> usize {
        64
    }
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            max_operations_per_tick: Self::default_max_operations_per_tick(),
            max_call_levels: Self::default_max_call_levels(),
            tick_error_policy: TickErrorPolicy::default(),
        }
    }
}

impl AudioConfig {
    const fn default_enabled() -> bool {
        true
    }

    fn default_master_volume() -> f32 {
        1.0
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { enabled: Self::default_enabled(), master_volume: Self::default_master_volume() }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &EngineConfigOverrides) {
        if let Some(width) = overrides.width {
            self.surface.width = width;
        }
        if let Some(height) = overrides.height {
            self.surface.height = height;
        }
        if let Some(fps) = overrides.target_fps {
            self.surface.target_fps = fps;
        }
    }
}

impl EngineConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.target_fps.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.width.is_some() {
            fields.push("width");
        }
        if self.height.is_some() {
            fields.push("height");
        }
        if self.target_fps.is_some() {
            fields.push("target_fps");
        }
        fields
    }
}
