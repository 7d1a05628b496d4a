//! Headless fixture runner: a script, a frame count, a fixed time step and scheduled input in;
//! per-frame command summaries, errors and surface samples out.

use std::fs::{self, File};
use std::path::Path;
use std::thread;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::assets::AssetLoader;
use crate::audio::AudioBridge;
use crate::channel::local::local_pair;
use crate::config::{AssetValidation, ScriptConfig};
use crate::frame::{CanvasSize, PixelRegion};
use crate::host::{FrameRecord, HostExit, RenderHost};
use crate::input::InputEvent;
use crate::renderer::Renderer;
use crate::scripts::ScriptRuntime;
use crate::time::FrameClock;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    pub script: String,
    #[serde(default = "default_frames")]
    pub frames: u64,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default)]
    pub inputs: Vec<ScheduledInput>,
    /// Surface pixels to report after the run.
    #[serde(default)]
    pub samples: Vec<[i64; 2]>,
    #[serde(default)]
    pub runtime: ScriptConfig,
    #[serde(default)]
    pub validation: AssetValidation,
}

impl HarnessFixture {
    /// A plain run of `script` with default size, frame count and time step.
    pub fn for_script<P: AsRef<Path>>(script: P) -> Self {
        Self {
            script: script.as_ref().to_string_lossy().into_owned(),
            frames: default_frames(),
            width: default_width(),
            height: default_height(),
            dt: default_dt(),
            inputs: Vec::new(),
            samples: Vec::new(),
            runtime: ScriptConfig::default(),
            validation: AssetValidation::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledInput {
    pub frame: u64,
    #[serde(flatten)]
    pub event: InputEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub frames: u64,
    pub frames_run: u64,
    pub exit: String,
    pub final_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_error: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub records: Vec<FrameRecord>,
    #[serde(default)]
    pub audio_triggers: Vec<String>,
    pub surface: SurfaceSummary,
}

impl HarnessOutput {
    /// Script failure first, then every tick or host error in frame order.
    pub fn failures(&self) -> Vec<String> {
        let script = self.script_error.iter().map(|err| format!("script error: {err}"));
        script.chain(self.errors.iter().cloned()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurfaceSummary {
    pub width: u32,
    pub height: u32,
    pub painted_pixels: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<PixelSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PixelSample {
    pub x: i64,
    pub y: i64,
    pub rgba: [u8; 4],
}

struct ScriptSide {
    frames_run: u64,
    final_state: String,
    error: Option<String>,
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let file = File::open(path.as_ref()).with_context(|| format!("opening fixture '{}'", path.as_ref().display()))?;
    serde_json::from_reader(file).with_context(|| "parsing fixture JSON")
}

/// Runs the fixture's script file. Relative asset paths resolve against the script's directory.
pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    let path = Path::new(&fixture.script);
    let source = fs::read_to_string(path).with_context(|| format!("reading script '{}'", path.display()))?;
    run_source(fixture, &source, AssetLoader::for_script(path, fixture.validation))
}

pub fn run_source(fixture: &HarnessFixture, source: &str, loader: AssetLoader) -> Result<HarnessOutput> {
    let canvas = CanvasSize { width: fixture.width, height: fixture.height };
    let (channel, link) = local_pair(canvas);
    let mut host = RenderHost::new(
        link,
        Renderer::new(fixture.width, fixture.height),
        AudioBridge::disabled(),
        FrameClock::fixed(fixture.dt),
    )
    .with_max_frames(Some(fixture.frames))
    .with_recording();
    for input in &fixture.inputs {
        host.schedule_input(input.frame, input.event.clone());
    }

    let source = source.to_string();
    let runtime_config = fixture.runtime.clone();
    let script = thread::Builder::new()
        .name("harness-script".to_string())
        .spawn(move || {
            let mut runtime = ScriptRuntime::new(Box::new(channel), loader, &runtime_config);
            let error = runtime.run_source(&source).err().map(|err| format!("{err:#}"));
            let side = ScriptSide {
                frames_run: runtime.frames_run(),
                final_state: runtime.state().to_string(),
                error,
            };
            runtime.dispose();
            side
        })
        .context("spawning harness script thread")?;

    let report = host.run();
    let side = script.join().map_err(|_| anyhow!("harness script thread panicked"))?;
    let report = report.context("running render host")?;

    let renderer = &report.renderer;
    let size = renderer.size();
    let painted_pixels = renderer.canvas().painted_pixels();
    let samples = fixture
        .samples
        .iter()
        .map(|&[x, y]| {
            let bytes = renderer.read_pixels(PixelRegion::new(x, y, 1, 1));
            let mut rgba = [0u8; 4];
            rgba.copy_from_slice(&bytes[..4]);
            PixelSample { x, y, rgba }
        })
        .collect();

    Ok(HarnessOutput {
        frames: report.frames,
        frames_run: side.frames_run,
        exit: match report.exit {
            HostExit::ScriptClosed => "script_closed".to_string(),
            HostExit::FrameLimit => "frame_limit".to_string(),
        },
        final_state: side.final_state,
        script_error: side.error,
        errors: report.errors,
        records: report.records,
        audio_triggers: report.audio_triggers,
        surface: SurfaceSummary { width: size.width, height: size.height, painted_pixels, samples },
    })
}

fn default_frames() -> u64 {
    10
}

fn default_width() -> u32 {
    64
}

fn default_height() -> u32 {
    64
}

fn default_dt() -> f64 {
    1.0 / 60.0
}
