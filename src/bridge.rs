//! Runtime lifecycle, the per-frame command batch and the execution loop.
//!
//! Nothing here knows about Rhai. The script binding in `scripts` owns a `Rc<RefCell<Bridge>>`
//! and calls into it from registered functions; [`run_frames`] drives the loop and hands control
//! back to the binding once per frame to invoke the tick callback.

use std::cell::RefCell;
use std::fmt;
use std::mem;

use tracing::{debug, info, warn};

use crate::assets::{AssetDefinition, AssetHandle, AssetKind, AssetLoader, AssetRef, AssetRegistry, LoadedAsset};
use crate::commands::DrawCommand;
use crate::config::TickErrorPolicy;
use crate::error::{EngineError, EngineResult};
use crate::frame::{CanvasSize, FrameChannel, FrameContext, PixelRegion};
use crate::pixels::{PixelBuffer, PixelCache};
use crate::renderer::text::{FontBook, DEFAULT_FONT_FAMILY, DEFAULT_FONT_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Initializing,
    Running,
    Stopped,
    Error,
    Disposed,
}

impl WorkerState {
    pub fn label(self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Initializing => "initializing",
            WorkerState::Running => "running",
            WorkerState::Stopped => "stopped",
            WorkerState::Error => "error",
            WorkerState::Disposed => "disposed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Error | WorkerState::Disposed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a tick callback did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickError {
    /// The callback raised. Subject to the tick error policy.
    Script(String),
    /// The host terminated the script. Always ends the loop.
    Aborted(String),
}

impl fmt::Display for TickError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickError::Script(message) => f.write_str(message),
            TickError::Aborted(message) => write!(f, "aborted: {message}"),
        }
    }
}

/// How a call to [`run_frames`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// `stop()` was called.
    Stopped,
    /// The render side went away.
    HostClosed,
    /// Too many consecutive tick failures under `stop_after`.
    ErrorLimit { failures: u32 },
    /// The host aborted the script mid-tick.
    Aborted(String),
}

/// Script-side mirror of the renderer's font state, saved and restored with it.
#[derive(Debug, Clone, PartialEq)]
struct TextStyle {
    size: f64,
    family: String,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self { size: DEFAULT_FONT_SIZE, family: DEFAULT_FONT_FAMILY.to_string() }
    }
}

pub struct Bridge {
    state: WorkerState,
    channel: Box<dyn FrameChannel>,
    batch: Vec<DrawCommand>,
    loader: AssetLoader,
    registry: AssetRegistry,
    pixels: PixelCache,
    policy: TickErrorPolicy,
    frames_run: u64,
    text: TextStyle,
    text_stack: Vec<TextStyle>,
    fonts: FontBook,
    size_override: Option<CanvasSize>,
}

impl Bridge {
    pub fn new(channel: Box<dyn FrameChannel>, loader: AssetLoader, policy: TickErrorPolicy) -> Self {
        Self {
            state: WorkerState::Idle,
            channel,
            batch: Vec::new(),
            loader,
            registry: AssetRegistry::new(),
            pixels: PixelCache::new(),
            policy,
            frames_run: 0,
            text: TextStyle::default(),
            text_stack: Vec::new(),
            fonts: FontBook::new(),
            size_override: None,
        }
    }

    /// Swaps the font lookup used for text metrics.
    pub fn with_fonts(mut self, fonts: FontBook) -> Self {
        self.fonts = fonts;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Running
    }

    pub fn frames_run(&self) -> u64 {
        self.frames_run
    }

    pub fn policy(&self) -> TickErrorPolicy {
        self.policy
    }

    pub fn begin_initialize(&mut self) -> EngineResult<()> {
        if self.state != WorkerState::Idle {
            return Err(EngineError::InvalidState { state: self.state });
        }
        self.state = WorkerState::Initializing;
        Ok(())
    }

    pub fn finish_initialize(&mut self, succeeded: bool) {
        if self.state == WorkerState::Initializing {
            self.state = if succeeded { WorkerState::Idle } else { WorkerState::Error };
        }
    }

    /// Moves to `Running` and flushes whatever was queued before the loop began.
    pub fn begin_start(&mut self, has_callback: bool) -> EngineResult<()> {
        if self.state == WorkerState::Running {
            return Err(EngineError::AlreadyRunning);
        }
        if !has_callback {
            return Err(EngineError::NoCallback);
        }
        if self.state != WorkerState::Idle {
            return Err(EngineError::InvalidState { state: self.state });
        }
        self.state = WorkerState::Running;
        info!("[loop] started");
        self.flush_batch()
    }

    /// Only a running loop can be stopped; anywhere else this does nothing.
    pub fn stop(&mut self) {
        if self.state == WorkerState::Running {
            self.state = WorkerState::Stopped;
            info!(frames = self.frames_run, "[loop] stop requested");
        }
    }

    pub fn dispose(&mut self) {
        if self.state == WorkerState::Disposed {
            return;
        }
        self.state = WorkerState::Disposed;
        self.batch.clear();
        self.pixels.clear();
        self.channel.close();
        debug!("[loop] disposed");
    }

    pub(crate) fn mark_error(&mut self) {
        if self.state != WorkerState::Disposed {
            self.state = WorkerState::Error;
        }
    }

    pub fn push(&mut self, command: DrawCommand) {
        match &command {
            DrawCommand::SetFontSize { size } => {
                if size.is_finite() && *size > 0.0 {
                    self.text.size = *size;
                }
            }
            DrawCommand::SetFontFamily { family } => self.text.family = family.clone(),
            DrawCommand::Save => self.text_stack.push(self.text.clone()),
            DrawCommand::Restore => {
                if let Some(text) = self.text_stack.pop() {
                    self.text = text;
                }
            }
            DrawCommand::SetSize { width, height } => {
                self.size_override = Some(CanvasSize { width: *width, height: *height });
                self.text = TextStyle::default();
                self.text_stack.clear();
            }
            _ => {}
        }
        self.batch.push(command);
    }

    pub fn pending_commands(&self) -> &[DrawCommand] {
        &self.batch
    }

    fn flush_batch(&mut self) -> EngineResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = mem::take(&mut self.batch);
        self.channel.send_draw_commands(batch)
    }

    pub fn frame_context(&self) -> &FrameContext {
        self.channel.frame_context()
    }

    /// Canvas size as the script sees it, including a resize queued this frame.
    pub fn canvas_size(&self) -> CanvasSize {
        self.size_override.unwrap_or_else(|| self.channel.canvas_size())
    }

    pub fn font_size(&self) -> f64 {
        self.text.size
    }

    pub fn font_family(&self) -> &str {
        &self.text.family
    }

    /// Width of `text` as the renderer would draw it, at `size` or the current font size.
    pub fn measure_text(&mut self, text: &str, size: Option<f64>) -> f64 {
        let size = size.filter(|s| s.is_finite() && *s > 0.0).unwrap_or(self.text.size);
        self.fonts.measure(text, size, &self.text.family)
    }

    fn learn_font(&mut self, asset: &LoadedAsset) {
        if asset.kind == AssetKind::Font {
            self.fonts.register(&asset.name, asset.data.clone());
        }
    }

    fn ensure_can_register(&self) -> EngineResult<()> {
        match self.state {
            WorkerState::Idle | WorkerState::Initializing => Ok(()),
            _ => Err(EngineError::AlreadyStarted),
        }
    }

    pub fn register_asset(&mut self, definition: &AssetDefinition) -> EngineResult<AssetHandle> {
        self.ensure_can_register()?;
        let asset = self.loader.load_asset(definition)?;
        let handle = self.registry.register(&asset);
        self.learn_font(&asset);
        self.channel.upload_assets(vec![asset])?;
        Ok(handle)
    }

    /// Registers every image and font under `dir`, named by relative path.
    pub fn add_path(&mut self, dir: &str) -> EngineResult<Vec<AssetHandle>> {
        self.ensure_can_register()?;
        let discovered = self.loader.scan_directory(dir)?;
        let mut handles = Vec::with_capacity(discovered.len());
        let mut loaded = Vec::with_capacity(discovered.len());
        for file in discovered {
            let definition = AssetDefinition::new(file.relative_path, file.path, file.kind);
            let asset = self.loader.load_asset(&definition)?;
            handles.push(self.registry.register(&asset));
            self.learn_font(&asset);
            loaded.push(asset);
        }
        info!("[assets] registered {} file(s) from '{dir}'", handles.len());
        if !loaded.is_empty() {
            self.channel.upload_assets(loaded)?;
        }
        Ok(handles)
    }

    pub fn resolve_asset(&self, reference: &AssetRef) -> EngineResult<&AssetHandle> {
        self.registry.resolve(reference)
    }

    pub fn asset_dimensions(&self, reference: &AssetRef) -> EngineResult<(Option<u32>, Option<u32>)> {
        self.registry.dimensions(reference)
    }

    pub fn registry(&self) -> &AssetRegistry {
        &self.registry
    }

    pub fn loader(&self) -> &AssetLoader {
        &self.loader
    }

    pub fn get_image_data(&mut self, region: PixelRegion) -> EngineResult<Option<PixelBuffer>> {
        self.pixels.get_image_data(region, self.channel.as_mut())
    }

    fn report_tick_error(&mut self, message: &str) -> EngineResult<()> {
        warn!("[tick] {message}");
        self.channel.report_error(format!("[tick] {message}"))
    }
}

/// Runs frames until the loop leaves `Running`.
///
/// The tick closure runs with no borrow of the bridge held, so script functions it calls may
/// borrow it freely (including a reentrant `start()`, which fails with `AlreadyRunning`).
pub fn run_frames<F>(bridge: &RefCell<Bridge>, mut tick: F) -> EngineResult<LoopExit>
where
    F: FnMut() -> Result<(), TickError>,
{
    let mut consecutive_failures = 0u32;
    loop {
        {
            let mut guard = bridge.borrow_mut();
            let b = &mut *guard;
            if b.state != WorkerState::Running {
                return Ok(LoopExit::Stopped);
            }
            b.batch.clear();
            match b.channel.wait_for_frame() {
                Ok(()) => {}
                Err(err) if err.is_disconnect() => {
                    info!(frames = b.frames_run, "[loop] render side closed");
                    b.state = WorkerState::Stopped;
                    return Ok(LoopExit::HostClosed);
                }
                Err(err) => {
                    b.state = WorkerState::Error;
                    return Err(err);
                }
            }
            b.size_override = None;
            b.frames_run += 1;
        }

        let outcome = tick();

        let mut b = bridge.borrow_mut();
        let mut exit = None;
        match outcome {
            Ok(()) => consecutive_failures = 0,
            Err(TickError::Aborted(message)) => {
                warn!("[tick] script aborted by host: {message}");
                b.mark_error();
                return Ok(LoopExit::Aborted(message));
            }
            Err(TickError::Script(message)) => {
                consecutive_failures += 1;
                if let Err(err) = b.report_tick_error(&message) {
                    if err.is_disconnect() {
                        b.state = WorkerState::Stopped;
                        return Ok(LoopExit::HostClosed);
                    }
                    return Err(err);
                }
                if let TickErrorPolicy::StopAfter { consecutive_failures: limit } = b.policy {
                    if consecutive_failures >= limit.max(1) {
                        warn!("[loop] stopping after {consecutive_failures} consecutive tick failure(s)");
                        b.mark_error();
                        exit = Some(LoopExit::ErrorLimit { failures: consecutive_failures });
                    }
                }
            }
        }

        match b.flush_batch() {
            Ok(()) => {}
            Err(err) if err.is_disconnect() => {
                if b.state == WorkerState::Running {
                    b.state = WorkerState::Stopped;
                }
                return Ok(exit.unwrap_or(LoopExit::HostClosed));
            }
            Err(err) => {
                b.mark_error();
                return Err(err);
            }
        }
        if let Some(exit) = exit {
            return Ok(exit);
        }
    }
}
