//! Rhai binding for one script runtime.
//!
//! Each [`ScriptRuntime`] builds its own `Engine` and registers its functions as closures over its
//! own bridge, so state never leaks between runtimes. The engine is not `Send`; create the runtime
//! on the thread that will run the script.

mod api;

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use rhai::{Dynamic, Engine, EvalAltResult, NativeCallContext, Scope};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::assets::AssetLoader;
use crate::bridge::{run_frames, Bridge, LoopExit, TickError, WorkerState};
use crate::config::ScriptConfig;
use crate::frame::FrameChannel;

use api::{engine_error, SharedBridge, TickSlot};

const ABORT_TOKEN: &str = "abort";
const BUDGET_TOKEN: &str = "budget";

/// Lets another thread terminate a running script. Takes effect at the script's next operation.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Operation accounting for the tick callback. `on_progress` reports a running total for the
/// whole evaluation, so each tick measures from the total it started at.
#[derive(Debug, Default)]
struct TickBudget {
    limit: u64,
    seen: Cell<u64>,
    baseline: Cell<u64>,
    in_tick: Cell<bool>,
    tripped: Cell<bool>,
}

impl TickBudget {
    fn new(limit: u64) -> Self {
        Self { limit, ..Self::default() }
    }

    fn begin_tick(&self) {
        self.baseline.set(self.seen.get());
        self.tripped.set(false);
        self.in_tick.set(true);
    }

    /// Returns whether the tick ran out of budget.
    fn end_tick(&self) -> bool {
        self.in_tick.set(false);
        self.tripped.get()
    }

    fn observe(&self, operations: u64) -> bool {
        self.seen.set(operations);
        if self.limit == 0 || !self.in_tick.get() {
            return false;
        }
        let exceeded = operations.saturating_sub(self.baseline.get()) > self.limit;
        if exceeded {
            self.tripped.set(true);
        }
        exceeded
    }
}

pub struct ScriptRuntime {
    id: Uuid,
    engine: Option<Engine>,
    scope: Scope<'static>,
    bridge: SharedBridge,
    tick: TickSlot,
    abort: AbortHandle,
    budget: Rc<TickBudget>,
    config: ScriptConfig,
}

impl ScriptRuntime {
    pub fn new(channel: Box<dyn FrameChannel>, loader: AssetLoader, config: &ScriptConfig) -> Self {
        let bridge = Bridge::new(channel, loader, config.tick_error_policy);
        Self {
            id: Uuid::new_v4(),
            engine: None,
            scope: Scope::new(),
            bridge: Rc::new(RefCell::new(bridge)),
            tick: Rc::new(RefCell::new(None)),
            abort: AbortHandle::default(),
            budget: Rc::new(TickBudget::new(config.max_operations_per_tick)),
            config: config.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.bridge.borrow().state()
    }

    pub fn frames_run(&self) -> u64 {
        self.bridge.borrow().frames_run()
    }

    pub fn has_tick_callback(&self) -> bool {
        self.tick.borrow().is_some()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Builds the engine and registers the script API. `Idle -> Initializing -> Idle`, or `Error`
    /// when the engine cannot be configured.
    pub fn initialize(&mut self) -> Result<()> {
        self.bridge.borrow_mut().begin_initialize().map_err(|err| anyhow!(err))?;
        match self.build_engine() {
            Ok(engine) => {
                self.engine = Some(engine);
                self.bridge.borrow_mut().finish_initialize(true);
                debug!(runtime = %self.id, "[script] runtime initialized");
                Ok(())
            }
            Err(err) => {
                self.bridge.borrow_mut().finish_initialize(false);
                Err(err.context("Initializing script runtime"))
            }
        }
    }

    fn build_engine(&self) -> Result<Engine> {
        if self.config.max_call_levels == 0 {
            bail!("script.max_call_levels must be at least 1");
        }
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        engine.set_max_call_levels(self.config.max_call_levels);

        let budget = Rc::clone(&self.budget);
        let abort = self.abort.clone();
        engine.on_progress(move |operations| {
            if abort.is_aborted() {
                return Some(Dynamic::from(ABORT_TOKEN.to_string()));
            }
            budget.observe(operations).then(|| Dynamic::from(BUDGET_TOKEN.to_string()))
        });
        engine.on_print(|text| info!(target: "script", "{text}"));
        engine.on_debug(|text, source, pos| {
            debug!(target: "script", "{} @ {pos:?}: {text}", source.unwrap_or("script"));
        });

        api::register_lifecycle(&mut engine, &self.bridge, &self.tick);
        self.register_start(&mut engine);
        api::register_surface(&mut engine, &self.bridge);
        api::register_paint(&mut engine, &self.bridge);
        api::register_shapes(&mut engine, &self.bridge);
        api::register_text(&mut engine, &self.bridge);
        api::register_transforms(&mut engine, &self.bridge);
        api::register_timing_and_input(&mut engine, &self.bridge);
        api::register_pixels(&mut engine, &self.bridge);
        api::register_assets(&mut engine, &self.bridge);
        api::register_audio(&mut engine, &self.bridge);
        Ok(engine)
    }

    /// `start()` blocks inside the native call and re-enters the script once per frame through
    /// the stored function pointer.
    fn register_start(&self, engine: &mut Engine) {
        let bridge = Rc::clone(&self.bridge);
        let tick = Rc::clone(&self.tick);
        let budget = Rc::clone(&self.budget);
        let abort = self.abort.clone();
        engine.register_fn("start", move |context: NativeCallContext| -> Result<(), Box<EvalAltResult>> {
            let has_callback = tick.borrow().is_some();
            bridge.borrow_mut().begin_start(has_callback).map_err(engine_error)?;

            let exit = run_frames(&bridge, || {
                let Some(callback) = tick.borrow().clone() else {
                    return Ok(());
                };
                budget.begin_tick();
                let result = callback.call_within_context::<Dynamic>(&context, ());
                let exhausted = budget.end_tick();
                match result {
                    Ok(_) => Ok(()),
                    Err(_) if abort.is_aborted() => Err(TickError::Aborted("terminated by host".to_string())),
                    Err(_) if exhausted => {
                        Err(TickError::Script(format!("operation budget of {} exceeded", budget.limit)))
                    }
                    Err(err) => Err(TickError::Script(err.to_string())),
                }
            })
            .map_err(engine_error)?;

            match exit {
                LoopExit::Aborted(message) => Err(format!("script {message}").into()),
                LoopExit::ErrorLimit { failures } => {
                    warn!("[script] loop ended after {failures} failing tick(s)");
                    Ok(())
                }
                LoopExit::Stopped | LoopExit::HostClosed => Ok(()),
            }
        });
    }

    /// Runs top-level script code. Returns once the script finishes, which for a game means after
    /// its `start()` loop has ended.
    pub fn run_source(&mut self, source: &str) -> Result<()> {
        if self.engine.is_none() && self.state() == WorkerState::Idle {
            self.initialize()?;
        }
        let Some(engine) = self.engine.as_ref() else {
            bail!("script runtime is {} and has no engine", self.state());
        };
        let span = info_span!("script", runtime = %self.id);
        let _entered = span.enter();

        let ast = engine.compile(source).with_context(|| "Compiling Rhai script")?;
        let result = engine.run_ast_with_scope(&mut self.scope, &ast);
        if let Err(err) = result {
            if self.abort.is_aborted() {
                self.bridge.borrow_mut().mark_error();
                bail!("Script terminated by host");
            }
            bail!("Script error: {err}");
        }
        info!(frames = self.frames_run(), state = %self.state(), "[script] finished");
        Ok(())
    }

    pub fn run_file(&mut self, path: &Path) -> Result<()> {
        let source = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        self.run_source(&source).with_context(|| format!("Running {}", path.display()))
    }

    /// Reads a top-level variable left behind by the last run.
    pub fn value<T: std::any::Any + Clone>(&self, name: &str) -> Option<T> {
        self.scope.get_value::<T>(name)
    }

    /// Releases the engine and tells the render side this runtime is gone. Idempotent.
    pub fn dispose(&mut self) {
        self.engine = None;
        self.tick.borrow_mut().take();
        self.bridge.borrow_mut().dispose();
    }
}

impl Drop for ScriptRuntime {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::local::{local_pair, LocalRenderEnd};
    use crate::config::{AssetValidation, TickErrorPolicy};
    use crate::frame::CanvasSize;
    use crate::host::{HostExit, HostReport, RenderHost};
    use crate::audio::AudioBridge;
    use crate::renderer::Renderer;
    use crate::time::FrameClock;
    use std::thread;

    fn script_config() -> ScriptConfig {
        ScriptConfig {
            max_operations_per_tick: 100_000,
            max_call_levels: 32,
            tick_error_policy: TickErrorPolicy::Continue,
        }
    }

    /// Runs `source` against a recording host on another thread and returns both sides.
    fn run(source: &str, frames: u64, config: ScriptConfig) -> (ScriptRuntime, Result<()>, HostReport) {
        let (channel, link) = local_pair(CanvasSize { width: 32, height: 32 });
        let host = thread::spawn(move || host_for(link, frames).run().expect("host run"));
        let mut runtime = ScriptRuntime::new(Box::new(channel), AssetLoader::new(".", AssetValidation::Lenient), &config);
        let result = runtime.run_source(source);
        runtime.dispose();
        let report = host.join().expect("host thread");
        (runtime, result, report)
    }

    fn host_for(link: LocalRenderEnd, frames: u64) -> RenderHost<LocalRenderEnd> {
        RenderHost::new(link, Renderer::new(32, 32), AudioBridge::disabled(), FrameClock::fixed(0.25))
            .with_max_frames(Some(frames))
            .with_recording()
    }

    #[test]
    fn tick_runs_until_stop() {
        let source = r#"
            let seen = 0;
            register_tick(|| {
                seen += 1;
                fill_rect(0, 0, 4, 4);
                if frame_count() == 3 { stop(); }
            });
            start();
            let after = is_active();
        "#;
        let (runtime, result, report) = run(source, 10, script_config());
        result.expect("script runs");
        assert_eq!(runtime.value::<i64>("seen"), Some(3));
        assert_eq!(runtime.value::<bool>("after"), Some(false));
        assert_eq!(report.exit, HostExit::ScriptClosed);
        assert_eq!(report.records.iter().filter(|r| r.commands.iter().any(|c| c.starts_with("fillRect"))).count(), 3);
    }

    #[test]
    fn start_without_callback_raises() {
        let (runtime, result, _) = run("start();", 2, script_config());
        let message = format!("{:#}", result.expect_err("start must fail"));
        assert!(message.contains("before a tick callback"), "{message}");
        assert_eq!(runtime.state(), WorkerState::Disposed);
    }

    #[test]
    fn budget_exhaustion_is_a_tick_error() {
        let mut config = script_config();
        config.max_operations_per_tick = 500;
        let source = r#"
            register_tick(|| {
                if frame_count() == 1 { loop { } }
                if frame_count() == 3 { stop(); }
            });
            start();
        "#;
        let (runtime, result, report) = run(source, 10, config);
        result.expect("loop survives a runaway tick");
        assert_eq!(runtime.frames_run(), 3);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("operation budget"), "{:?}", report.errors);
    }

    #[test]
    fn aborted_script_ends_in_error() {
        let (channel, link) = local_pair(CanvasSize::default());
        let host = thread::spawn(move || host_for(link, 1_000).run().expect("host run"));
        let mut runtime =
            ScriptRuntime::new(Box::new(channel), AssetLoader::new(".", AssetValidation::Lenient), &script_config());
        let handle = runtime.abort_handle();
        runtime.initialize().expect("initialize");
        handle.abort();
        let err = runtime.run_source("register_tick(|| {}); start();").expect_err("aborted");
        assert!(format!("{err:#}").contains("terminated"));
        assert_eq!(runtime.state(), WorkerState::Error);
        runtime.dispose();
        host.join().expect("host thread");
    }

    #[test]
    fn zero_call_levels_fails_initialization() {
        let (channel, _link) = local_pair(CanvasSize::default());
        let mut config = script_config();
        config.max_call_levels = 0;
        let mut runtime =
            ScriptRuntime::new(Box::new(channel), AssetLoader::new(".", AssetValidation::Lenient), &config);
        assert!(runtime.initialize().is_err());
        assert_eq!(runtime.state(), WorkerState::Error);
        assert!(runtime.run_source("1 + 1").is_err());
    }
}
