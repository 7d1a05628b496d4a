//! Wires a script runtime to a render host.
//!
//! In-process mode puts the script on its own thread and keeps the render host (and its audio
//! stream, which is not `Send`) on the calling thread. Isolated mode runs the script in a
//! `lark_worker` child process speaking length-prefixed frames over its stdin/stdout.

use std::env;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::assets::AssetLoader;
use crate::audio::AudioBridge;
use crate::channel::local::local_pair;
use crate::channel::wire::StreamLink;
use crate::channel::RenderLink;
use crate::cli::CliOptions;
use crate::config::EngineConfig;
use crate::frame::{CanvasSize, FrameChannel};
use crate::host::{HostReport, RenderHost};
use crate::renderer::Renderer;
use crate::scripts::ScriptRuntime;
use crate::time::FrameClock;

pub const DEFAULT_CONFIG_PATH: &str = "config/lark.json";
pub const WORKER_BINARY: &str = "lark_worker";

pub struct RunOutcome {
    pub report: HostReport,
    /// Set when the script's top-level code failed (compile error, uncaught error, abort).
    pub script_error: Option<String>,
}

/// Logs go to stderr so the worker's stdout stays a clean frame stream. `RUST_LOG` overrides the
/// default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Resolves the config the way every binary does: file (or defaults), then CLI overrides.
pub fn resolve_config(options: &CliOptions) -> EngineConfig {
    let path = options.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = EngineConfig::load_or_default(&path);
    let overrides = options.config_overrides();
    if !overrides.is_empty() {
        info!("[config] CLI overrides: {}", overrides.applied_fields().join(", "));
        config.apply_overrides(&overrides);
    }
    config
}

pub fn canvas_size(config: &EngineConfig) -> CanvasSize {
    CanvasSize { width: config.surface.width, height: config.surface.height }
}

pub fn run(config: &EngineConfig, options: &CliOptions) -> Result<RunOutcome> {
    let script = options.script.as_deref().ok_or_else(|| anyhow!("--script <path> is required"))?;
    let renderer = Renderer::new(config.surface.width, config.surface.height);
    let audio = AudioBridge::new(config.audio.enabled, config.audio.master_volume);
    let clock = FrameClock::realtime(config.surface.target_fps);

    let outcome = if options.isolated {
        run_isolated(config, options, script, renderer, audio, clock)?
    } else {
        let (channel, link) = local_pair(canvas_size(config));
        let worker = spawn_script_thread(config, script, channel)?;
        let host = RenderHost::new(link, renderer, audio, clock).with_max_frames(options.frames);
        finish(host, || match worker.join() {
            Ok(result) => result.err().map(|err| format!("{err:#}")),
            Err(_) => Some("script thread panicked".to_string()),
        })?
    };

    if let Some(path) = &options.capture {
        outcome.report.renderer.save_png(path)?;
        info!("[app] captured surface to {}", path.display());
    }
    Ok(outcome)
}

/// Runs the host to completion, then collects the script side's result. The host is consumed
/// first so its end of the link is gone before we wait on the script.
fn finish<L, F>(host: RenderHost<L>, join_script: F) -> Result<RunOutcome>
where
    L: RenderLink,
    F: FnOnce() -> Option<String>,
{
    let report = host.run();
    let script_error = join_script();
    if let Some(err) = &script_error {
        error!("[app] script failed: {err}");
    }
    let report = report.context("Render host failed")?;
    info!(frames = report.frames, errors = report.errors.len(), "[app] run complete ({:?})", report.exit);
    Ok(RunOutcome { report, script_error })
}

fn spawn_script_thread<C>(config: &EngineConfig, script: &Path, channel: C) -> Result<thread::JoinHandle<Result<()>>>
where
    C: FrameChannel + Send + 'static,
{
    let script = script.to_path_buf();
    let script_config = config.script.clone();
    let validation = config.assets.validation;
    thread::Builder::new()
        .name("lark-script".to_string())
        .spawn(move || {
            let loader = AssetLoader::for_script(&script, validation);
            let mut runtime = ScriptRuntime::new(Box::new(channel), loader, &script_config);
            let result = runtime.run_file(&script);
            runtime.dispose();
            result
        })
        .context("Spawning script thread")
}

fn run_isolated(
    config: &EngineConfig,
    options: &CliOptions,
    script: &Path,
    renderer: Renderer,
    audio: AudioBridge,
    clock: FrameClock,
) -> Result<RunOutcome> {
    let worker = env::current_exe().context("Locating the current executable")?.with_file_name(WORKER_BINARY);
    if !worker.exists() {
        bail!("isolated mode needs the {WORKER_BINARY} binary next to this one ({})", worker.display());
    }
    let mut command = Command::new(&worker);
    command
        .arg("--script")
        .arg(script)
        .arg("--width")
        .arg(config.surface.width.to_string())
        .arg("--height")
        .arg(config.surface.height.to_string());
    if let Some(path) = &options.config {
        command.arg("--config").arg(path);
    }
    command.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::inherit());
    let mut child = command.spawn().with_context(|| format!("Spawning {}", worker.display()))?;
    let stdin = child.stdin.take().ok_or_else(|| anyhow!("worker stdin was not captured"))?;
    let stdout = child.stdout.take().ok_or_else(|| anyhow!("worker stdout was not captured"))?;
    info!(pid = child.id(), "[app] script worker started");

    let link = StreamLink::new(BufReader::new(stdout), BufWriter::new(stdin));
    let host = RenderHost::new(link, renderer, audio, clock).with_max_frames(options.frames);
    finish(host, move || match child.wait() {
        Ok(status) if status.success() => None,
        Ok(status) => Some(format!("script worker exited with {status}")),
        Err(err) => {
            warn!("[app] waiting for script worker failed: {err}");
            Some(err.to_string())
        }
    })
}
