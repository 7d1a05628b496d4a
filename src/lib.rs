pub mod app;
pub mod assets;
pub mod audio;
pub mod bridge;
pub mod channel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod frame;
pub mod host;
pub mod input;
pub mod pixels;
pub mod renderer;
pub mod script_harness;
pub mod scripts;
pub mod time;

pub use app::{run, RunOutcome};
pub use error::{EngineError, EngineResult};
pub use scripts::{AbortHandle, ScriptRuntime};
