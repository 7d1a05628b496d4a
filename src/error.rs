use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::bridge::WorkerState;

/// Contract errors raised by the engine core.
///
/// Lifecycle and asset variants are surfaced synchronously to the calling script. Tick callback
/// failures never appear here; they travel through the error-reporting channel instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("start() called while the runtime is already running")]
    AlreadyRunning,
    #[error("start() called before a tick callback was registered")]
    NoCallback,
    #[error("assets must be registered before start()")]
    AlreadyStarted,
    #[error("operation not allowed in state {state}")]
    InvalidState { state: WorkerState },
    #[error("asset path is empty")]
    EmptyPath,
    #[error("asset not found: {path}")]
    AssetNotFound { path: String },
    #[error("directory not found: {path}")]
    NotFound { path: String },
    #[error("not a directory: {path}")]
    NotADirectory { path: String },
    #[error("unsupported format for {path}")]
    UnsupportedFormat { path: String },
    #[error("invalid image data in {path}: {reason}")]
    InvalidImageData { path: String, reason: String },
    #[error("image size {width}x{height} exceeds the {limit}px limit")]
    TooLarge { width: i64, height: i64, limit: u32 },
    #[error("unknown asset '{name}'")]
    UnknownAsset { name: String },
    #[error("audio backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("frame channel closed")]
    ChannelClosed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::Io { path: path.into(), source }
    }

    /// Errors that mean the other side of the frame channel is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, EngineError::ChannelClosed)
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_asset() {
        let err = EngineError::UnknownAsset { name: "hero".into() };
        assert!(err.to_string().contains("'hero'"), "message should quote the asset name");
        let err = EngineError::InvalidState { state: WorkerState::Stopped };
        assert!(err.to_string().contains("stopped"));
    }

    #[test]
    fn only_channel_closed_counts_as_disconnect() {
        assert!(EngineError::ChannelClosed.is_disconnect());
        assert!(!EngineError::AlreadyRunning.is_disconnect());
    }
}
