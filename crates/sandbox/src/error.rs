//! Sandbox error types.

use std::time::Duration;
use thiserror::Error;

/// Sandbox runtime and transfer errors.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox create failed: {0}")]
    CreateFailed(String),

    #[error("sandbox start failed: {0}")]
    StartFailed(String),

    #[error("sandbox stop failed: {0}")]
    StopFailed(String),

    #[error("sandbox remove failed: {0}")]
    RemoveFailed(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("command {command:?} exited with {exit_code}: {stderr}")]
    ExecFailed {
        command: String,
        exit_code: i64,
        stderr: String,
    },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("archive corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
