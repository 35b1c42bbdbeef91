//! Error taxonomy surfaced to the control process.

use testnet_sandbox::SandboxError;
use thiserror::Error;

/// Sync verb errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("identity record unavailable on {node}: {reason}")]
    RecordUnavailable { node: String, reason: String },

    #[error("malformed identity record: {0}")]
    RecordMalformed(String),

    #[error("invalid identity hash: {0}")]
    InvalidHash(String),

    #[error("archive corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to create helper sandbox: {0}")]
    SandboxCreateFailed(String),

    #[error("failed to start helper sandbox: {0}")]
    SandboxStartFailed(String),

    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

impl SyncError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::RecordUnavailable { .. } => "record_unavailable",
            SyncError::RecordMalformed(_) => "record_malformed",
            SyncError::InvalidHash(_) => "invalid_hash",
            SyncError::ArchiveCorrupt(_) => "archive_corrupt",
            SyncError::Io(_) => "io",
            SyncError::SandboxCreateFailed(_) => "sandbox_create_failed",
            SyncError::SandboxStartFailed(_) => "sandbox_start_failed",
            SyncError::TransferFailed(_) => "transfer_failed",
        }
    }
}

impl From<SandboxError> for SyncError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::CreateFailed(msg) => SyncError::SandboxCreateFailed(msg),
            SandboxError::StartFailed(msg) => SyncError::SandboxStartFailed(msg),
            SandboxError::ArchiveCorrupt(msg) | SandboxError::InvalidPath(msg) => {
                SyncError::ArchiveCorrupt(msg)
            }
            SandboxError::Io(e) => SyncError::Io(e),
            other @ (SandboxError::TransferFailed(_)
            | SandboxError::ExecFailed { .. }
            | SandboxError::Timeout { .. }
            | SandboxError::NotFound(_)
            | SandboxError::StopFailed(_)
            | SandboxError::RemoveFailed(_)
            | SandboxError::Config(_)) => SyncError::TransferFailed(other.to_string()),
        }
    }
}

impl From<testnet_core::Error> for SyncError {
    fn from(err: testnet_core::Error) -> Self {
        match err {
            testnet_core::Error::InvalidHash(msg) => SyncError::InvalidHash(msg),
            testnet_core::Error::RecordMalformed(msg) => SyncError::RecordMalformed(msg),
            testnet_core::Error::Config(msg) => SyncError::TransferFailed(msg),
        }
    }
}

/// Result type for sync verbs.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
