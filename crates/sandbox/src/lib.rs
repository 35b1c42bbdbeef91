//! Sandbox runtime abstraction and transfer plumbing for the testnet.
//!
//! This crate provides:
//! - The [`SandboxRuntime`] trait and its Docker backend, plus an in-memory
//!   backend for tests behind the `testing` feature
//! - A tar codec for the runtime's archive copy primitive
//! - Disposable helper sandboxes bound to the shared volume ([`with_helper`])

pub mod archive;
pub mod backends;
pub mod error;
pub mod helper;
pub mod path;
pub mod traits;

pub use archive::ArchiveEntry;
pub use backends::docker::DockerCliBackend;
#[cfg(any(test, feature = "testing"))]
pub use backends::memory::{MemoryBackend, RuntimeOp};
pub use error::{SandboxError, SandboxResult};
pub use helper::{HelperHandle, HelperOptions, HelperState, bounded, make_dirs, with_helper};
pub use traits::{
    ExecOutput, PathKind, PathStat, SandboxId, SandboxRuntime, SandboxSpec, VolumeBinding,
};

use std::sync::Arc;
use testnet_core::config::RuntimeConfig;

/// Create a sandbox runtime from configuration.
pub fn from_config(config: &RuntimeConfig) -> SandboxResult<Arc<dyn SandboxRuntime>> {
    config.validate().map_err(SandboxError::Config)?;

    match config {
        RuntimeConfig::Docker { binary } => Ok(Arc::new(DockerCliBackend::new(binary))),
    }
}
