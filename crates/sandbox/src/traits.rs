//! Sandbox runtime trait definitions.

use crate::error::SandboxResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Identifier of a sandbox as assigned by the runtime (container id or name).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SandboxId(String);

impl SandboxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Docker-style short form (first 12 characters).
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Debug for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SandboxId({})", self.short())
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SandboxId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SandboxId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A named volume mounted into a sandbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeBinding {
    pub volume: String,
    pub mount_point: String,
}

impl VolumeBinding {
    pub fn new(volume: impl Into<String>, mount_point: impl Into<String>) -> Self {
        Self {
            volume: volume.into(),
            mount_point: mount_point.into(),
        }
    }
}

/// Everything needed to create a sandbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub binds: Vec<VolumeBinding>,
}

/// Result of running a command inside a sandbox.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Kind of filesystem object at a copied-out path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
    /// Symlink, device, fifo or anything else that is neither.
    Other,
}

/// Stat information accompanying a copy-out archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathStat {
    /// Final path component of the copied path.
    pub name: String,
    pub kind: PathKind,
    /// Size in bytes for regular files, zero otherwise.
    pub size: u64,
}

impl PathStat {
    pub fn is_regular(&self) -> bool {
        self.kind == PathKind::File
    }
}

/// Sandbox control and archive transfer primitives.
///
/// Copy-out of a directory yields an archive whose entries are rooted at the
/// directory's own name. Copy-in extracts an archive beneath an existing
/// directory, merging with what is already there.
#[async_trait]
pub trait SandboxRuntime: Send + Sync + 'static {
    /// Create (but do not start) a sandbox.
    async fn create(&self, spec: &SandboxSpec) -> SandboxResult<SandboxId>;

    /// Start a created sandbox.
    async fn start(&self, id: &SandboxId) -> SandboxResult<()>;

    /// Stop a running sandbox, waiting at most `timeout` before killing it.
    async fn stop(&self, id: &SandboxId, timeout: Duration) -> SandboxResult<()>;

    /// Remove a sandbox. With `force`, a running sandbox is killed first.
    async fn remove(&self, id: &SandboxId, force: bool) -> SandboxResult<()>;

    /// Run a command inside a running sandbox.
    async fn exec(&self, id: &SandboxId, argv: &[String]) -> SandboxResult<ExecOutput>;

    /// Extract a tar archive beneath `dest_dir` inside the sandbox.
    async fn copy_into(&self, id: &SandboxId, dest_dir: &str, archive: Bytes) -> SandboxResult<()>;

    /// Archive `src_path` inside the sandbox.
    async fn copy_from(&self, id: &SandboxId, src_path: &str) -> SandboxResult<(Bytes, PathStat)>;

    /// Get the backend name for logging.
    fn backend_name(&self) -> &'static str;
}
