//! Disposable helper sandboxes bound to the shared volume.
//!
//! Sandboxes cannot see each other's filesystems, so moving bytes between a
//! node and the shared volume goes through a short-lived helper that mounts
//! the volume. [`with_helper`] owns the helper for the duration of one
//! closure and removes it on every exit path:
//!
//! ```text
//! Created -> Started -> InUse -> TornDown
//!    |          |         |
//!    +----------+---------+--> TornDown (forced removal)
//! ```
//!
//! Removal is awaited inline on success and error. If the future is dropped
//! mid-flight, including while that inline removal is still pending, or the
//! closure panics, the guard spawns the removal on the runtime it was
//! created on. Removal failures are logged
//! and never replace the closure's result.

use crate::error::{SandboxError, SandboxResult};
use crate::path::normalize_absolute;
use crate::traits::{ExecOutput, PathStat, SandboxId, SandboxRuntime, SandboxSpec, VolumeBinding};
use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use testnet_core::config::{HelperConfig, SyncConfig};
use uuid::Uuid;

/// Maximum number of label characters carried into a helper name.
const LABEL_LEN: usize = 12;

/// Settings for helper sandboxes.
#[derive(Clone, Debug)]
pub struct HelperOptions {
    pub image: String,
    pub mount_point: String,
    /// Lifetime of the helper's `sleep` command.
    pub ttl: Duration,
    /// Bound for each create/start/copy/exec call.
    pub op_timeout: Duration,
    /// Bound for the forced removal.
    pub teardown_timeout: Duration,
}

impl HelperOptions {
    pub fn from_config(helper: &HelperConfig, sync: &SyncConfig) -> Self {
        Self {
            image: helper.image.clone(),
            mount_point: helper.mount_point.clone(),
            ttl: helper.ttl(),
            op_timeout: sync.op_timeout(),
            teardown_timeout: sync.teardown_timeout(),
        }
    }
}

impl Default for HelperOptions {
    fn default() -> Self {
        Self::from_config(&HelperConfig::default(), &SyncConfig::default())
    }
}

/// Lifecycle of a helper sandbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HelperState {
    Created,
    Started,
    InUse,
    TornDown,
}

/// Await a runtime call, failing with `Timeout` once `limit` elapses.
pub async fn bounded<T, F>(op: &'static str, limit: Duration, fut: F) -> SandboxResult<T>
where
    F: Future<Output = SandboxResult<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| SandboxError::Timeout { op, after: limit })?
}

/// `mkdir -p` inside a running sandbox.
pub async fn make_dirs(
    runtime: &dyn SandboxRuntime,
    id: &SandboxId,
    path: &str,
    limit: Duration,
) -> SandboxResult<()> {
    let path = normalize_absolute(path)?;
    let argv = vec!["mkdir".to_string(), "-p".to_string(), path];
    let output = bounded("exec", limit, runtime.exec(id, &argv)).await?;
    if !output.success() {
        return Err(SandboxError::ExecFailed {
            command: argv.join(" "),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(())
}

/// Unique helper name: `netdb-helper-<label>-<nonce>`.
///
/// The label is reduced to characters Docker accepts in container names.
pub fn helper_name(label: &str) -> String {
    let label: String = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .take(LABEL_LEN)
        .collect();
    let nonce = Uuid::new_v4().simple();
    if label.is_empty() {
        format!("netdb-helper-{nonce}")
    } else {
        format!("netdb-helper-{label}-{nonce}")
    }
}

/// Access to a live helper sandbox.
#[derive(Clone)]
pub struct HelperHandle {
    runtime: Arc<dyn SandboxRuntime>,
    id: SandboxId,
    name: String,
    mount_point: String,
    op_timeout: Duration,
}

impl HelperHandle {
    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the shared volume is mounted inside the helper.
    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    /// Extract an archive beneath `dest_dir` inside the helper.
    pub async fn copy_archive_in(&self, dest_dir: &str, archive: Bytes) -> SandboxResult<()> {
        let dest_dir = normalize_absolute(dest_dir)?;
        bounded(
            "copy_into",
            self.op_timeout,
            self.runtime.copy_into(&self.id, &dest_dir, archive),
        )
        .await
    }

    /// Archive `src_path` inside the helper.
    pub async fn copy_archive_out(&self, src_path: &str) -> SandboxResult<(Bytes, PathStat)> {
        let src_path = normalize_absolute(src_path)?;
        bounded(
            "copy_from",
            self.op_timeout,
            self.runtime.copy_from(&self.id, &src_path),
        )
        .await
    }

    /// Run a command in the helper. Only for idempotent housekeeping.
    pub async fn run_command(&self, argv: &[&str]) -> SandboxResult<ExecOutput> {
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        bounded("exec", self.op_timeout, self.runtime.exec(&self.id, &argv)).await
    }

    /// Create `path` and its parents inside the helper.
    pub async fn ensure_dir(&self, path: &str) -> SandboxResult<()> {
        make_dirs(self.runtime.as_ref(), &self.id, path, self.op_timeout).await
    }
}

impl std::fmt::Debug for HelperHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mount_point", &self.mount_point)
            .finish()
    }
}

/// Owns the helper until it is torn down, exactly once.
struct TeardownGuard {
    runtime: Arc<dyn SandboxRuntime>,
    id: Option<SandboxId>,
    name: String,
    state: HelperState,
    timeout: Duration,
    runtime_handle: Option<tokio::runtime::Handle>,
}

impl TeardownGuard {
    fn new(runtime: Arc<dyn SandboxRuntime>, id: SandboxId, name: String, timeout: Duration) -> Self {
        Self {
            runtime,
            id: Some(id),
            name,
            state: HelperState::Created,
            timeout,
            runtime_handle: tokio::runtime::Handle::try_current().ok(),
        }
    }

    fn advance(&mut self, state: HelperState) {
        tracing::trace!(helper = %self.name, from = ?self.state, to = ?state, "Helper state change");
        self.state = state;
    }

    /// Remove the helper inline. The id stays in the guard until removal
    /// returns, so dropping this future mid-removal still leaves `Drop` to
    /// spawn it.
    async fn teardown(mut self) {
        if let Some(id) = self.id.clone() {
            remove_helper(
                self.runtime.clone(),
                id,
                self.name.clone(),
                self.state,
                self.timeout,
            )
            .await;
            self.id = None;
        }
        self.state = HelperState::TornDown;
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(id) = self.id.take() else {
            return;
        };
        match &self.runtime_handle {
            Some(handle) => {
                tracing::debug!(
                    helper = %self.name,
                    state = ?self.state,
                    "Helper dropped before teardown, spawning forced removal"
                );
                handle.spawn(remove_helper(
                    self.runtime.clone(),
                    id,
                    std::mem::take(&mut self.name),
                    self.state,
                    self.timeout,
                ));
            }
            None => {
                tracing::warn!(
                    helper = %self.name,
                    id = %id,
                    "Helper dropped without runtime handle - sandbox may be orphaned"
                );
            }
        }
        self.state = HelperState::TornDown;
    }
}

async fn remove_helper(
    runtime: Arc<dyn SandboxRuntime>,
    id: SandboxId,
    name: String,
    state: HelperState,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, runtime.remove(&id, true)).await {
        Ok(Ok(())) => {
            tracing::debug!(helper = %name, id = %id.short(), from = ?state, "Helper sandbox torn down");
        }
        Ok(Err(SandboxError::NotFound(_))) => {
            tracing::debug!(helper = %name, id = %id.short(), from = ?state, "Helper sandbox already gone");
        }
        Ok(Err(e)) => {
            tracing::warn!(
                helper = %name,
                id = %id.short(),
                from = ?state,
                error = %e,
                "Failed to remove helper sandbox"
            );
        }
        Err(_) => {
            tracing::warn!(
                helper = %name,
                id = %id.short(),
                from = ?state,
                timeout = ?timeout,
                "Timed out removing helper sandbox, abandoning it"
            );
        }
    }
}

/// Run `f` against a fresh helper sandbox with `volume` mounted.
///
/// `label` (typically the node handle) is folded into the helper name for
/// observability; a random nonce keeps concurrent helpers on the same volume
/// from colliding. The helper is removed before this returns, or, if the
/// returned future is dropped early, by a task spawned from the guard.
pub async fn with_helper<T, E, F, Fut>(
    runtime: &Arc<dyn SandboxRuntime>,
    options: &HelperOptions,
    volume: &str,
    label: &str,
    f: F,
) -> Result<T, E>
where
    F: FnOnce(HelperHandle) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<SandboxError>,
{
    let mount_point = normalize_absolute(&options.mount_point)?;
    let name = helper_name(label);
    let spec = SandboxSpec {
        name: name.clone(),
        image: options.image.clone(),
        command: vec!["sleep".to_string(), options.ttl.as_secs().max(1).to_string()],
        binds: vec![VolumeBinding::new(volume, mount_point.clone())],
    };

    let id = match bounded("create", options.op_timeout, runtime.create(&spec)).await {
        Ok(id) => id,
        Err(e @ SandboxError::Timeout { .. }) => {
            // The runtime may still have created it; remove by name.
            TeardownGuard::new(
                runtime.clone(),
                SandboxId::new(name.clone()),
                name,
                options.teardown_timeout,
            )
            .teardown()
            .await;
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    tracing::debug!(helper = %name, id = %id.short(), volume, "Helper sandbox created");

    let mut guard = TeardownGuard::new(runtime.clone(), id.clone(), name.clone(), options.teardown_timeout);

    if let Err(e) = bounded("start", options.op_timeout, runtime.start(&id)).await {
        guard.teardown().await;
        return Err(e.into());
    }
    guard.advance(HelperState::Started);

    let handle = HelperHandle {
        runtime: runtime.clone(),
        id,
        name,
        mount_point,
        op_timeout: options.op_timeout,
    };
    guard.advance(HelperState::InUse);

    let result = f(handle).await;
    guard.teardown().await;
    result
}
