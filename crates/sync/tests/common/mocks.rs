use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use testnet_sandbox::{
    ExecOutput, MemoryBackend, PathStat, SandboxId, SandboxResult, SandboxRuntime, SandboxSpec,
};
use tokio_util::sync::CancellationToken;

/// Delegates to a [`MemoryBackend`] and cancels a token once a given number
/// of sandboxes has been created.
pub struct CancellingRuntime {
    inner: Arc<MemoryBackend>,
    token: CancellationToken,
    cancel_after_creates: usize,
    pub creates: Arc<AtomicUsize>,
}

impl CancellingRuntime {
    pub fn new(
        inner: Arc<MemoryBackend>,
        token: CancellationToken,
        cancel_after_creates: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner,
            token,
            cancel_after_creates,
            creates: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl SandboxRuntime for CancellingRuntime {
    async fn create(&self, spec: &SandboxSpec) -> SandboxResult<SandboxId> {
        let id = self.inner.create(spec).await?;
        let created = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        if created >= self.cancel_after_creates {
            self.token.cancel();
        }
        Ok(id)
    }

    async fn start(&self, id: &SandboxId) -> SandboxResult<()> {
        self.inner.start(id).await
    }

    async fn stop(&self, id: &SandboxId, timeout: Duration) -> SandboxResult<()> {
        self.inner.stop(id, timeout).await
    }

    async fn remove(&self, id: &SandboxId, force: bool) -> SandboxResult<()> {
        self.inner.remove(id, force).await
    }

    async fn exec(&self, id: &SandboxId, argv: &[String]) -> SandboxResult<ExecOutput> {
        self.inner.exec(id, argv).await
    }

    async fn copy_into(&self, id: &SandboxId, dest_dir: &str, archive: Bytes) -> SandboxResult<()> {
        self.inner.copy_into(id, dest_dir, archive).await
    }

    async fn copy_from(&self, id: &SandboxId, src_path: &str) -> SandboxResult<(Bytes, PathStat)> {
        self.inner.copy_from(id, src_path).await
    }

    fn backend_name(&self) -> &'static str {
        "cancelling"
    }
}
