use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use testnet_sandbox::{HelperOptions, MemoryBackend, SandboxRuntime};

/// Shared volume name used across the sandbox tests.
pub const SHARED_VOLUME: &str = "go-i2p-testnet-shared";

/// An in-memory runtime, both as its concrete type (for inspection and
/// failure injection) and as the trait object the library consumes.
pub fn memory_runtime() -> (Arc<MemoryBackend>, Arc<dyn SandboxRuntime>) {
    let backend = Arc::new(MemoryBackend::new());
    let runtime: Arc<dyn SandboxRuntime> = backend.clone();
    (backend, runtime)
}

/// Helper options with short bounds so timeout paths finish quickly.
pub fn fast_options() -> HelperOptions {
    HelperOptions {
        image: "alpine".to_string(),
        mount_point: "/shared".to_string(),
        ttl: Duration::from_secs(60),
        op_timeout: Duration::from_millis(200),
        teardown_timeout: Duration::from_millis(200),
    }
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
