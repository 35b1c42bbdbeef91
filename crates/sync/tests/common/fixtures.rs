use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use testnet_core::config::NodeConfig;
use testnet_core::{IdentityRecord, ShardScheme};
use testnet_sandbox::{HelperOptions, MemoryBackend, SandboxId, SandboxRuntime, VolumeBinding};
use testnet_sync::{NetDbSync, Registry};

/// Shared volume name used across the sync tests.
pub const SHARED_VOLUME: &str = "go-i2p-testnet-shared";

fn push_string(out: &mut Vec<u8>, s: &str) {
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
}

fn mapping(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (k, v) in pairs {
        push_string(&mut body, k);
        body.push(b'=');
        push_string(&mut body, v);
        body.push(b';');
    }
    let mut out = (body.len() as u16).to_be_bytes().to_vec();
    out.extend(body);
    out
}

/// A well-formed RouterInfo with an Ed25519 key certificate. Distinct seeds
/// give distinct identities.
pub fn router_info(seed: u8) -> Bytes {
    let mut out: Vec<u8> = (0..384u32)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    // KEY certificate: signing type 7 (Ed25519), crypto type 4.
    out.push(5);
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&7u16.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&1_700_000_000_000u64.to_be_bytes());
    out.push(1);
    out.push(5);
    out.extend_from_slice(&0u64.to_be_bytes());
    push_string(&mut out, "NTCP2");
    let host = format!("172.28.0.{seed}");
    out.extend(mapping(&[("host", &host), ("port", "7654")]));
    out.push(0);
    out.extend(mapping(&[("caps", "XfR"), ("netId", "2")]));
    out.extend(std::iter::repeat_n(0xAA, 64));
    Bytes::from(out)
}

/// Deterministic bytes that are not a RouterInfo.
pub fn garbage_bytes(len: usize) -> Bytes {
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let data: Vec<u8> = (0..len)
        .map(|_| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (state >> 56) as u8
        })
        .collect();
    Bytes::from(data)
}

/// An in-memory testnet: router containers, the shared volume and a sync
/// engine with short timeouts.
pub struct Testnet {
    pub backend: Arc<MemoryBackend>,
    pub sync: NetDbSync,
    pub registry: Registry,
}

impl Testnet {
    pub fn new() -> Self {
        Self::with_scheme(ShardScheme::Lettered)
    }

    pub fn with_scheme(scheme: ShardScheme) -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()), scheme)
    }

    pub fn with_backend(backend: Arc<MemoryBackend>, scheme: ShardScheme) -> Self {
        let runtime: Arc<dyn SandboxRuntime> = backend.clone();
        Self::with_runtime(backend, runtime, scheme)
    }

    /// Use `runtime` for the engine while inspecting state through `backend`.
    pub fn with_runtime(
        backend: Arc<MemoryBackend>,
        runtime: Arc<dyn SandboxRuntime>,
        scheme: ShardScheme,
    ) -> Self {
        let options = HelperOptions {
            image: "alpine".to_string(),
            mount_point: "/shared".to_string(),
            ttl: Duration::from_secs(60),
            op_timeout: Duration::from_millis(500),
            teardown_timeout: Duration::from_millis(200),
        };
        Self {
            backend,
            sync: NetDbSync::with_options(runtime, options, NodeConfig::default(), scheme),
            registry: Registry::new(SHARED_VOLUME),
        }
    }

    /// Start a router with its own RouterInfo and an empty netDb, and
    /// register it.
    pub async fn add_node(&mut self, name: &str, seed: u8) -> (SandboxId, IdentityRecord) {
        let node = self.backend.add_container(name, true, vec![]).await;
        let raw = router_info(seed);
        self.backend
            .write_file(&node, "/root/.i2pd/router.info", raw.clone())
            .await
            .unwrap();
        self.backend
            .make_dir(&node, "/root/.i2pd/netDb")
            .await
            .unwrap();
        self.registry.register(node.clone());
        (node, IdentityRecord::from_bytes(raw).unwrap())
    }

    /// Start a router with no RouterInfo, as if the daemon never started.
    pub async fn add_bare_node(&mut self, name: &str) -> SandboxId {
        let node = self.backend.add_container(name, true, vec![]).await;
        self.backend
            .make_dir(&node, "/root/.i2pd/netDb")
            .await
            .unwrap();
        self.registry.register(node.clone());
        node
    }

    pub async fn node_netdb_files(&self, node: &SandboxId) -> Vec<String> {
        let mut files = Vec::new();
        for shard in self.backend.list_dir(node, "/root/.i2pd/netDb").await {
            let dir = format!("/root/.i2pd/netDb/{shard}");
            for name in self.backend.list_dir(node, &dir).await {
                files.push(format!("{shard}/{name}"));
            }
        }
        files.sort();
        files
    }

    pub async fn shared_files(&self) -> Vec<String> {
        self.backend
            .volume_files(SHARED_VOLUME)
            .await
            .into_keys()
            .collect()
    }

    /// Containers still alive besides the routers.
    pub async fn live_helpers(&self) -> Vec<String> {
        self.backend
            .live_containers()
            .await
            .into_iter()
            .filter(|name| name.starts_with("netdb-helper-"))
            .collect()
    }
}
