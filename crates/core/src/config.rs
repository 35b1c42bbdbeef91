//! Configuration types shared across crates.

use crate::shard::ShardScheme;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for `testnetctl`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Sandbox runtime backend.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Helper sandbox settings.
    #[serde(default)]
    pub helper: HelperConfig,
    /// Paths inside the router containers.
    #[serde(default)]
    pub node: NodeConfig,
    /// Synchronization settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.runtime.validate()?;
        self.helper.validate()?;
        self.node.validate()?;
        self.sync.validate()
    }
}

/// Sandbox runtime backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuntimeConfig {
    /// Drive containers through the Docker CLI.
    Docker {
        /// Path or name of the docker binary.
        #[serde(default = "default_docker_binary")]
        binary: String,
    },
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::Docker {
            binary: default_docker_binary(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RuntimeConfig::Docker { binary } if binary.trim().is_empty() => {
                Err("runtime.binary must not be empty".to_string())
            }
            RuntimeConfig::Docker { .. } => Ok(()),
        }
    }
}

/// Helper sandbox configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Image used for helper sandboxes. Must provide `sleep`, `mkdir` and `ls`.
    #[serde(default = "default_helper_image")]
    pub image: String,
    /// Where the shared volume is mounted inside a helper.
    #[serde(default = "default_mount_point")]
    pub mount_point: String,
    /// How long a helper keeps itself alive if teardown never reaches it.
    #[serde(default = "default_helper_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            image: default_helper_image(),
            mount_point: default_mount_point(),
            ttl_secs: default_helper_ttl_secs(),
        }
    }
}

impl HelperConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.image.trim().is_empty() {
            return Err("helper.image must not be empty".to_string());
        }
        if require_absolute("helper.mount_point", &self.mount_point)? == 0 {
            return Err("helper.mount_point must not be the root directory".to_string());
        }
        if self.ttl_secs == 0 {
            return Err("helper.ttl_secs must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Locations inside a router container.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// The daemon's local netDb directory.
    #[serde(default = "default_netdb_path")]
    pub netdb_path: String,
    /// Where the daemon persists its own RouterInfo.
    #[serde(default = "default_router_info_path")]
    pub router_info_path: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            netdb_path: default_netdb_path(),
            router_info_path: default_router_info_path(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), String> {
        if require_absolute("node.netdb_path", &self.netdb_path)? == 0 {
            return Err("node.netdb_path must not be the root directory".to_string());
        }
        require_absolute("node.router_info_path", &self.router_info_path)?;
        Ok(())
    }
}

/// Synchronization configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Name of the shared staging volume.
    #[serde(default = "default_shared_volume")]
    pub shared_volume: String,
    /// Bucket scheme for published RouterInfos.
    #[serde(default)]
    pub shard_scheme: ShardScheme,
    /// Upper bound for each sandbox lifecycle or copy call.
    #[serde(default = "default_op_timeout_secs")]
    pub op_timeout_secs: u64,
    /// Upper bound for helper removal.
    #[serde(default = "default_teardown_timeout_secs")]
    pub teardown_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            shared_volume: default_shared_volume(),
            shard_scheme: ShardScheme::default(),
            op_timeout_secs: default_op_timeout_secs(),
            teardown_timeout_secs: default_teardown_timeout_secs(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.shared_volume.trim().is_empty() {
            return Err("sync.shared_volume must not be empty".to_string());
        }
        if self.op_timeout_secs == 0 {
            return Err("sync.op_timeout_secs must be greater than zero".to_string());
        }
        if self.teardown_timeout_secs == 0 {
            return Err("sync.teardown_timeout_secs must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.op_timeout_secs)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_secs)
    }
}

/// Absolute, with no `..` components. Returns the number of real components.
fn require_absolute(field: &str, path: &str) -> Result<usize, String> {
    if !path.starts_with('/') {
        return Err(format!("{field} must be an absolute path, got {path:?}"));
    }
    let mut depth = 0;
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => return Err(format!("{field} must not contain '..', got {path:?}")),
            _ => depth += 1,
        }
    }
    Ok(depth)
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_helper_image() -> String {
    "alpine".to_string()
}

fn default_mount_point() -> String {
    "/shared".to_string()
}

fn default_helper_ttl_secs() -> u64 {
    60
}

fn default_netdb_path() -> String {
    "/root/.i2pd/netDb".to_string()
}

fn default_router_info_path() -> String {
    "/root/.i2pd/router.info".to_string()
}

fn default_shared_volume() -> String {
    "go-i2p-testnet-shared".to_string()
}

fn default_op_timeout_secs() -> u64 {
    60
}

fn default_teardown_timeout_secs() -> u64 {
    15
}
