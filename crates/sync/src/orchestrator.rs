//! The netDb synchronization verbs.
//!
//! Each verb acts on a single node and the shared volume and acquires at
//! most one helper sandbox. Nothing is cached between calls: records are
//! re-extracted and shard paths recomputed every time.

use crate::error::{SyncError, SyncResult};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use testnet_core::config::{AppConfig, NodeConfig};
use testnet_core::{IdentityRecord, SHARED_NETDB_DIR, ShardKey, ShardScheme};
use testnet_sandbox::path::{join, normalize_absolute, normalize_relative, split_parent};
use testnet_sandbox::{
    ArchiveEntry, HelperOptions, PathKind, SandboxError, SandboxId, SandboxRuntime, archive,
    bounded, make_dirs, with_helper,
};
use tracing::instrument;

/// Where a record landed in the shared store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedRecord {
    pub encoded_hash: String,
    pub shard: ShardKey,
    pub filename: String,
    /// Path relative to the volume root: `netDb/<shard>/<filename>`.
    pub path: String,
}

/// Synchronization verbs over a sandbox runtime.
pub struct NetDbSync {
    runtime: Arc<dyn SandboxRuntime>,
    helper: HelperOptions,
    node: NodeConfig,
    shard_scheme: ShardScheme,
}

impl NetDbSync {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: &AppConfig) -> Self {
        Self::with_options(
            runtime,
            HelperOptions::from_config(&config.helper, &config.sync),
            config.node.clone(),
            config.sync.shard_scheme,
        )
    }

    pub fn with_options(
        runtime: Arc<dyn SandboxRuntime>,
        helper: HelperOptions,
        node: NodeConfig,
        shard_scheme: ShardScheme,
    ) -> Self {
        Self {
            runtime,
            helper,
            node,
            shard_scheme,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.runtime
    }

    pub fn shard_scheme(&self) -> ShardScheme {
        self.shard_scheme
    }

    pub fn node_config(&self) -> &NodeConfig {
        &self.node
    }

    fn op_timeout(&self) -> Duration {
        self.helper.op_timeout
    }

    /// `<mount point>/netDb` as seen from a helper.
    fn shared_netdb_dir(&self) -> String {
        join(&self.helper.mount_point, SHARED_NETDB_DIR)
    }

    /// Read and parse the RouterInfo at `record_path` inside `node`.
    #[instrument(skip(self), fields(node = %node))]
    pub async fn extract_identity_record(
        &self,
        node: &SandboxId,
        record_path: &str,
    ) -> SyncResult<IdentityRecord> {
        let unavailable = |reason: String| SyncError::RecordUnavailable {
            node: node.to_string(),
            reason,
        };

        let copied = bounded(
            "copy_from",
            self.op_timeout(),
            self.runtime.copy_from(node, record_path),
        )
        .await;
        let (tar, stat) = match copied {
            Ok(copied) => copied,
            Err(SandboxError::NotFound(_)) => {
                return Err(unavailable(format!("{record_path} does not exist")));
            }
            Err(e) => return Err(e.into()),
        };
        if !stat.is_regular() {
            return Err(unavailable(format!("{record_path} is not a regular file")));
        }

        let entries = archive::decode(&tar)?;
        let (_, data) = archive::first_file(&entries)
            .ok_or_else(|| unavailable(format!("{record_path} archive holds no regular file")))?;
        let record = IdentityRecord::from_bytes(data.clone())?;

        tracing::debug!(
            hash = record.encoded_hash(),
            size = record.raw_bytes().len(),
            "Extracted identity record"
        );
        Ok(record)
    }

    /// Extract the node's own RouterInfo from its configured location.
    pub async fn extract_node_record(&self, node: &SandboxId) -> SyncResult<IdentityRecord> {
        self.extract_identity_record(node, &self.node.router_info_path)
            .await
    }

    /// Publish the node's RouterInfo into `netDb/<shard>/` of the volume.
    ///
    /// Republishing an unchanged record rewrites the same file.
    #[instrument(skip(self), fields(node = %node))]
    pub async fn publish_record(&self, node: &SandboxId, volume: &str) -> SyncResult<PublishedRecord> {
        let record = self.extract_node_record(node).await?;
        let shard = record.shard(self.shard_scheme)?;
        let shard_dir = join(&self.shared_netdb_dir(), shard.as_str());
        let tar = archive::encode(&[ArchiveEntry::file(
            record.filename(),
            record.raw_bytes().clone(),
        )])?;

        with_helper(&self.runtime, &self.helper, volume, node.as_str(), |helper| async move {
            helper.ensure_dir(&shard_dir).await?;
            helper.copy_archive_in(&shard_dir, tar).await?;
            match helper.run_command(&["ls", "-l", shard_dir.as_str()]).await {
                Ok(listing) => {
                    tracing::debug!(shard_dir = %shard_dir, listing = %listing.stdout.trim_end(), "Shard contents");
                }
                Err(e) => tracing::debug!(shard_dir = %shard_dir, error = %e, "Could not list shard"),
            }
            Ok::<_, SyncError>(())
        })
        .await?;

        let published = PublishedRecord {
            encoded_hash: record.encoded_hash().to_string(),
            path: format!("{SHARED_NETDB_DIR}/{shard}/{}", record.filename()),
            filename: record.filename().to_string(),
            shard,
        };
        tracing::info!(volume, path = %published.path, "Published identity record");
        Ok(published)
    }

    /// Merge the node's netDb into the shared store.
    ///
    /// Returns the number of files copied. Existing shard contents are kept;
    /// files with the same name are overwritten.
    #[instrument(skip(self), fields(node = %node))]
    pub async fn push_node_db_to_shared(&self, node: &SandboxId, volume: &str) -> SyncResult<usize> {
        let netdb_path = &self.node.netdb_path;
        let (tar, stat) = bounded(
            "copy_from",
            self.op_timeout(),
            self.runtime.copy_from(node, netdb_path),
        )
        .await?;
        if stat.kind != PathKind::Directory {
            return Err(SyncError::TransferFailed(format!(
                "{netdb_path} on {node} is not a directory"
            )));
        }

        let entries = archive::reroot(archive::decode(&tar)?, SHARED_NETDB_DIR)?;
        let files = archive::file_count(&entries);
        let tar = archive::encode(&entries)?;
        let mount_point = self.helper.mount_point.clone();

        with_helper(&self.runtime, &self.helper, volume, node.as_str(), |helper| async move {
            helper.ensure_dir(&mount_point).await?;
            helper.copy_archive_in(&mount_point, tar).await?;
            Ok::<_, SyncError>(())
        })
        .await?;

        tracing::info!(volume, files, "Pushed node netDb to shared store");
        Ok(files)
    }

    /// Merge the shared store into the node's netDb.
    ///
    /// Returns the number of files copied. Local files absent from the store
    /// are left alone; an empty store copies nothing and still succeeds.
    #[instrument(skip(self), fields(node = %node))]
    pub async fn pull_shared_to_node_db(&self, node: &SandboxId, volume: &str) -> SyncResult<usize> {
        let netdb_path = normalize_absolute(&self.node.netdb_path)?;
        let (parent, netdb_name) = split_parent(&netdb_path)?;
        let shared_netdb = self.shared_netdb_dir();

        let entries = with_helper(&self.runtime, &self.helper, volume, node.as_str(), |helper| async move {
            helper.ensure_dir(&shared_netdb).await?;
            let (tar, _) = helper.copy_archive_out(&shared_netdb).await?;
            Ok::<_, SyncError>(archive::decode(&tar)?)
        })
        .await?;

        let entries = archive::reroot(entries, &netdb_name)?;
        let files = archive::file_count(&entries);
        let tar = archive::encode(&entries)?;

        make_dirs(self.runtime.as_ref(), node, &netdb_path, self.op_timeout()).await?;
        bounded(
            "copy_into",
            self.op_timeout(),
            self.runtime.copy_into(node, &parent, tar),
        )
        .await?;

        tracing::info!(volume, files, "Pulled shared store into node netDb");
        Ok(files)
    }

    /// Write one file into a volume, creating `dir` (relative to the volume
    /// root, empty for the root itself) as needed.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn seed_volume_file(
        &self,
        volume: &str,
        dir: &str,
        filename: &str,
        data: Bytes,
    ) -> SyncResult<()> {
        let target_dir = if dir.trim_matches('/').is_empty() {
            self.helper.mount_point.clone()
        } else {
            join(&self.helper.mount_point, &normalize_relative(dir)?)
        };
        let filename = normalize_relative(filename)?;
        let tar = archive::encode(&[ArchiveEntry::file(filename, data)])?;

        with_helper(&self.runtime, &self.helper, volume, "seed", |helper| async move {
            helper.ensure_dir(&target_dir).await?;
            helper.copy_archive_in(&target_dir, tar).await?;
            Ok::<_, SyncError>(())
        })
        .await?;

        tracing::info!(volume, dir, "Seeded volume file");
        Ok(())
    }
}
