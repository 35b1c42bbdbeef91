//! Node registry and the per-node control loop.

use crate::error::SyncError;
use crate::orchestrator::NetDbSync;
use std::fmt;
use testnet_sandbox::SandboxId;
use tokio_util::sync::CancellationToken;

/// The nodes of one testnet and the volume they share.
#[derive(Clone, Debug)]
pub struct Registry {
    shared_volume: String,
    nodes: Vec<SandboxId>,
}

impl Registry {
    pub fn new(shared_volume: impl Into<String>) -> Self {
        Self {
            shared_volume: shared_volume.into(),
            nodes: Vec::new(),
        }
    }

    /// Add a node. Returns false if it was already registered.
    pub fn register(&mut self, node: SandboxId) -> bool {
        if self.nodes.contains(&node) {
            return false;
        }
        self.nodes.push(node);
        true
    }

    /// Remove a node. Returns false if it was not registered.
    pub fn deregister(&mut self, node: &SandboxId) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n != node);
        self.nodes.len() != before
    }

    /// Registered nodes in registration order.
    pub fn nodes(&self) -> &[SandboxId] {
        &self.nodes
    }

    pub fn shared_volume(&self) -> &str {
        &self.shared_volume
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A verb applied to every registered node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncVerb {
    Publish,
    Push,
    Pull,
    /// Publish, then push, then pull, each as a full pass over the nodes.
    All,
}

impl SyncVerb {
    /// Single-verb passes this verb expands to, in order.
    pub fn passes(self) -> &'static [SyncVerb] {
        match self {
            SyncVerb::Publish => &[SyncVerb::Publish],
            SyncVerb::Push => &[SyncVerb::Push],
            SyncVerb::Pull => &[SyncVerb::Pull],
            SyncVerb::All => &[SyncVerb::Publish, SyncVerb::Push, SyncVerb::Pull],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncVerb::Publish => "publish",
            SyncVerb::Push => "push",
            SyncVerb::Pull => "pull",
            SyncVerb::All => "all",
        }
    }
}

impl fmt::Display for SyncVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed verb invocation.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: SandboxId,
    pub verb: SyncVerb,
    pub error: SyncError,
}

/// Outcome of a [`run_for_each`] call.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failures: Vec<NodeFailure>,
    /// Set when the loop stopped early on cancellation.
    pub cancelled: bool,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

impl NetDbSync {
    /// Run one single-node verb. `All` runs publish, push and pull in turn,
    /// stopping at the first failure.
    pub async fn run_verb(&self, verb: SyncVerb, node: &SandboxId, volume: &str) -> Result<(), SyncError> {
        match verb {
            SyncVerb::Publish => self.publish_record(node, volume).await.map(drop),
            SyncVerb::Push => self.push_node_db_to_shared(node, volume).await.map(drop),
            SyncVerb::Pull => self.pull_shared_to_node_db(node, volume).await.map(drop),
            SyncVerb::All => {
                self.publish_record(node, volume).await?;
                self.push_node_db_to_shared(node, volume).await?;
                self.pull_shared_to_node_db(node, volume).await?;
                Ok(())
            }
        }
    }
}

/// Apply `verb` to every registered node in order.
///
/// A failing node is logged and recorded, and the loop moves on. `cancel` is
/// checked before each node; a verb already in flight runs to completion.
pub async fn run_for_each(
    sync: &NetDbSync,
    registry: &Registry,
    verb: SyncVerb,
    cancel: &CancellationToken,
) -> SyncReport {
    let mut report = SyncReport::default();
    let volume = registry.shared_volume();

    for &pass in verb.passes() {
        tracing::debug!(verb = %pass, nodes = registry.len(), "Starting pass");
        for node in registry.nodes() {
            if cancel.is_cancelled() {
                tracing::info!(verb = %pass, attempted = report.attempted, "Sync cancelled");
                report.cancelled = true;
                return report;
            }

            report.attempted += 1;
            match sync.run_verb(pass, node, volume).await {
                Ok(()) => report.succeeded += 1,
                Err(error) => {
                    tracing::warn!(
                        node = %node,
                        verb = %pass,
                        code = error.code(),
                        error = %error,
                        "Sync verb failed"
                    );
                    report.failures.push(NodeFailure {
                        node: node.clone(),
                        verb: pass,
                        error,
                    });
                }
            }
        }
    }

    report
}
