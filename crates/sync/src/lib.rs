//! NetDb synchronization for the I2P testnet.
//!
//! Moves RouterInfo records between router sandboxes through a shared
//! staging volume:
//! - `publish`: a node's own record into `netDb/<shard>/` of the volume
//! - `push`: a node's whole netDb into the volume
//! - `pull`: the volume's netDb into a node
//!
//! All writes merge; nothing is ever deleted.

pub mod error;
pub mod orchestrator;
pub mod registry;

pub use error::{SyncError, SyncResult};
pub use orchestrator::{NetDbSync, PublishedRecord};
pub use registry::{NodeFailure, Registry, SyncReport, SyncVerb, run_for_each};
