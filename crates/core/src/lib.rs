//! Core domain types for the I2P testnet netDb synchronization engine.
//!
//! This crate defines the data model shared by the other crates:
//! - Identity hashes and their I2P base64 encoding
//! - RouterInfo parsing and identity records
//! - The netDb sharding scheme
//! - Configuration

pub mod config;
pub mod error;
pub mod hash;
pub mod record;
pub mod router_info;
pub mod shard;

pub use error::{Error, Result};
pub use hash::{ENCODED_HASH_LEN, HASH_LEN, IdentityHash};
pub use record::{IdentityRecord, filename_for};
pub use router_info::{RouterAddress, RouterInfo, SigningKeyType};
pub use shard::{ShardKey, ShardScheme};

/// Directory name of the netDb inside the shared volume.
pub const SHARED_NETDB_DIR: &str = "netDb";
