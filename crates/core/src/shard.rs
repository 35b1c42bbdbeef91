//! Mapping from encoded identity hashes to netDb bucket directories.

use crate::Result;
use crate::hash::IdentityHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Directory scheme for netDb buckets.
///
/// Both schemes produce two-character keys. `Lettered` matches the on-disk
/// layout i2pd reads (`netDb/rA/...`), which is what lets a pulled shared
/// store be used by a node without rewriting.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ShardScheme {
    /// Constant `r` followed by the first character of the encoded hash.
    #[default]
    Lettered,
    /// First two characters of the encoded hash.
    Prefix,
}

impl ShardScheme {
    /// Bucket for an encoded identity hash.
    ///
    /// Fails with `InvalidHash` unless `encoded_hash` is a complete I2P
    /// base64 identity hash.
    pub fn shard_for(self, encoded_hash: &str) -> Result<ShardKey> {
        IdentityHash::from_base64(encoded_hash)?;
        let key = match self {
            Self::Lettered => format!("r{}", &encoded_hash[..1]),
            Self::Prefix => encoded_hash[..2].to_string(),
        };
        Ok(ShardKey(key))
    }
}

impl fmt::Display for ShardScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lettered => write!(f, "lettered"),
            Self::Prefix => write!(f, "prefix"),
        }
    }
}

/// Name of a bucket directory under the shared netDb root.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey(String);

impl ShardKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShardKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
