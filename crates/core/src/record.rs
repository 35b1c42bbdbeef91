//! Identity records as exchanged through the shared netDb.

use crate::Result;
use crate::hash::IdentityHash;
use crate::router_info::RouterInfo;
use crate::shard::{ShardKey, ShardScheme};
use bytes::Bytes;

/// Filename prefix used by the daemons for stored RouterInfos.
pub const FILENAME_PREFIX: &str = "routerInfo-";

/// Filename suffix used by the daemons for stored RouterInfos.
pub const FILENAME_SUFFIX: &str = ".dat";

/// Canonical netDb filename for a given identity hash.
pub fn filename_for(hash: &IdentityHash) -> String {
    format!("{FILENAME_PREFIX}{}{FILENAME_SUFFIX}", hash.to_base64())
}

/// A node's RouterInfo together with its derived content address.
///
/// Built fresh from the raw bytes on every extraction and never mutated.
#[derive(Clone, Debug)]
pub struct IdentityRecord {
    raw: Bytes,
    router_info: RouterInfo,
    encoded_hash: String,
    filename: String,
}

impl IdentityRecord {
    /// Parse raw RouterInfo bytes and derive hash and filename.
    pub fn from_bytes(raw: impl Into<Bytes>) -> Result<Self> {
        let raw = raw.into();
        let router_info = RouterInfo::parse(&raw)?;
        let hash = router_info.identity_hash();
        Ok(Self {
            encoded_hash: hash.to_base64(),
            filename: filename_for(&hash),
            raw,
            router_info,
        })
    }

    /// The bytes exactly as produced by the node.
    pub fn raw_bytes(&self) -> &Bytes {
        &self.raw
    }

    pub fn identity_hash(&self) -> IdentityHash {
        self.router_info.identity_hash()
    }

    /// I2P base64 form of the identity hash.
    pub fn encoded_hash(&self) -> &str {
        &self.encoded_hash
    }

    /// `routerInfo-<encoded hash>.dat`
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn router_info(&self) -> &RouterInfo {
        &self.router_info
    }

    /// Shard this record belongs to under the given scheme.
    pub fn shard(&self, scheme: ShardScheme) -> Result<ShardKey> {
        scheme.shard_for(&self.encoded_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router_info::testing::router_info;

    #[test]
    fn test_filename_derivation() {
        let raw = router_info(4);
        let record = IdentityRecord::from_bytes(raw.clone()).unwrap();
        let expected = IdentityHash::compute(&raw[..record.router_info().identity_len()]);

        assert_eq!(record.identity_hash(), expected);
        assert_eq!(record.encoded_hash(), expected.to_base64());
        assert_eq!(
            record.filename(),
            format!("routerInfo-{}.dat", expected.to_base64())
        );
        assert_eq!(record.raw_bytes().as_ref(), raw.as_slice());
    }

    #[test]
    fn test_filename_for_sequential_hash() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        assert_eq!(
            filename_for(&IdentityHash::from_bytes(bytes)),
            "routerInfo-AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=.dat"
        );
    }

    #[test]
    fn test_malformed_bytes_rejected() {
        assert!(matches!(
            IdentityRecord::from_bytes(Bytes::from_static(b"not a router info")),
            Err(crate::Error::RecordMalformed(_))
        ));
    }
}
