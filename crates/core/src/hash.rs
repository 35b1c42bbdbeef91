//! Identity hash type and the I2P base64 encoding.

use base64::Engine;
use base64::alphabet::Alphabet;
use base64::engine::general_purpose::{GeneralPurpose, PAD};
use sha2::{Digest, Sha256};
use std::fmt;

/// I2P replaces `+` and `/` with `-` and `~` so encoded hashes are safe in filenames.
const I2P_ALPHABET: Alphabet =
    match Alphabet::new("ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-~") {
        Ok(alphabet) => alphabet,
        Err(_) => panic!("invalid I2P base64 alphabet"),
    };

/// Padded base64 engine over the I2P alphabet.
pub const I2P_BASE64: GeneralPurpose = GeneralPurpose::new(&I2P_ALPHABET, PAD);

/// Length of an identity hash in bytes.
pub const HASH_LEN: usize = 32;

/// Length of an encoded identity hash (32 bytes, padded base64).
pub const ENCODED_HASH_LEN: usize = 44;

/// SHA-256 digest of a router identity, used as the content address of its RouterInfo.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityHash([u8; HASH_LEN]);

impl IdentityHash {
    /// Create an IdentityHash from raw bytes.
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Compute the SHA-256 hash of a serialized router identity.
    pub fn compute(identity: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identity);
        Self(hasher.finalize().into())
    }

    /// Parse from the I2P base64 form.
    ///
    /// Rejects anything that is not exactly [`ENCODED_HASH_LEN`] characters of
    /// the I2P alphabet decoding to [`HASH_LEN`] bytes.
    pub fn from_base64(s: &str) -> crate::Result<Self> {
        if s.len() != ENCODED_HASH_LEN {
            return Err(crate::Error::InvalidHash(format!(
                "expected {ENCODED_HASH_LEN} base64 chars, got {}",
                s.len()
            )));
        }
        let bytes = I2P_BASE64
            .decode(s)
            .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            crate::Error::InvalidHash(format!("expected {HASH_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Encode with the I2P base64 alphabet.
    pub fn to_base64(&self) -> String {
        I2P_BASE64.encode(self.0)
    }
}

impl fmt::Debug for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityHash({})", &self.to_base64()[..12])
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}
