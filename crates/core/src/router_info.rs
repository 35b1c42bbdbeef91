//! RouterInfo wire format parsing.
//!
//! A RouterInfo is laid out as:
//! - RouterIdentity: 256-byte public key, 128-byte signing key, certificate
//! - published date (8 bytes, milliseconds since the epoch)
//! - address count (1 byte) followed by that many RouterAddresses
//! - peer size (1 byte) followed by `peer_size * 32` bytes
//! - options mapping
//! - signature, sized by the signing key type from the certificate
//!
//! Only the structure is validated. Signatures are not verified.

use crate::hash::{HASH_LEN, IdentityHash};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Size of the public key area of a router identity.
pub const PUBLIC_KEY_AREA: usize = 256;

/// Size of the signing key area of a router identity.
pub const SIGNING_KEY_AREA: usize = 128;

/// Size of the fixed part of a router identity preceding the certificate.
pub const KEYS_LEN: usize = PUBLIC_KEY_AREA + SIGNING_KEY_AREA;

/// Certificate type code for NULL certificates.
pub const CERT_NULL: u8 = 0;

/// Certificate type code for KEY certificates.
pub const CERT_KEY: u8 = 5;

/// Signing key types that can appear in a KEY certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningKeyType {
    DsaSha1,
    EcdsaSha256P256,
    EcdsaSha384P384,
    EcdsaSha512P521,
    RsaSha2562048,
    RsaSha3843072,
    RsaSha5124096,
    EdDsaSha512Ed25519,
    EdDsaSha512Ed25519ph,
    RedDsaSha512Ed25519,
}

impl SigningKeyType {
    /// Map a certificate signing type code to a known type.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0 => Self::DsaSha1,
            1 => Self::EcdsaSha256P256,
            2 => Self::EcdsaSha384P384,
            3 => Self::EcdsaSha512P521,
            4 => Self::RsaSha2562048,
            5 => Self::RsaSha3843072,
            6 => Self::RsaSha5124096,
            7 => Self::EdDsaSha512Ed25519,
            8 => Self::EdDsaSha512Ed25519ph,
            11 => Self::RedDsaSha512Ed25519,
            _ => return None,
        })
    }

    /// The certificate type code.
    pub fn code(self) -> u16 {
        match self {
            Self::DsaSha1 => 0,
            Self::EcdsaSha256P256 => 1,
            Self::EcdsaSha384P384 => 2,
            Self::EcdsaSha512P521 => 3,
            Self::RsaSha2562048 => 4,
            Self::RsaSha3843072 => 5,
            Self::RsaSha5124096 => 6,
            Self::EdDsaSha512Ed25519 => 7,
            Self::EdDsaSha512Ed25519ph => 8,
            Self::RedDsaSha512Ed25519 => 11,
        }
    }

    /// Length of a signature produced by this key type.
    pub fn signature_len(self) -> usize {
        match self {
            Self::DsaSha1 => 40,
            Self::EcdsaSha256P256 => 64,
            Self::EcdsaSha384P384 => 96,
            Self::EcdsaSha512P521 => 132,
            Self::RsaSha2562048 => 256,
            Self::RsaSha3843072 => 384,
            Self::RsaSha5124096 => 512,
            Self::EdDsaSha512Ed25519
            | Self::EdDsaSha512Ed25519ph
            | Self::RedDsaSha512Ed25519 => 64,
        }
    }
}

/// A transport address published by a router.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouterAddress {
    pub cost: u8,
    pub expiration: u64,
    pub transport_style: String,
    pub options: BTreeMap<String, String>,
}

/// Parsed structure of a RouterInfo.
#[derive(Clone, Debug)]
pub struct RouterInfo {
    identity_hash: IdentityHash,
    identity_len: usize,
    signing_key_type: SigningKeyType,
    published_ms: u64,
    addresses: Vec<RouterAddress>,
    options: BTreeMap<String, String>,
    signed_len: usize,
}

impl RouterInfo {
    /// Parse a RouterInfo from its serialized form.
    ///
    /// Bytes following the signature are ignored.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);

        reader.skip(KEYS_LEN, "router identity keys")?;
        let cert_type = reader.u8("certificate type")?;
        let cert_len = reader.u16("certificate length")? as usize;
        let cert_payload = reader.take(cert_len, "certificate payload")?;
        let signing_key_type = match cert_type {
            CERT_KEY => {
                if cert_payload.len() < 4 {
                    return Err(Error::RecordMalformed(format!(
                        "key certificate payload too short: {} bytes",
                        cert_payload.len()
                    )));
                }
                let code = u16::from_be_bytes([cert_payload[0], cert_payload[1]]);
                SigningKeyType::from_code(code).ok_or_else(|| {
                    Error::RecordMalformed(format!("unknown signing key type {code}"))
                })?
            }
            // Identities without a key certificate use the original DSA keys.
            CERT_NULL => SigningKeyType::DsaSha1,
            other => {
                return Err(Error::RecordMalformed(format!(
                    "unsupported certificate type {other}"
                )));
            }
        };
        let identity_len = reader.position();
        let identity_hash = IdentityHash::compute(&data[..identity_len]);

        let published_ms = reader.u64("published date")?;

        let address_count = reader.u8("address count")?;
        let mut addresses = Vec::with_capacity(address_count as usize);
        for _ in 0..address_count {
            let cost = reader.u8("address cost")?;
            let expiration = reader.u64("address expiration")?;
            let transport_style = reader.string("transport style")?;
            let options = reader.mapping("address options")?;
            addresses.push(RouterAddress {
                cost,
                expiration,
                transport_style,
                options,
            });
        }

        let peer_size = reader.u8("peer size")? as usize;
        reader.skip(peer_size * HASH_LEN, "peer hashes")?;

        let options = reader.mapping("router options")?;
        let signed_len = reader.position();
        reader.skip(signing_key_type.signature_len(), "signature")?;

        Ok(Self {
            identity_hash,
            identity_len,
            signing_key_type,
            published_ms,
            addresses,
            options,
            signed_len,
        })
    }

    /// SHA-256 of the router identity block.
    pub fn identity_hash(&self) -> IdentityHash {
        self.identity_hash
    }

    /// Length of the router identity block, certificate included.
    pub fn identity_len(&self) -> usize {
        self.identity_len
    }

    pub fn signing_key_type(&self) -> SigningKeyType {
        self.signing_key_type
    }

    /// Publication time in milliseconds since the Unix epoch.
    pub fn published_ms(&self) -> u64 {
        self.published_ms
    }

    pub fn addresses(&self) -> &[RouterAddress] {
        &self.addresses
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Length of the signed portion (everything before the signature).
    pub fn signed_len(&self) -> usize {
        self.signed_len
    }

    /// Total encoded length including the signature.
    pub fn encoded_len(&self) -> usize {
        self.signed_len + self.signing_key_type.signature_len()
    }
}

/// Bounds-checked cursor over the serialized record.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(Error::RecordMalformed(format!(
                "truncated {what}: need {len} bytes at offset {}, have {}",
                self.pos,
                self.data.len() - self.pos
            )));
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize, what: &str) -> Result<()> {
        self.take(len, what).map(|_| ())
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        let b = self.take(8, what)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    /// One-byte length prefixed string.
    fn string(&mut self, what: &str) -> Result<String> {
        let len = self.u8(what)? as usize;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::RecordMalformed(format!("{what} is not valid UTF-8")))
    }

    /// Two-byte length prefixed sequence of `key=value;` pairs.
    fn mapping(&mut self, what: &str) -> Result<BTreeMap<String, String>> {
        let len = self.u16(what)? as usize;
        let body = self.take(len, what)?;
        let mut inner = Reader::new(body);
        let mut map = BTreeMap::new();
        while inner.pos < body.len() {
            let key = inner.string(what)?;
            if inner.u8(what)? != b'=' {
                return Err(Error::RecordMalformed(format!("{what}: expected '='")));
            }
            let value = inner.string(what)?;
            if inner.u8(what)? != b';' {
                return Err(Error::RecordMalformed(format!("{what}: expected ';'")));
            }
            map.insert(key, value);
        }
        Ok(map)
    }
}
