//! SHA-256 content digests.
//!
//! Digests travel in the `sha-256=<base64>` form used by the HTTP `Digest`
//! header. Comparison is constant-time.

use crate::error::{CryptoError, CryptoResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Size of a SHA-256 digest in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Prefix of the encoded digest header value.
const DIGEST_PREFIX: &str = "sha-256=";

/// A SHA-256 digest of some content.
#[derive(Clone, Copy, Debug)]
pub struct ContentDigest([u8; DIGEST_SIZE]);

impl ContentDigest {
    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Encodes as a `sha-256=<base64>` header value.
    pub fn to_header(&self) -> String {
        format!("{DIGEST_PREFIX}{}", STANDARD.encode(self.0))
    }

    /// Parses a `sha-256=<base64>` header value.
    ///
    /// The algorithm label is matched case-insensitively.
    pub fn from_header(value: &str) -> CryptoResult<Self> {
        let value = value.trim();
        let Some((label, encoded)) = value.split_once('=') else {
            return Err(CryptoError::InvalidDigest("missing algorithm label".to_string()));
        };
        if !label.eq_ignore_ascii_case("sha-256") {
            return Err(CryptoError::InvalidDigest(format!(
                "unsupported digest algorithm: {label}"
            )));
        }

        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CryptoError::Encoding(format!("invalid digest base64: {e}")))?;
        let bytes: [u8; DIGEST_SIZE] = bytes.try_into().map_err(|v: Vec<u8>| {
            CryptoError::InvalidDigest(format!("expected {DIGEST_SIZE} bytes, got {}", v.len()))
        })?;

        Ok(Self(bytes))
    }

    /// Returns true if `content` hashes to this digest.
    pub fn matches(&self, content: &[u8]) -> bool {
        let recomputed = digest(content);
        self.0.ct_eq(&recomputed.0).into()
    }
}

impl PartialEq for ContentDigest {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for ContentDigest {}

/// Computes the SHA-256 digest of `content`.
pub fn digest(content: &[u8]) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(content);
    ContentDigest(hasher.finalize().into())
}
