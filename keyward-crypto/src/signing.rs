//! Asymmetric signature verification.
//!
//! Only Ed25519 is implemented. Any other algorithm name fails closed at
//! parse time, so a caller can never reach a "verified" result through an
//! algorithm this crate does not understand.

use crate::error::{CryptoError, CryptoResult};
use ed25519_dalek::{
    Signature as DalekSignature, Signer as _, SigningKey as DalekSigningKey, Verifier as _,
    VerifyingKey as DalekVerifyingKey,
};
use std::fmt;
use std::str::FromStr;

/// Size of an Ed25519 public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Signature algorithms understood by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// Ed25519 (RFC 8032).
    Ed25519,
}

impl SignatureAlgorithm {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("ed25519") {
            Ok(Self::Ed25519)
        } else {
            Err(CryptoError::UnsupportedAlgorithm(s.to_string()))
        }
    }
}

/// An Ed25519 verification key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(DalekVerifyingKey);

impl PublicKey {
    /// Creates a public key from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.is_empty() {
            return Err(CryptoError::InvalidPublicKey("key is empty".to_string()));
        }
        let bytes: [u8; PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            })?;

        DalekVerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    /// Parses a hex-encoded public key (64 hex characters).
    pub fn from_hex(encoded: &str) -> CryptoResult<Self> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(CryptoError::InvalidPublicKey("key is empty".to_string()));
        }
        let bytes = hex::decode(encoded)
            .map_err(|e| CryptoError::Encoding(format!("invalid public key hex: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Returns the raw key bytes.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Returns the key as lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.to_hex()).finish()
    }
}

/// An Ed25519 signing key.
///
/// The verifying side never needs this; it exists so issuers and test
/// fixtures can produce material the verifier accepts.
pub struct SigningKey(DalekSigningKey);

impl SigningKey {
    /// Creates a signing key from a raw 32-byte secret.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self(DalekSigningKey::from_bytes(bytes))
    }

    /// Signs a message and returns the raw signature bytes.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.0.sign(message).to_bytes()
    }

    /// Returns the matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Verifies `signature` over `message` with `public_key`.
///
/// Returns false for malformed signatures as well as mismatches.
pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature: &[u8],
    algorithm: SignatureAlgorithm,
) -> bool {
    match algorithm {
        SignatureAlgorithm::Ed25519 => {
            let Ok(signature) = DalekSignature::from_slice(signature) else {
                return false;
            };
            public_key.0.verify(message, &signature).is_ok()
        }
    }
}
