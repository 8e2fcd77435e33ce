//! Offline verification of signed license keys.
//!
//! Signed keys use the format: `key/<base64url(payload)>.<base64url(signature)>`
//!
//! The signature covers the signing data `key/<payload_b64>` (the encoded
//! payload string, not the decoded bytes), so the key can be checked without
//! decoding anything first.

use crate::error::{LicenseError, LicenseResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use keyward_crypto::{verify_signature, PublicKey, SignatureAlgorithm};
use serde::de::DeserializeOwned;
use tracing::warn;

/// The only signing scheme supported for offline key verification.
pub const SCHEME_ED25519_SIGN: &str = "ED25519_SIGN";

const KEY_PREFIX: &str = "key/";

/// A signed license key whose signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedKey {
    raw: String,
    payload: Vec<u8>,
}

impl SignedKey {
    /// Verifies `key` under `scheme` with `public_key`.
    ///
    /// # Errors
    ///
    /// - `LicenseKeyMissing` if the key is empty
    /// - `LicenseSchemeMissing` / `LicenseSchemeNotSupported` for the scheme
    /// - `LicenseNotSigned` if the key is not in signed format
    /// - `LicenseKeyNotGenuine` if the signature or encoding is bad
    pub fn verify(key: &str, scheme: Option<&str>, public_key: &PublicKey) -> LicenseResult<Self> {
        let key = key.trim();
        if key.is_empty() {
            return Err(LicenseError::LicenseKeyMissing);
        }

        let scheme = scheme.ok_or(LicenseError::LicenseSchemeMissing)?;
        if scheme != SCHEME_ED25519_SIGN {
            return Err(LicenseError::LicenseSchemeNotSupported(scheme.to_string()));
        }

        let Some(rest) = key.strip_prefix(KEY_PREFIX) else {
            return Err(LicenseError::LicenseNotSigned);
        };
        let Some((payload_b64, signature_b64)) = rest.split_once('.') else {
            return Err(LicenseError::LicenseNotSigned);
        };
        if payload_b64.is_empty() || signature_b64.is_empty() || signature_b64.contains('.') {
            return Err(LicenseError::LicenseNotSigned);
        }

        let signature = decode(signature_b64).ok_or_else(|| {
            warn!("license key rejected: signature is not base64url");
            LicenseError::LicenseKeyNotGenuine
        })?;

        let signing_data = format!("{KEY_PREFIX}{payload_b64}");
        if !verify_signature(
            public_key,
            signing_data.as_bytes(),
            &signature,
            SignatureAlgorithm::Ed25519,
        ) {
            warn!("license key rejected: signature does not verify");
            return Err(LicenseError::LicenseKeyNotGenuine);
        }

        let payload = decode(payload_b64).ok_or_else(|| {
            warn!("license key rejected: payload is not base64url");
            LicenseError::LicenseKeyNotGenuine
        })?;

        Ok(Self {
            raw: key.to_string(),
            payload,
        })
    }

    /// Returns the raw key string.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Returns the decoded payload.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Deserializes the payload as JSON.
    pub fn payload_json<T: DeserializeOwned>(&self) -> LicenseResult<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Decodes base64url with or without padding.
fn decode(s: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(s.trim_end_matches('=')).ok()
}
