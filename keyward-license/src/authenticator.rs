//! Response authentication.
//!
//! A response body is only handed back once three checks pass, in order:
//!
//! 1. the digest is present and matches the body,
//! 2. the signature is present and verifies over the signing string
//!    (which binds the digest and the date),
//! 3. the date is present, parseable, and inside the freshness window.
//!
//! The first failure short-circuits. Nothing from the body is read before
//! all three succeed.

use crate::envelope::{parse_http_date, FreshnessContext, SignedEnvelope};
use crate::error::{LicenseError, LicenseResult};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use keyward_crypto::{verify_signature, ContentDigest, PublicKey};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// A response body that passed authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// The exact body bytes that were verified.
    pub body: Vec<u8>,
    /// The signed response date.
    pub signed_at: DateTime<Utc>,
}

impl Authenticated {
    /// Deserializes the verified body.
    pub fn json<T: DeserializeOwned>(&self) -> LicenseResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Returns the verified body.
    #[must_use]
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Verifies signed responses against a public key.
#[derive(Debug, Clone)]
pub struct ResponseAuthenticator {
    public_key: PublicKey,
}

impl ResponseAuthenticator {
    /// Creates an authenticator for `public_key`.
    #[must_use]
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }

    /// Returns the verification key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Authenticates `envelope`, consuming it.
    ///
    /// # Errors
    ///
    /// One of the `Response*` authenticity errors; see the module docs for
    /// the order in which they are checked.
    pub fn authenticate(
        &self,
        envelope: SignedEnvelope,
        freshness: &FreshnessContext,
    ) -> LicenseResult<Authenticated> {
        // 1. Digest
        let digest_header = envelope
            .digest
            .as_deref()
            .ok_or(LicenseError::ResponseDigestMissing)
            .inspect_err(|_| warn!("response rejected: digest missing"))?;
        let digest = ContentDigest::from_header(digest_header).map_err(|e| {
            warn!("response rejected: malformed digest: {e}");
            LicenseError::ResponseDigestInvalid
        })?;
        if !digest.matches(&envelope.body) {
            warn!("response rejected: digest does not match body");
            return Err(LicenseError::ResponseDigestInvalid);
        }

        // 2. Signature over (request-target, host,) date and digest
        let signature_b64 = envelope
            .signature
            .as_deref()
            .ok_or(LicenseError::ResponseSignatureMissing)
            .inspect_err(|_| warn!("response rejected: signature missing"))?;
        let signature = STANDARD.decode(signature_b64.trim()).map_err(|e| {
            warn!("response rejected: signature is not base64: {e}");
            LicenseError::ResponseSignatureInvalid
        })?;
        let date_header = envelope.date.as_deref().unwrap_or_default();
        let signing_string = envelope.signing_string(date_header, digest_header);
        if !verify_signature(
            &self.public_key,
            signing_string.as_bytes(),
            &signature,
            envelope.algorithm,
        ) {
            warn!("response rejected: signature does not verify");
            return Err(LicenseError::ResponseSignatureInvalid);
        }

        // 3. Date
        if envelope.date.is_none() {
            warn!("response rejected: date missing");
            return Err(LicenseError::ResponseDateInvalid);
        }
        let signed_at = parse_http_date(date_header)
            .inspect_err(|_| warn!("response rejected: unparseable date {date_header:?}"))?;
        freshness
            .check(signed_at)
            .inspect_err(|e| warn!("response rejected: {e}"))?;

        debug!(bytes = envelope.body.len(), "response authenticated");
        Ok(Authenticated {
            body: envelope.body,
            signed_at,
        })
    }
}
