//! Signed response envelopes and freshness windows.
//!
//! An envelope is the raw body plus the metadata needed to authenticate it:
//! a base64 signature, a `sha-256=` digest and the HTTP `Date`. The
//! signature covers a signing string that binds the digest and the date
//! (and the request target when the transport knows it):
//!
//! ```text
//! (request-target): get /v1/accounts/acme/licenses/actions/validate-key
//! host: api.keygen.sh
//! date: Wed, 09 Jun 2021 16:08:15 GMT
//! digest: sha-256=...
//! ```

use crate::error::{LicenseError, LicenseResult};
use chrono::{DateTime, TimeDelta, Utc};
use keyward_crypto::SignatureAlgorithm;
use std::time::Duration;

/// The request a response was produced for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    /// Lowercase HTTP method.
    pub method: String,
    /// Request path including any query string.
    pub path: String,
    /// Host the request was sent to.
    pub host: String,
}

impl RequestTarget {
    /// Creates a request target, lowercasing the method.
    pub fn new(method: &str, path: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            method: method.to_ascii_lowercase(),
            path: path.into(),
            host: host.into(),
        }
    }
}

/// A response body with its authenticity metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    /// Raw response body.
    pub body: Vec<u8>,
    /// Base64 signature over the signing string.
    pub signature: Option<String>,
    /// `sha-256=<base64>` digest of the body.
    pub digest: Option<String>,
    /// HTTP date the response was signed at.
    pub date: Option<String>,
    /// Signature algorithm.
    pub algorithm: SignatureAlgorithm,
    /// Request the response answers, if known.
    pub request_target: Option<RequestTarget>,
}

impl SignedEnvelope {
    /// Creates an envelope with no authenticity metadata.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            signature: None,
            digest: None,
            date: None,
            algorithm: SignatureAlgorithm::Ed25519,
            request_target: None,
        }
    }

    /// Sets the signature.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Sets the digest header value.
    #[must_use]
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Sets the date header value.
    #[must_use]
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Sets the request target.
    #[must_use]
    pub fn with_request_target(mut self, target: RequestTarget) -> Self {
        self.request_target = Some(target);
        self
    }

    /// Builds the string the signature covers.
    #[must_use]
    pub fn signing_string(&self, date: &str, digest: &str) -> String {
        signing_string(self.request_target.as_ref(), date, digest)
    }
}

/// Builds the signing string for `date` and `digest`.
///
/// Issuers use this to sign; the authenticator uses it to verify.
#[must_use]
pub fn signing_string(target: Option<&RequestTarget>, date: &str, digest: &str) -> String {
    match target {
        Some(t) => format!(
            "(request-target): {} {}\nhost: {}\ndate: {date}\ndigest: {digest}",
            t.method, t.path, t.host
        ),
        None => format!("date: {date}\ndigest: {digest}"),
    }
}

/// Formats a timestamp as an HTTP date (`Wed, 09 Jun 2021 16:08:15 GMT`).
#[must_use]
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parses an HTTP date.
pub fn parse_http_date(value: &str) -> LicenseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| LicenseError::ResponseDateInvalid)
}

/// The window a response date must fall in: `[now - max_age, now + skew]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessContext {
    now: DateTime<Utc>,
    max_age: Duration,
    skew_tolerance: Duration,
}

impl FreshnessContext {
    /// Creates a window anchored at the current time.
    #[must_use]
    pub fn new(max_age: Duration, skew_tolerance: Duration) -> Self {
        Self::at(Utc::now(), max_age, skew_tolerance)
    }

    /// Creates a window anchored at `now`.
    #[must_use]
    pub fn at(now: DateTime<Utc>, max_age: Duration, skew_tolerance: Duration) -> Self {
        Self {
            now,
            max_age,
            skew_tolerance,
        }
    }

    /// Returns the anchor time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Checks `server_time` against the window.
    ///
    /// # Errors
    ///
    /// `ResponseDateTooOld` before the window, `ResponseDateInFuture` after it.
    pub fn check(&self, server_time: DateTime<Utc>) -> LicenseResult<()> {
        let max_age = delta(self.max_age);
        let skew = delta(self.skew_tolerance);

        let oldest = self.now.checked_sub_signed(max_age);
        let newest = self.now.checked_add_signed(skew);

        if oldest.is_some_and(|oldest| server_time < oldest) {
            return Err(LicenseError::ResponseDateTooOld {
                date: http_date(server_time),
                max_age_secs: max_age.num_seconds(),
            });
        }
        if newest.is_some_and(|newest| server_time > newest) {
            return Err(LicenseError::ResponseDateInFuture {
                date: http_date(server_time),
                skew_secs: skew.num_seconds(),
            });
        }
        Ok(())
    }
}

fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}
