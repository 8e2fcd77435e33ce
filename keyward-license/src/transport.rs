//! The transport collaborator.
//!
//! A transport turns a [`Request`] into a [`SignedEnvelope`]. It knows
//! nothing about authenticity; everything it returns is untrusted until the
//! [`ResponseAuthenticator`](crate::ResponseAuthenticator) accepts it.

use crate::envelope::SignedEnvelope;
use crate::error::LicenseResult;
use crate::machine::EntityKind;
use async_trait::async_trait;

/// A request to the licensing API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Validate the license key, optionally scoped.
    Validate {
        license_key: String,
        fingerprint: Option<String>,
        product: Option<String>,
    },
    /// Activate a machine or process.
    Activate {
        license_id: String,
        kind: EntityKind,
        fingerprint: String,
    },
    /// Deactivate a machine or process.
    Deactivate {
        license_id: String,
        kind: EntityKind,
        fingerprint: String,
    },
    /// Send a heartbeat ping.
    Ping {
        license_id: String,
        kind: EntityKind,
        fingerprint: String,
    },
    /// Look up the latest release newer than `current_version`.
    Upgrade {
        product: Option<String>,
        current_version: String,
    },
}

impl Request {
    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validate { .. } => "validate",
            Self::Activate { .. } => "activate",
            Self::Deactivate { .. } => "deactivate",
            Self::Ping { .. } => "ping",
            Self::Upgrade { .. } => "upgrade",
        }
    }
}

/// Sends requests and returns the raw signed response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request`.
    ///
    /// API-level errors are returned as envelopes too, so they are
    /// authenticated like any other response. `Err` is for failures to
    /// obtain a response at all.
    async fn send(&self, request: Request) -> LicenseResult<SignedEnvelope>;
}
