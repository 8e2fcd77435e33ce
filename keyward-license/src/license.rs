//! Verified licenses and their entitlements.

use crate::api::LicenseData;
use crate::error::LicenseResult;
use crate::key::SignedKey;
use crate::machine::Machine;
use chrono::{DateTime, Utc};
use keyward_crypto::PublicKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The current status of a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseStatus {
    /// License is valid and active.
    #[serde(alias = "EXPIRING", alias = "INACTIVE")]
    Active,
    /// License is suspended.
    #[serde(alias = "BANNED")]
    Suspended,
    /// License has expired.
    Expired,
    /// License is valid but not activated for the requested fingerprint.
    NotActivated,
}

impl LicenseStatus {
    /// Returns true if the license allows full usage.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// A named capability granted by a license.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Entitlement {
    /// Machine-readable code, e.g. `PRO_FEATURE`.
    pub code: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
}

impl Entitlement {
    /// Creates an entitlement with just a code.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: None,
        }
    }
}

/// A license built only from authenticated data.
///
/// Licenses are never mutated from untrusted input; a status change means a
/// new `License` from a fresh, re-verified response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    /// License ID.
    pub id: String,
    /// License key.
    pub key: String,
    /// Display name.
    pub name: Option<String>,
    /// Signing scheme of the key, if the key is signed.
    pub scheme: Option<String>,
    /// Status as of `signed_at`.
    pub status: LicenseStatus,
    /// When the license expires.
    pub expiry: Option<DateTime<Utc>>,
    /// Server-side machine limit.
    pub max_machines: Option<u32>,
    /// Server-side process limit.
    pub max_processes: Option<u32>,
    /// Whether activations must send heartbeats.
    pub require_heartbeat: bool,
    /// When the data this license was built from was signed.
    pub signed_at: DateTime<Utc>,
    entitlements: BTreeSet<Entitlement>,
    machines: Vec<Machine>,
}

impl License {
    pub(crate) fn from_data(
        data: LicenseData,
        status: LicenseStatus,
        signed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: data.id,
            key: data.key,
            name: data.name,
            scheme: data.scheme,
            status,
            expiry: data.expiry,
            max_machines: data.max_machines,
            max_processes: data.max_processes,
            require_heartbeat: data.require_heartbeat,
            signed_at,
            entitlements: data.entitlements.into_iter().collect(),
            machines: Vec::new(),
        }
    }

    pub(crate) fn with_machines(mut self, machines: Vec<Machine>) -> Self {
        self.machines = machines;
        self
    }

    /// Returns the activations recorded for this license when it was built.
    #[must_use]
    pub fn machines(&self) -> &[Machine] {
        &self.machines
    }

    /// Returns true if `fingerprint` is among the recorded activations.
    #[must_use]
    pub fn has_machine(&self, fingerprint: &str) -> bool {
        self.machines.iter().any(|m| m.fingerprint == fingerprint)
    }

    /// Returns the license's entitlements.
    #[must_use]
    pub fn entitlements(&self) -> &BTreeSet<Entitlement> {
        &self.entitlements
    }

    /// Returns true if the license grants `code`.
    #[must_use]
    pub fn has_entitlement(&self, code: &str) -> bool {
        self.entitlements.iter().any(|e| e.code == code)
    }

    /// Returns true if the license's expiry has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|exp| exp <= now)
    }

    /// Verifies the license key offline as a signed key.
    ///
    /// # Errors
    ///
    /// See [`SignedKey::verify`].
    pub fn verify_key(&self, public_key: &PublicKey) -> LicenseResult<SignedKey> {
        SignedKey::verify(&self.key, self.scheme.as_deref(), public_key)
    }
}
