//! Activated machines and processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Whether an activation is for a machine or a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A machine (device) activation.
    Machine,
    /// A process activation.
    Process,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Machine => f.write_str("machine"),
            Self::Process => f.write_str("process"),
        }
    }
}

/// Liveness of a monitored entity.
///
/// `Alive → Degraded → Dead`; a successful ping returns to `Alive` from any
/// state except `Dead`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatState {
    /// Last ping succeeded (or none has been attempted yet).
    Alive,
    /// One or more consecutive pings were missed.
    Degraded,
    /// Declared dead. Reactivation requires a fresh activation.
    Dead,
}

impl HeartbeatState {
    /// Returns true unless the entity is dead.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Dead)
    }
}

/// An activated machine or process.
///
/// Values handed out by the ledger are snapshots; the ledger owns the
/// authoritative entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    /// Activation ID (local UUID until the server assigns one).
    pub id: String,
    /// Machine or process.
    pub kind: EntityKind,
    /// Caller-supplied fingerprint, unique per license and kind.
    pub fingerprint: String,
    /// License this activation belongs to.
    pub license_id: String,
    /// When the activation was recorded.
    pub activated_at: DateTime<Utc>,
    /// When the last successful heartbeat was recorded.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Current liveness.
    pub heartbeat: HeartbeatState,
}

impl Machine {
    pub(crate) fn new(kind: EntityKind, license_id: &str, fingerprint: &str) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            fingerprint: fingerprint.to_string(),
            license_id: license_id.to_string(),
            activated_at: Utc::now(),
            last_heartbeat_at: None,
            heartbeat: HeartbeatState::Alive,
        }
    }

    /// Returns true for machine activations.
    #[must_use]
    pub fn is_machine(&self) -> bool {
        self.kind == EntityKind::Machine
    }
}
