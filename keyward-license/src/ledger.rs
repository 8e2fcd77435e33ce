//! The activation ledger.
//!
//! The ledger is the single source of truth for which fingerprints are
//! activated. Every read-check-write (duplicate check + limit check + insert,
//! lookup + heartbeat transition) happens under one lock, so concurrent
//! activations can never both pass a count check and concurrent heartbeat
//! transitions can never declare an entity dead twice.
//!
//! Dead entities stay as tombstones: they do not count towards limits, a
//! fresh activation replaces them, and lookups report `HeartbeatDead`.

use crate::error::{LicenseError, LicenseResult};
use crate::machine::{EntityKind, HeartbeatState, Machine};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Identifies one ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryKey {
    pub license_id: String,
    pub kind: EntityKind,
    pub fingerprint: String,
}

impl EntryKey {
    pub fn new(license_id: &str, kind: EntityKind, fingerprint: &str) -> Self {
        Self {
            license_id: license_id.to_string(),
            kind,
            fingerprint: fingerprint.to_string(),
        }
    }
}

/// Live-entry limits per license. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerLimits {
    pub max_machines: Option<u32>,
    pub max_processes: Option<u32>,
}

impl LedgerLimits {
    /// Returns the limit for `kind`.
    #[must_use]
    pub fn for_kind(&self, kind: EntityKind) -> Option<u32> {
        match kind {
            EntityKind::Machine => self.max_machines,
            EntityKind::Process => self.max_processes,
        }
    }

    /// The stricter of two limit sets.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        fn pick(a: Option<u32>, b: Option<u32>) -> Option<u32> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        }
        Self {
            max_machines: pick(self.max_machines, other.max_machines),
            max_processes: pick(self.max_processes, other.max_processes),
        }
    }
}

/// Result of recording a missed heartbeat cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissOutcome {
    /// Still live, now degraded.
    Degraded { misses: u32 },
    /// This miss killed the entity.
    Dead { misses: u32 },
    /// The entity was already dead.
    AlreadyDead,
    /// The entry no longer exists.
    Gone,
}

#[derive(Debug)]
struct Entry {
    machine: Machine,
    misses: u32,
    last_alive: Instant,
    /// Set while the server is being told to release the entry.
    releasing: bool,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.machine.heartbeat.is_live()
    }

    fn dead_error(&self) -> LicenseError {
        LicenseError::HeartbeatDead {
            kind: self.machine.kind,
            fingerprint: self.machine.fingerprint.clone(),
            misses: self.misses,
        }
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<EntryKey, Entry>,
    license_limits: HashMap<String, LedgerLimits>,
}

impl LedgerState {
    fn live_count(&self, license_id: &str, kind: EntityKind) -> u32 {
        let n = self
            .entries
            .iter()
            .filter(|(k, e)| k.license_id == license_id && k.kind == kind && e.is_live())
            .count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }
}

/// In-memory registry of activated machines and processes.
#[derive(Debug, Default)]
pub struct ActivationLedger {
    limits: LedgerLimits,
    state: Mutex<LedgerState>,
}

impl ActivationLedger {
    /// Creates a ledger enforcing `limits` for every license.
    #[must_use]
    pub fn new(limits: LedgerLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(LedgerState::default()),
        }
    }

    // Every critical section leaves the map consistent, so a poisoned lock
    // is still safe to use.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records server-side limits for a license. The stricter of these and
    /// the configured limits applies.
    pub fn set_license_limits(&self, license_id: &str, limits: LedgerLimits) {
        self.lock()
            .license_limits
            .insert(license_id.to_string(), limits);
    }

    /// Returns the limits in force for `license_id`.
    #[must_use]
    pub fn limits_for(&self, license_id: &str) -> LedgerLimits {
        let state = self.lock();
        self.effective_limits(&state, license_id)
    }

    fn effective_limits(&self, state: &LedgerState, license_id: &str) -> LedgerLimits {
        match state.license_limits.get(license_id) {
            Some(server) => self.limits.min(*server),
            None => self.limits,
        }
    }

    /// Activates `fingerprint` for `license_id`.
    ///
    /// # Errors
    ///
    /// - `MachineAlreadyActivated` / `FingerprintTaken` if a live entry exists
    /// - `MachineLimitExceeded` / `ProcessLimitExceeded` if the license is full
    pub fn activate(
        &self,
        kind: EntityKind,
        license_id: &str,
        fingerprint: &str,
    ) -> LicenseResult<Machine> {
        let key = EntryKey::new(license_id, kind, fingerprint);
        let mut state = self.lock();

        if state.entries.get(&key).is_some_and(Entry::is_live) {
            let fingerprint = fingerprint.to_string();
            return Err(match kind {
                EntityKind::Machine => LicenseError::MachineAlreadyActivated { fingerprint },
                EntityKind::Process => LicenseError::FingerprintTaken { fingerprint },
            });
        }

        if let Some(limit) = self.effective_limits(&state, license_id).for_kind(kind) {
            if state.live_count(license_id, kind) >= limit {
                return Err(match kind {
                    EntityKind::Machine => LicenseError::MachineLimitExceeded { limit },
                    EntityKind::Process => LicenseError::ProcessLimitExceeded { limit },
                });
            }
        }

        let machine = Machine::new(kind, license_id, fingerprint);
        state.entries.insert(
            key,
            Entry {
                machine: machine.clone(),
                misses: 0,
                last_alive: Instant::now(),
                releasing: false,
            },
        );
        info!("Activated {kind} {fingerprint} for license {license_id}");
        Ok(machine)
    }

    /// Removes the entry for `fingerprint`.
    ///
    /// # Errors
    ///
    /// `MachineNotFound` / `ProcessNotFound` if there is no live entry. A
    /// second deactivation of the same fingerprint always fails.
    pub fn deactivate(
        &self,
        kind: EntityKind,
        license_id: &str,
        fingerprint: &str,
    ) -> LicenseResult<Machine> {
        let key = EntryKey::new(license_id, kind, fingerprint);
        let mut state = self.lock();
        match state.entries.remove(&key) {
            Some(entry) if entry.is_live() => {
                info!("Deactivated {kind} {fingerprint} for license {license_id}");
                Ok(entry.machine)
            }
            Some(_) => {
                debug!("Evicted dead {kind} {fingerprint}");
                Err(LicenseError::not_found(kind, fingerprint))
            }
            None => Err(LicenseError::not_found(kind, fingerprint)),
        }
    }

    /// Marks a live entry as being released. The entry keeps counting
    /// towards limits and blocking duplicates until
    /// [`finish_release`](Self::finish_release) removes it or
    /// [`cancel_release`](Self::cancel_release) puts it back.
    ///
    /// # Errors
    ///
    /// Not-found if there is no live entry or a release is already under
    /// way. A dead entry is evicted and reported as not-found.
    pub fn begin_release(&self, key: &EntryKey) -> LicenseResult<Machine> {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return Err(LicenseError::not_found(key.kind, &key.fingerprint));
        };
        if entry.is_live() && !entry.releasing {
            entry.releasing = true;
            return Ok(entry.machine.clone());
        }
        if !entry.is_live() {
            state.entries.remove(key);
            debug!("Evicted dead {} {}", key.kind, key.fingerprint);
        }
        Err(LicenseError::not_found(key.kind, &key.fingerprint))
    }

    /// Removes an entry once its release is confirmed.
    pub fn finish_release(&self, key: &EntryKey) -> Option<Machine> {
        let entry = self.lock().entries.remove(key)?;
        info!(
            "Deactivated {} {} for license {}",
            key.kind, key.fingerprint, key.license_id
        );
        Some(entry.machine)
    }

    /// Clears the release mark after a failed release.
    pub fn cancel_release(&self, key: &EntryKey) {
        if let Some(entry) = self.lock().entries.get_mut(key) {
            entry.releasing = false;
        }
    }

    /// Sets the server-assigned ID of a live entry.
    pub(crate) fn assign_id(&self, key: &EntryKey, id: String) {
        if let Some(entry) = self.lock().entries.get_mut(key) {
            entry.machine.id = id;
        }
    }

    /// Lists live entries of `kind` for `license_id`, oldest first.
    #[must_use]
    pub fn list(&self, license_id: &str, kind: EntityKind) -> Vec<Machine> {
        let state = self.lock();
        let mut machines: Vec<Machine> = state
            .entries
            .iter()
            .filter(|(k, e)| k.license_id == license_id && k.kind == kind && e.is_live())
            .map(|(_, e)| e.machine.clone())
            .collect();
        machines.sort_by(|a, b| a.activated_at.cmp(&b.activated_at));
        machines
    }

    /// Returns the number of live entries of `kind` for `license_id`.
    #[must_use]
    pub fn live_count(&self, license_id: &str, kind: EntityKind) -> u32 {
        self.lock().live_count(license_id, kind)
    }

    /// Returns a snapshot of a live entry.
    ///
    /// # Errors
    ///
    /// Not-found if missing, `HeartbeatDead` if dead.
    pub fn get(&self, key: &EntryKey) -> LicenseResult<Machine> {
        let state = self.lock();
        match state.entries.get(key) {
            Some(entry) if entry.is_live() => Ok(entry.machine.clone()),
            Some(entry) => Err(entry.dead_error()),
            None => Err(LicenseError::not_found(key.kind, &key.fingerprint)),
        }
    }

    /// Returns the heartbeat state of an entry, including tombstones.
    #[must_use]
    pub fn state(&self, key: &EntryKey) -> Option<HeartbeatState> {
        self.lock().entries.get(key).map(|e| e.machine.heartbeat)
    }

    /// Returns true if a live entry exists.
    #[must_use]
    pub fn is_live(&self, key: &EntryKey) -> bool {
        self.lock().entries.get(key).is_some_and(Entry::is_live)
    }

    /// Records a successful ping: the entry returns to `Alive`.
    ///
    /// # Errors
    ///
    /// Not-found if missing, `HeartbeatDead` if dead (death is terminal).
    pub fn record_heartbeat(&self, key: &EntryKey) -> LicenseResult<()> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(key)
            .ok_or_else(|| LicenseError::not_found(key.kind, &key.fingerprint))?;
        if !entry.is_live() {
            return Err(entry.dead_error());
        }
        entry.misses = 0;
        entry.last_alive = Instant::now();
        entry.machine.last_heartbeat_at = Some(Utc::now());
        entry.machine.heartbeat = HeartbeatState::Alive;
        Ok(())
    }

    /// Records a missed cycle. The entry dies once `misses >= threshold` or
    /// `dead_after` has elapsed since it was last alive.
    pub fn record_miss(&self, key: &EntryKey, threshold: u32, dead_after: Duration) -> MissOutcome {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return MissOutcome::Gone;
        };
        if !entry.is_live() {
            return MissOutcome::AlreadyDead;
        }
        entry.misses = entry.misses.saturating_add(1);
        let misses = entry.misses;
        if misses >= threshold || entry.last_alive.elapsed() >= dead_after {
            entry.machine.heartbeat = HeartbeatState::Dead;
            MissOutcome::Dead { misses }
        } else {
            entry.machine.heartbeat = HeartbeatState::Degraded;
            MissOutcome::Degraded { misses }
        }
    }

    /// Marks a live entry dead. Returns false if it was already dead or gone.
    pub fn mark_dead(&self, key: &EntryKey) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(key) {
            Some(entry) if entry.is_live() => {
                entry.machine.heartbeat = HeartbeatState::Dead;
                true
            }
            _ => false,
        }
    }

    /// Returns the consecutive miss count of an entry.
    #[must_use]
    pub fn misses(&self, key: &EntryKey) -> Option<u32> {
        self.lock().entries.get(key).map(|e| e.misses)
    }
}
