//! The license orchestrator.
//!
//! Every network flow follows the same path: send through the transport,
//! authenticate the raw envelope, then decode. The activation ledger is
//! consulted before every mutating call, and activated entities get a
//! heartbeat worker.

use crate::api::{self, ErrorContext, MachineDocument, ReleaseDocument, ValidationDocument};
use crate::authenticator::ResponseAuthenticator;
use crate::config::{FreshnessConfig, LicenseConfig};
use crate::error::{LicenseError, LicenseResult};
use crate::file::{FileVerifier, LicenseFile, MachineFile};
use crate::heartbeat::{DeadCallback, HeartbeatMonitor, Pinger};
use crate::ledger::{ActivationLedger, EntryKey, LedgerLimits};
use crate::license::{Entitlement, License, LicenseStatus};
use crate::machine::{EntityKind, HeartbeatState, Machine};
use crate::store::Store;
use crate::transport::{Request, Transport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// A newer release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upgrade {
    pub current_version: semver::Version,
    pub next_version: semver::Version,
    /// Download URL.
    pub location: String,
}

/// Builds a [`LicenseOrchestrator`] with optional collaborators.
pub struct OrchestratorBuilder {
    config: LicenseConfig,
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn Store>>,
    on_dead: Option<DeadCallback>,
}

impl OrchestratorBuilder {
    /// Sets the persistence collaborator for offline files.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the callback fired once when an entity is declared dead.
    #[must_use]
    pub fn on_dead(mut self, callback: impl Fn(LicenseError) + Send + Sync + 'static) -> Self {
        self.on_dead = Some(Arc::new(callback));
        self
    }

    /// Validates the configuration and builds the orchestrator.
    ///
    /// # Errors
    ///
    /// Any configuration error from [`LicenseConfig::validate`].
    pub fn build(self) -> LicenseResult<LicenseOrchestrator> {
        self.config.validate()?;
        let public_key = self.config.public_key()?;

        let authenticator = ResponseAuthenticator::new(public_key);
        let files = FileVerifier::new(public_key, self.config.file_kdf.clone());
        let ledger = Arc::new(ActivationLedger::new(self.config.limits));

        let pinger = Arc::new(TransportPinger {
            transport: Arc::clone(&self.transport),
            authenticator: authenticator.clone(),
            freshness: self.config.freshness.clone(),
        });
        let mut monitor =
            HeartbeatMonitor::new(Arc::clone(&ledger), pinger, self.config.heartbeat.clone());
        if let Some(callback) = self.on_dead {
            monitor = monitor.with_dead_callback(callback);
        }

        Ok(LicenseOrchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                transport: self.transport,
                authenticator,
                files,
                ledger,
                monitor,
                store: self.store,
                license: RwLock::new(None),
            }),
        })
    }
}

struct Inner {
    config: LicenseConfig,
    transport: Arc<dyn Transport>,
    authenticator: ResponseAuthenticator,
    files: FileVerifier,
    ledger: Arc<ActivationLedger>,
    monitor: HeartbeatMonitor,
    store: Option<Arc<dyn Store>>,
    license: RwLock<Option<License>>,
}

/// Validates, activates and monitors a license.
///
/// Cheap to clone; clones share the ledger and the monitor.
#[derive(Clone)]
pub struct LicenseOrchestrator {
    inner: Arc<Inner>,
}

impl LicenseOrchestrator {
    /// Creates an orchestrator with no store and no dead callback.
    pub fn new(config: LicenseConfig, transport: Arc<dyn Transport>) -> LicenseResult<Self> {
        Self::builder(config, transport).build()
    }

    /// Starts building an orchestrator.
    pub fn builder(config: LicenseConfig, transport: Arc<dyn Transport>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            transport,
            store: None,
            on_dead: None,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &LicenseConfig {
        &self.inner.config
    }

    /// Returns the activation ledger.
    #[must_use]
    pub fn ledger(&self) -> &ActivationLedger {
        &self.inner.ledger
    }

    fn cached_license(&self) -> Option<License> {
        self.inner
            .license
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cache_license(&self, license: &License) {
        *self
            .inner
            .license
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(license.clone());
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        request: Request,
        ctx: ErrorContext<'_>,
    ) -> LicenseResult<(T, DateTime<Utc>)> {
        exchange(
            self.inner.transport.as_ref(),
            &self.inner.authenticator,
            &self.inner.config.freshness,
            request,
            ctx,
        )
        .await
    }

    // ── Validation ───────────────────────────────────────────────

    /// Validates the configured license key, scoped to `fingerprint`.
    ///
    /// Scope requirements are checked before anything is sent.
    ///
    /// # Errors
    ///
    /// - `ValidationFingerprintMissing` / `ValidationProductMissing`
    /// - `LicenseNotActivated` carrying the license if `fingerprint` has no
    ///   activation
    /// - `LicenseExpired`, `LicenseSuspended`, `LicenseTooManyMachines`,
    ///   `LicenseTooManyCores`, `LicenseInvalid`
    /// - any authenticity or transport error
    pub async fn validate(&self, fingerprint: Option<&str>) -> LicenseResult<License> {
        let config = &self.inner.config;
        if config.license_key.trim().is_empty() {
            return Err(LicenseError::LicenseKeyMissing);
        }
        let fingerprint = fingerprint.filter(|fp| !fp.is_empty());
        if config.scope.require_fingerprint && fingerprint.is_none() {
            return Err(LicenseError::ValidationFingerprintMissing);
        }
        if config.scope.require_product && config.product.is_none() {
            return Err(LicenseError::ValidationProductMissing);
        }

        let request = Request::Validate {
            license_key: config.license_key.clone(),
            fingerprint: fingerprint.map(str::to_string),
            product: config.product.clone(),
        };
        let (doc, signed_at): (ValidationDocument, _) =
            self.exchange(request, ErrorContext::none()).await?;

        let meta = doc.meta;
        let Some(data) = doc.data else {
            return Err(LicenseError::LicenseInvalid {
                code: meta.code,
                detail: meta.detail,
            });
        };

        self.inner.ledger.set_license_limits(
            &data.id,
            LedgerLimits {
                max_machines: data.max_machines,
                max_processes: data.max_processes,
            },
        );

        let status = match meta.code.as_str() {
            "VALID" => LicenseStatus::Active,
            "NO_MACHINE" | "NO_MACHINES" | "FINGERPRINT_SCOPE_MISMATCH" => {
                LicenseStatus::NotActivated
            }
            "EXPIRED" => LicenseStatus::Expired,
            "SUSPENDED" => LicenseStatus::Suspended,
            _ => data.status,
        };
        let machines = self.inner.ledger.list(&data.id, EntityKind::Machine);
        let license = License::from_data(data, status, signed_at).with_machines(machines);
        self.cache_license(&license);

        debug!("Validated license {}: {}", license.id, meta.code);
        match meta.code.as_str() {
            "VALID" => Ok(license),
            "NO_MACHINE" | "NO_MACHINES" | "FINGERPRINT_SCOPE_MISMATCH" => {
                Err(LicenseError::LicenseNotActivated {
                    license: Box::new(license),
                })
            }
            "EXPIRED" => Err(LicenseError::LicenseExpired),
            "SUSPENDED" => Err(LicenseError::LicenseSuspended),
            "TOO_MANY_MACHINES" => Err(LicenseError::LicenseTooManyMachines),
            "TOO_MANY_CORES" => Err(LicenseError::LicenseTooManyCores),
            _ if meta.valid => Ok(license),
            code => Err(LicenseError::LicenseInvalid {
                code: code.to_string(),
                detail: meta.detail,
            }),
        }
    }

    /// Returns the last verified license, with a fresh machine snapshot.
    #[must_use]
    pub fn license(&self) -> Option<License> {
        self.cached_license().map(|license| {
            let machines = self.inner.ledger.list(&license.id, EntityKind::Machine);
            license.with_machines(machines)
        })
    }

    /// Returns the license to activate against, validating if needed.
    async fn license_for_activation(&self, fingerprint: &str) -> LicenseResult<License> {
        if let Some(license) = self.cached_license() {
            return Ok(license);
        }
        match self.validate(Some(fingerprint)).await {
            Ok(license) => Ok(license),
            Err(LicenseError::LicenseNotActivated { license }) => Ok(*license),
            Err(e) => Err(e),
        }
    }

    // ── Activation ───────────────────────────────────────────────

    /// Activates this license for a machine fingerprint and starts its
    /// heartbeat.
    ///
    /// # Errors
    ///
    /// `MachineAlreadyActivated`, `MachineLimitExceeded`, or any API,
    /// authenticity or transport error. A failed activation leaves no
    /// ledger entry behind.
    pub async fn activate(&self, fingerprint: &str) -> LicenseResult<Machine> {
        self.activate_entity(EntityKind::Machine, fingerprint).await
    }

    /// Activates a process. See [`activate`](Self::activate).
    pub async fn activate_process(&self, fingerprint: &str) -> LicenseResult<Machine> {
        self.activate_entity(EntityKind::Process, fingerprint).await
    }

    async fn activate_entity(&self, kind: EntityKind, fingerprint: &str) -> LicenseResult<Machine> {
        if fingerprint.is_empty() {
            return Err(LicenseError::ValidationFingerprintMissing);
        }
        let license = self.license_for_activation(fingerprint).await?;
        let ledger = &self.inner.ledger;

        // Reserve first so the limit holds across concurrent activations.
        ledger.activate(kind, &license.id, fingerprint)?;
        let key = EntryKey::new(&license.id, kind, fingerprint);

        let request = Request::Activate {
            license_id: license.id.clone(),
            kind,
            fingerprint: fingerprint.to_string(),
        };
        let limit = ledger.limits_for(&license.id).for_kind(kind);
        let ctx = ErrorContext::entity(kind, fingerprint, limit);
        let doc = match self.exchange::<MachineDocument>(request, ctx).await {
            Ok((doc, _)) => doc,
            Err(e) => {
                warn!("Activation of {kind} {fingerprint} failed, rolling back: {e}");
                let _ = ledger.deactivate(kind, &license.id, fingerprint);
                return Err(e);
            }
        };
        ledger.assign_id(&key, doc.data.id);

        self.inner.monitor.start(&key)?;
        ledger.get(&key)
    }

    /// Deactivates a machine fingerprint and stops its heartbeat.
    ///
    /// # Errors
    ///
    /// `MachineNotFound` if the fingerprint is not activated, including on
    /// a second call for the same fingerprint. On any other failure the
    /// machine stays activated and its heartbeat resumes, so the call can
    /// be retried.
    pub async fn deactivate(&self, fingerprint: &str) -> LicenseResult<()> {
        self.deactivate_entity(EntityKind::Machine, fingerprint).await
    }

    /// Deactivates a process. See [`deactivate`](Self::deactivate).
    pub async fn deactivate_process(&self, fingerprint: &str) -> LicenseResult<()> {
        self.deactivate_entity(EntityKind::Process, fingerprint).await
    }

    async fn deactivate_entity(&self, kind: EntityKind, fingerprint: &str) -> LicenseResult<()> {
        let Some(license) = self.cached_license() else {
            return Err(LicenseError::not_found(kind, fingerprint));
        };
        let key = EntryKey::new(&license.id, kind, fingerprint);

        // The entry stays reserved until the server confirms the release.
        let ledger = &self.inner.ledger;
        let machine = ledger.begin_release(&key)?;
        let was_monitoring = self.inner.monitor.stop(&key).await;

        let request = Request::Deactivate {
            license_id: license.id.clone(),
            kind,
            fingerprint: fingerprint.to_string(),
        };
        let ctx = ErrorContext::entity(kind, fingerprint, None);
        match self.exchange::<serde_json::Value>(request, ctx).await {
            Ok(_) => {
                ledger.finish_release(&key);
                debug!("Server released {kind} {fingerprint} ({})", machine.id);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                warn!("Server had no record of {kind} {fingerprint}");
                ledger.finish_release(&key);
                Ok(())
            }
            Err(e) => {
                warn!("Deactivation of {kind} {fingerprint} failed, keeping it: {e}");
                ledger.cancel_release(&key);
                if was_monitoring {
                    if let Err(restart) = self.inner.monitor.start(&key) {
                        warn!("Could not resume heartbeat for {kind} {fingerprint}: {restart}");
                    }
                }
                Err(e)
            }
        }
    }

    // ── Heartbeats ───────────────────────────────────────────────

    /// Starts the heartbeat for an activated machine. Idempotent.
    pub fn monitor(&self, fingerprint: &str) -> LicenseResult<bool> {
        self.monitor_entity(EntityKind::Machine, fingerprint)
    }

    /// Starts the heartbeat for an activated process. Idempotent.
    pub fn monitor_process(&self, fingerprint: &str) -> LicenseResult<bool> {
        self.monitor_entity(EntityKind::Process, fingerprint)
    }

    fn monitor_entity(&self, kind: EntityKind, fingerprint: &str) -> LicenseResult<bool> {
        let key = self.key(kind, fingerprint)?;
        self.inner.monitor.start(&key)
    }

    fn key(&self, kind: EntityKind, fingerprint: &str) -> LicenseResult<EntryKey> {
        self.cached_license()
            .map(|license| EntryKey::new(&license.id, kind, fingerprint))
            .ok_or_else(|| LicenseError::not_found(kind, fingerprint))
    }

    /// Returns a usable machine.
    ///
    /// # Errors
    ///
    /// `MachineNotFound`, `HeartbeatDead` if it died, or `HeartbeatRequired`
    /// if heartbeats are required and none is running.
    pub fn machine(&self, fingerprint: &str) -> LicenseResult<Machine> {
        self.entity(EntityKind::Machine, fingerprint)
    }

    /// Returns a usable process. See [`machine`](Self::machine).
    pub fn process(&self, fingerprint: &str) -> LicenseResult<Machine> {
        self.entity(EntityKind::Process, fingerprint)
    }

    fn entity(&self, kind: EntityKind, fingerprint: &str) -> LicenseResult<Machine> {
        let key = self.key(kind, fingerprint)?;
        let machine = self.inner.ledger.get(&key)?;
        if self.heartbeat_required() && !self.inner.monitor.is_monitoring(&key) {
            return Err(LicenseError::HeartbeatRequired {
                kind,
                fingerprint: fingerprint.to_string(),
            });
        }
        Ok(machine)
    }

    fn heartbeat_required(&self) -> bool {
        self.inner.config.heartbeat.required
            || self
                .cached_license()
                .is_some_and(|license| license.require_heartbeat)
    }

    /// Returns the heartbeat state of a machine, including dead ones.
    #[must_use]
    pub fn heartbeat_state(&self, fingerprint: &str) -> Option<HeartbeatState> {
        self.entity_state(EntityKind::Machine, fingerprint)
    }

    /// Returns the heartbeat state of a process, including dead ones.
    #[must_use]
    pub fn process_heartbeat_state(&self, fingerprint: &str) -> Option<HeartbeatState> {
        self.entity_state(EntityKind::Process, fingerprint)
    }

    fn entity_state(&self, kind: EntityKind, fingerprint: &str) -> Option<HeartbeatState> {
        let key = self.key(kind, fingerprint).ok()?;
        self.inner.ledger.state(&key)
    }

    // ── Read accessors ───────────────────────────────────────────

    /// Lists live machines for the current license.
    #[must_use]
    pub fn machines(&self) -> Vec<Machine> {
        self.list(EntityKind::Machine)
    }

    /// Lists live processes for the current license.
    #[must_use]
    pub fn processes(&self) -> Vec<Machine> {
        self.list(EntityKind::Process)
    }

    fn list(&self, kind: EntityKind) -> Vec<Machine> {
        self.cached_license()
            .map(|license| self.inner.ledger.list(&license.id, kind))
            .unwrap_or_default()
    }

    /// Returns the current license's entitlements.
    #[must_use]
    pub fn entitlements(&self) -> BTreeSet<Entitlement> {
        self.cached_license()
            .map(|license| license.entitlements().clone())
            .unwrap_or_default()
    }

    // ── Upgrades ─────────────────────────────────────────────────

    /// Checks for a release newer than `current_version`.
    ///
    /// # Errors
    ///
    /// `UpgradeNotAvailable` if there is nothing newer,
    /// `ReleaseLocationMissing` if the newer release has no download URL.
    pub async fn upgrade(&self, current_version: &str) -> LicenseResult<Upgrade> {
        let current = semver::Version::parse(current_version.trim_start_matches('v'))
            .map_err(|e| LicenseError::Config(format!("invalid version {current_version:?}: {e}")))?;

        let request = Request::Upgrade {
            product: self.inner.config.product.clone(),
            current_version: current.to_string(),
        };
        let (doc, _): (ReleaseDocument, _) = self.exchange(request, ErrorContext::none()).await?;

        let release = doc.data.ok_or(LicenseError::UpgradeNotAvailable)?;
        let next = semver::Version::parse(release.version.trim_start_matches('v')).map_err(|e| {
            LicenseError::Api {
                code: "RELEASE_VERSION_INVALID".into(),
                detail: e.to_string(),
            }
        })?;
        if next <= current {
            return Err(LicenseError::UpgradeNotAvailable);
        }
        let location = release
            .location
            .filter(|l| !l.is_empty())
            .ok_or(LicenseError::ReleaseLocationMissing)?;

        info!("Upgrade available: {current} -> {next}");
        Ok(Upgrade {
            current_version: current,
            next_version: next,
            location,
        })
    }

    // ── Offline files ────────────────────────────────────────────

    fn store(&self) -> LicenseResult<&dyn Store> {
        self.inner
            .store
            .as_deref()
            .ok_or_else(|| LicenseError::Config("no store configured".into()))
    }

    /// Loads and verifies a license file. The secret is the license key.
    pub fn load_license_file(&self, path: impl AsRef<Path>) -> LicenseResult<LicenseFile> {
        let raw = self.store()?.load(path.as_ref())?;
        self.inner
            .files
            .open_license_file(&raw, &self.inner.config.license_key)
    }

    /// Loads and verifies a machine file for `fingerprint`.
    pub fn load_machine_file(
        &self,
        path: impl AsRef<Path>,
        fingerprint: &str,
    ) -> LicenseResult<MachineFile> {
        let raw = self.store()?.load(path.as_ref())?;
        let secret = format!("{}{fingerprint}", self.inner.config.license_key);
        self.inner.files.open_machine_file(&raw, &secret)
    }

    /// Saves raw file bytes through the store.
    pub fn save_file(&self, path: impl AsRef<Path>, bytes: &[u8]) -> LicenseResult<()> {
        self.store()?.save(path.as_ref(), bytes)
    }

    /// Stops every heartbeat worker and waits for them to exit.
    pub async fn shutdown(&self) {
        self.inner.monitor.shutdown().await;
    }
}

async fn exchange<T: DeserializeOwned>(
    transport: &dyn Transport,
    authenticator: &ResponseAuthenticator,
    freshness: &FreshnessConfig,
    request: Request,
    ctx: ErrorContext<'_>,
) -> LicenseResult<(T, DateTime<Utc>)> {
    let name = request.name();
    let envelope = transport.send(request).await?;
    let auth = authenticator.authenticate(envelope, &freshness.context())?;
    debug!("{name} response authenticated");
    let doc = api::decode(&auth, ctx)?;
    Ok((doc, auth.signed_at))
}

/// Pings through the transport, authenticating every reply.
struct TransportPinger {
    transport: Arc<dyn Transport>,
    authenticator: ResponseAuthenticator,
    freshness: FreshnessConfig,
}

#[async_trait]
impl Pinger for TransportPinger {
    async fn ping(&self, key: &EntryKey) -> LicenseResult<()> {
        let request = Request::Ping {
            license_id: key.license_id.clone(),
            kind: key.kind,
            fingerprint: key.fingerprint.clone(),
        };
        let ctx = ErrorContext::entity(key.kind, &key.fingerprint, None);
        let _: (MachineDocument, _) = exchange(
            self.transport.as_ref(),
            &self.authenticator,
            &self.freshness,
            request,
            ctx,
        )
        .await?;
        Ok(())
    }
}
