//! Heartbeat monitoring with dead-man detection.
//!
//! Each monitored entity gets its own worker task, so one slow ping never
//! delays another entity. A worker runs cycles at a fixed interval. Within a
//! cycle a failed or timed-out ping is retried with capped exponential
//! backoff; a cycle in which every attempt fails counts as one miss.
//!
//! Liveness transitions happen in the [`ActivationLedger`] under its lock.
//! The first transition to `Dead` stops the worker and fires the dead
//! callback, exactly once.

use crate::config::HeartbeatConfig;
use crate::error::{LicenseError, LicenseResult};
use crate::ledger::{ActivationLedger, EntryKey, MissOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sends a single heartbeat ping for an entity.
#[async_trait]
pub trait Pinger: Send + Sync {
    /// Pings once. `HeartbeatDead` means the server has already declared
    /// the entity dead.
    async fn ping(&self, key: &EntryKey) -> LicenseResult<()>;
}

/// Called once when an entity is declared dead.
pub type DeadCallback = Arc<dyn Fn(LicenseError) + Send + Sync>;

struct Worker {
    generation: u64,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

type Workers = Mutex<HashMap<EntryKey, Worker>>;
type Registry = Arc<Workers>;

fn lock_registry(registry: &Workers) -> MutexGuard<'_, HashMap<EntryKey, Worker>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one heartbeat worker per monitored entity.
pub struct HeartbeatMonitor {
    ledger: Arc<ActivationLedger>,
    pinger: Arc<dyn Pinger>,
    config: HeartbeatConfig,
    on_dead: Option<DeadCallback>,
    workers: Registry,
    generations: AtomicU64,
}

impl HeartbeatMonitor {
    /// Creates a monitor that records liveness in `ledger`.
    pub fn new(
        ledger: Arc<ActivationLedger>,
        pinger: Arc<dyn Pinger>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            ledger,
            pinger,
            config,
            on_dead: None,
            workers: Registry::default(),
            generations: AtomicU64::new(0),
        }
    }

    /// Registers the dead-man callback.
    #[must_use]
    pub fn with_dead_callback(mut self, callback: DeadCallback) -> Self {
        self.on_dead = Some(callback);
        self
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<EntryKey, Worker>> {
        lock_registry(&self.workers)
    }

    /// Starts monitoring `key`. Returns `false` if it is already monitored.
    ///
    /// # Errors
    ///
    /// Not-found or `HeartbeatDead` if the entry is not live, `Config` if
    /// called outside a tokio runtime.
    pub fn start(&self, key: &EntryKey) -> LicenseResult<bool> {
        self.ledger.get(key)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            LicenseError::Config("heartbeat monitor requires a tokio runtime".into())
        })?;

        let mut workers = self.workers();
        if workers.get(key).is_some_and(|w| !w.handle.is_finished()) {
            debug!("Heartbeat already running for {} {}", key.kind, key.fingerprint);
            return Ok(false);
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = WorkerContext {
            key: key.clone(),
            generation,
            registry: Arc::downgrade(&self.workers),
            ledger: Arc::clone(&self.ledger),
            pinger: Arc::clone(&self.pinger),
            config: self.config.clone(),
            on_dead: self.on_dead.clone(),
        };
        let handle = runtime.spawn(ctx.run(stop_rx));
        workers.insert(
            key.clone(),
            Worker {
                generation,
                stop_tx,
                handle,
            },
        );

        info!("Heartbeat started for {} {}", key.kind, key.fingerprint);
        Ok(true)
    }

    /// Returns true if a worker is running for `key`.
    #[must_use]
    pub fn is_monitoring(&self, key: &EntryKey) -> bool {
        self.workers()
            .get(key)
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Returns the number of running workers.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.workers()
            .values()
            .filter(|w| !w.handle.is_finished())
            .count()
    }

    /// Stops the worker for `key` and waits for it to exit.
    ///
    /// Safe to call while a ping is in flight. Returns `false` if there was
    /// no running worker.
    pub async fn stop(&self, key: &EntryKey) -> bool {
        let Some(worker) = self.workers().remove(key) else {
            return false;
        };
        let was_running = !worker.handle.is_finished();
        drain(worker).await;
        if was_running {
            info!("Heartbeat stopped for {} {}", key.kind, key.fingerprint);
        }
        was_running
    }

    /// Stops every worker and waits for all of them.
    pub async fn shutdown(&self) {
        let workers: Vec<Worker> = self.workers().drain().map(|(_, w)| w).collect();
        let count = workers.len();
        // Signal every worker before waiting on any of them.
        for worker in &workers {
            let _ = worker.stop_tx.send(true);
        }
        for worker in workers {
            drain(worker).await;
        }
        info!("Heartbeat monitor shut down ({count} workers)");
    }
}

async fn drain(worker: Worker) {
    let _ = worker.stop_tx.send(true);
    if let Err(e) = worker.handle.await {
        if e.is_panic() {
            warn!("Heartbeat worker panicked: {e}");
        }
    }
}

enum Cycle {
    Alive,
    Missed,
    ServerDead,
    Stopped,
}

struct WorkerContext {
    key: EntryKey,
    generation: u64,
    registry: Weak<Workers>,
    ledger: Arc<ActivationLedger>,
    pinger: Arc<dyn Pinger>,
    config: HeartbeatConfig,
    on_dead: Option<DeadCallback>,
}

impl WorkerContext {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        if self.beat(&mut stop_rx).await {
            self.deregister();
        }
    }

    /// Drops this worker's own registry entry. A newer worker registered
    /// under the same key is left alone.
    fn deregister(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut workers = lock_registry(&registry);
        if workers
            .get(&self.key)
            .is_some_and(|w| w.generation == self.generation)
        {
            workers.remove(&self.key);
            debug!(
                "Heartbeat worker for {} {} retired",
                self.key.kind, self.key.fingerprint
            );
        }
    }

    /// Runs cycles until stopped or the entry is dead or gone. Returns true
    /// if the worker ended on its own rather than by a stop request.
    async fn beat(&self, stop_rx: &mut watch::Receiver<bool>) -> bool {
        loop {
            if *stop_rx.borrow() {
                return false;
            }

            match self.cycle(stop_rx).await {
                Cycle::Alive => match self.ledger.record_heartbeat(&self.key) {
                    Ok(()) => debug!("Heartbeat ok for {}", self.key.fingerprint),
                    Err(e) => {
                        debug!("Heartbeat worker exiting: {e}");
                        return true;
                    }
                },
                Cycle::Missed => {
                    let outcome = self.ledger.record_miss(
                        &self.key,
                        self.config.miss_threshold,
                        self.config.dead_after,
                    );
                    match outcome {
                        MissOutcome::Degraded { misses } => {
                            warn!(
                                "Heartbeat missed for {} {} ({misses}/{})",
                                self.key.kind, self.key.fingerprint, self.config.miss_threshold
                            );
                        }
                        MissOutcome::Dead { misses } => {
                            self.declare_dead(misses);
                            return true;
                        }
                        MissOutcome::AlreadyDead | MissOutcome::Gone => return true,
                    }
                }
                Cycle::ServerDead => {
                    if self.ledger.mark_dead(&self.key) {
                        let misses = self.ledger.misses(&self.key).unwrap_or_default();
                        self.declare_dead(misses);
                    }
                    return true;
                }
                Cycle::Stopped => return false,
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.interval) => {}
                res = stop_rx.changed() => {
                    if res.is_err() || *stop_rx.borrow() {
                        return false;
                    }
                }
            }
        }
    }

    /// One heartbeat cycle: the first attempt plus up to `ping_retries`
    /// retries with backoff between them.
    async fn cycle(&self, stop_rx: &mut watch::Receiver<bool>) -> Cycle {
        let attempts = self.config.ping_retries.saturating_add(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.backoff(attempt - 1);
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    res = stop_rx.changed() => {
                        if res.is_err() || *stop_rx.borrow() {
                            return Cycle::Stopped;
                        }
                    }
                }
            }

            let ping = tokio::time::timeout(self.config.ping_timeout, self.pinger.ping(&self.key));
            // Stop is the only value ever sent, so any change means stop.
            let result = tokio::select! {
                r = ping => r,
                _ = stop_rx.changed() => return Cycle::Stopped,
            };

            let reason = match result {
                Ok(Ok(())) => return Cycle::Alive,
                Ok(Err(LicenseError::HeartbeatDead { .. })) => return Cycle::ServerDead,
                Ok(Err(e)) if e.is_not_found() => {
                    warn!("Heartbeat target no longer exists: {e}");
                    return Cycle::ServerDead;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.config.ping_timeout),
            };

            let err = LicenseError::HeartbeatPingFailed {
                kind: self.key.kind,
                fingerprint: self.key.fingerprint.clone(),
                reason,
            };
            debug!("{err} (attempt {attempt}/{attempts})");
        }
        Cycle::Missed
    }

    fn declare_dead(&self, misses: u32) {
        let err = LicenseError::HeartbeatDead {
            kind: self.key.kind,
            fingerprint: self.key.fingerprint.clone(),
            misses,
        };
        error!("{err}");
        if let Some(callback) = &self.on_dead {
            callback(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerLimits;
    use crate::machine::{EntityKind, HeartbeatState};
    use std::time::Duration;

    struct Unreachable;

    #[async_trait]
    impl Pinger for Unreachable {
        async fn ping(&self, _key: &EntryKey) -> LicenseResult<()> {
            Err(LicenseError::Network("unreachable".into()))
        }
    }

    fn setup() -> (Arc<ActivationLedger>, HeartbeatMonitor, EntryKey) {
        let ledger = Arc::new(ActivationLedger::new(LedgerLimits::default()));
        ledger.activate(EntityKind::Machine, "lic", "fp").unwrap();
        let config = HeartbeatConfig {
            interval: Duration::from_secs(10),
            miss_threshold: 1,
            ping_retries: 0,
            ..HeartbeatConfig::default()
        };
        let monitor = HeartbeatMonitor::new(Arc::clone(&ledger), Arc::new(Unreachable), config);
        (ledger, monitor, EntryKey::new("lic", EntityKind::Machine, "fp"))
    }

    #[tokio::test(start_paused = true)]
    async fn dead_worker_leaves_the_registry() {
        let (ledger, monitor, key) = setup();
        monitor.start(&key).unwrap();
        assert_eq!(monitor.workers().len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ledger.state(&key), Some(HeartbeatState::Dead));
        assert!(monitor.workers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn retired_worker_leaves_a_newer_one_alone() {
        let (ledger, monitor, key) = setup();
        monitor.start(&key).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(monitor.workers().is_empty());

        // A fresh activation replaces the tombstone and gets a new worker.
        ledger.activate(EntityKind::Machine, "lic", "fp").unwrap();
        monitor.start(&key).unwrap();
        let generation = monitor.workers().get(&key).map(|w| w.generation);
        assert_eq!(generation, Some(1));
        assert!(monitor.is_monitoring(&key));
    }
}
