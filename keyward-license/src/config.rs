//! Configuration for the license orchestrator.
//!
//! Configuration is an explicit value handed to
//! [`LicenseOrchestrator::new`](crate::LicenseOrchestrator::new). It is read
//! only after construction; there is no process-wide state.

use crate::envelope::FreshnessContext;
use crate::error::{LicenseError, LicenseResult};
use crate::ledger::LedgerLimits;
use keyward_crypto::{KdfParams, PublicKey};
use std::fmt;
use std::time::Duration;

/// Default API base URL.
pub const DEFAULT_API_URL: &str = "https://api.keygen.sh";

/// Scopes that must be present before a validation request is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationScope {
    /// Validation must be scoped to a machine fingerprint.
    pub require_fingerprint: bool,
    /// Validation must be scoped to a product.
    pub require_product: bool,
}

/// Accepted window for response dates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessConfig {
    /// Oldest acceptable response age.
    pub max_age: Duration,
    /// How far a response date may lead the local clock.
    pub skew_tolerance: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(5 * 60),
            skew_tolerance: Duration::from_secs(60),
        }
    }
}

impl FreshnessConfig {
    /// Builds a freshness context anchored at the current time.
    #[must_use]
    pub fn context(&self) -> FreshnessContext {
        FreshnessContext::new(self.max_age, self.skew_tolerance)
    }
}

/// Heartbeat cadence and dead-man thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between heartbeat cycles.
    pub interval: Duration,
    /// Consecutive missed cycles before an entity is declared dead.
    pub miss_threshold: u32,
    /// Time without a successful ping before an entity is declared dead.
    pub dead_after: Duration,
    /// Upper bound on a single ping.
    pub ping_timeout: Duration,
    /// Extra attempts within one cycle after a failed ping.
    pub ping_retries: u32,
    /// First retry delay; doubles on each further retry.
    pub backoff_base: Duration,
    /// Cap on the retry delay.
    pub backoff_max: Duration,
    /// Activated entities must have a running monitor to be usable.
    pub required: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            miss_threshold: 3,
            dead_after: Duration::from_secs(10 * 60),
            ping_timeout: Duration::from_secs(30),
            ping_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            required: false,
        }
    }
}

impl HeartbeatConfig {
    /// Delay before retry number `attempt` (1-based) within a cycle.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }

    fn validate(&self) -> LicenseResult<()> {
        if self.interval.is_zero() {
            return Err(LicenseError::Config("heartbeat interval must be non-zero".into()));
        }
        if self.miss_threshold == 0 {
            return Err(LicenseError::Config("heartbeat miss threshold must be at least 1".into()));
        }
        if self.ping_timeout.is_zero() {
            return Err(LicenseError::Config("heartbeat ping timeout must be non-zero".into()));
        }
        if self.backoff_max < self.backoff_base {
            return Err(LicenseError::Config("heartbeat backoff max is below its base".into()));
        }
        Ok(())
    }
}

/// Configuration for a [`LicenseOrchestrator`](crate::LicenseOrchestrator).
#[derive(Clone)]
pub struct LicenseConfig {
    /// Account identifier.
    pub account: String,
    /// Product identifier, used for validation scope and upgrades.
    pub product: Option<String>,
    /// The license key being validated.
    pub license_key: String,
    /// API token for activation endpoints.
    pub token: Option<String>,
    /// Hex-encoded Ed25519 verify key for responses and files.
    pub public_key: String,
    /// API base URL.
    pub api_url: String,
    /// User agent sent by the HTTP transport.
    pub user_agent: String,
    /// Required validation scopes.
    pub scope: ValidationScope,
    /// Response freshness window.
    pub freshness: FreshnessConfig,
    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
    /// Local machine and process limits.
    pub limits: LedgerLimits,
    /// Key derivation parameters for encrypted files.
    pub file_kdf: KdfParams,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            product: None,
            license_key: String::new(),
            token: None,
            public_key: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            user_agent: format!("keyward/{}", env!("CARGO_PKG_VERSION")),
            scope: ValidationScope::default(),
            freshness: FreshnessConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            limits: LedgerLimits::default(),
            file_kdf: KdfParams::default(),
        }
    }
}

impl LicenseConfig {
    /// Parses the configured public key.
    ///
    /// # Errors
    ///
    /// `PublicKeyMissing` if empty, `PublicKeyInvalid` if malformed.
    pub fn public_key(&self) -> LicenseResult<PublicKey> {
        if self.public_key.trim().is_empty() {
            return Err(LicenseError::PublicKeyMissing);
        }
        PublicKey::from_hex(&self.public_key)
            .map_err(|e| LicenseError::PublicKeyInvalid(e.to_string()))
    }

    /// Checks the configuration before first use.
    pub fn validate(&self) -> LicenseResult<()> {
        self.public_key()?;
        self.heartbeat.validate()?;
        if self.freshness.max_age.is_zero() {
            return Err(LicenseError::Config("freshness max age must be non-zero".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for LicenseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseConfig")
            .field("account", &self.account)
            .field("product", &self.product)
            .field("license_key", &"[REDACTED]")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("public_key", &self.public_key)
            .field("api_url", &self.api_url)
            .field("scope", &self.scope)
            .field("freshness", &self.freshness)
            .field("heartbeat", &self.heartbeat)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
