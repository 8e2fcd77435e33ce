//! Error types for the licensing module.
//!
//! Every failure the core can produce is a variant here. Callers branch on
//! the variant (or on [`LicenseError::kind`]) rather than on messages.

use crate::license::License;
use crate::machine::EntityKind;
use thiserror::Error;

/// Coarse classification of a [`LicenseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Signature, digest, date, key or file genuineness checks failed.
    Authenticity,
    /// The license or ledger refused the action.
    Policy,
    /// Heartbeat failures.
    Liveness,
    /// The referenced machine, process or resource does not exist.
    NotFound,
    /// The transport, persistence or decoding layer failed.
    Transport,
    /// The configuration is unusable.
    Configuration,
}

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    // ── Authenticity ─────────────────────────────────────────────
    /// Response carried no digest.
    #[error("response digest is missing")]
    ResponseDigestMissing,

    /// Response digest does not match the body.
    #[error("response digest is invalid")]
    ResponseDigestInvalid,

    /// Response carried no signature.
    #[error("response signature is missing")]
    ResponseSignatureMissing,

    /// Response signature does not verify.
    #[error("response signature is invalid")]
    ResponseSignatureInvalid,

    /// Response date is missing or unparseable.
    #[error("response date is invalid")]
    ResponseDateInvalid,

    /// Response date is older than the accepted window.
    #[error("response date is too old: {date} (max age {max_age_secs}s)")]
    ResponseDateTooOld { date: String, max_age_secs: i64 },

    /// Response date is further in the future than the clock skew allows.
    #[error("response date is in the future: {date} (skew tolerance {skew_secs}s)")]
    ResponseDateInFuture { date: String, skew_secs: i64 },

    /// The named signature algorithm is not supported.
    #[error("signature algorithm is not supported: {0}")]
    SignatureAlgorithmNotSupported(String),

    /// Signed license key failed verification.
    #[error("license key is not genuine")]
    LicenseKeyNotGenuine,

    /// License file is not in a recognised format.
    #[error("license file is not supported")]
    LicenseFileNotSupported,

    /// License file is signed but not encrypted.
    #[error("license file is not encrypted")]
    LicenseFileNotEncrypted,

    /// License file failed decryption or signature verification.
    #[error("license file is not genuine")]
    LicenseFileNotGenuine,

    /// Machine file is not in a recognised format.
    #[error("machine file is not supported")]
    MachineFileNotSupported,

    /// Machine file is signed but not encrypted.
    #[error("machine file is not encrypted")]
    MachineFileNotEncrypted,

    /// Machine file failed decryption or signature verification.
    #[error("machine file is not genuine")]
    MachineFileNotGenuine,

    // ── Policy ───────────────────────────────────────────────────
    /// Validation requires a fingerprint scope but none was given.
    #[error("validation fingerprint scope is missing")]
    ValidationFingerprintMissing,

    /// Validation requires a product scope but none is configured.
    #[error("validation product scope is missing")]
    ValidationProductMissing,

    /// The license is valid but not activated for this fingerprint.
    /// Carries the verified license so the caller can activate and retry.
    #[error("license is not activated")]
    LicenseNotActivated { license: Box<License> },

    /// License has expired.
    #[error("license is expired")]
    LicenseExpired,

    /// License is suspended.
    #[error("license is suspended")]
    LicenseSuspended,

    /// License has more machines than its policy allows.
    #[error("license has too many machines")]
    LicenseTooManyMachines,

    /// License has more cores than its policy allows.
    #[error("license has too many cores")]
    LicenseTooManyCores,

    /// License failed validation for another reason.
    #[error("license is invalid: {code}: {detail}")]
    LicenseInvalid { code: String, detail: String },

    /// License key is not a signed key.
    #[error("license is not signed")]
    LicenseNotSigned,

    /// No license scheme was given for offline verification.
    #[error("license scheme is missing")]
    LicenseSchemeMissing,

    /// License scheme is not supported for offline verification.
    #[error("license scheme is not supported: {0}")]
    LicenseSchemeNotSupported(String),

    /// No license key is configured.
    #[error("license key is missing")]
    LicenseKeyMissing,

    /// No secret was given to decrypt a license or machine file.
    #[error("license file secret is missing")]
    LicenseFileSecretMissing,

    /// A genuine license file has passed its expiry.
    #[error("license file is expired")]
    LicenseFileExpired,

    /// A genuine machine file has passed its expiry.
    #[error("machine file is expired")]
    MachineFileExpired,

    /// The machine fingerprint is already activated.
    #[error("machine is already activated: {fingerprint}")]
    MachineAlreadyActivated { fingerprint: String },

    /// The fingerprint is already in use.
    #[error("fingerprint is already taken: {fingerprint}")]
    FingerprintTaken { fingerprint: String },

    /// Activating would exceed the machine limit.
    #[error("machine limit has been exceeded (max {limit})")]
    MachineLimitExceeded { limit: u32 },

    /// Activating would exceed the process limit.
    #[error("process limit has been exceeded (max {limit})")]
    ProcessLimitExceeded { limit: u32 },

    /// No newer release is available.
    #[error("no upgrades available (already up-to-date)")]
    UpgradeNotAvailable,

    /// A newer release exists but has no download location.
    #[error("release has no download URL")]
    ReleaseLocationMissing,

    /// The API token was rejected.
    #[error("token is invalid: {0}")]
    TokenInvalid(String),

    /// The license key was rejected by the API.
    #[error("license key is invalid: {0}")]
    LicenseKeyInvalid(String),

    /// The caller is not permitted to perform the action.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    // ── Liveness ─────────────────────────────────────────────────
    /// A single heartbeat ping failed. Recoverable.
    #[error("heartbeat ping failed for {kind} {fingerprint}: {reason}")]
    HeartbeatPingFailed {
        kind: EntityKind,
        fingerprint: String,
        reason: String,
    },

    /// The entity must be monitored but has no running heartbeat.
    #[error("heartbeat is required for {kind} {fingerprint}")]
    HeartbeatRequired { kind: EntityKind, fingerprint: String },

    /// The entity's heartbeat is dead. Terminal.
    #[error("heartbeat is dead for {kind} {fingerprint} after {misses} missed pings")]
    HeartbeatDead {
        kind: EntityKind,
        fingerprint: String,
        misses: u32,
    },

    // ── Not found ────────────────────────────────────────────────
    /// The machine does not exist.
    #[error("machine no longer exists: {fingerprint}")]
    MachineNotFound { fingerprint: String },

    /// The process does not exist.
    #[error("process no longer exists: {fingerprint}")]
    ProcessNotFound { fingerprint: String },

    /// An API resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),

    // ── Transport ────────────────────────────────────────────────
    /// Network error talking to the licensing API.
    #[error("network error: {0}")]
    Network(String),

    /// The API returned an error with an unrecognised code.
    #[error("api error: {code}: {detail}")]
    Api { code: String, detail: String },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Configuration ────────────────────────────────────────────
    /// No public key is configured.
    #[error("public key is missing")]
    PublicKeyMissing,

    /// The configured public key is malformed.
    #[error("public key is invalid: {0}")]
    PublicKeyInvalid(String),

    /// Another configuration value is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LicenseError {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        use LicenseError::*;
        match self {
            ResponseDigestMissing
            | ResponseDigestInvalid
            | ResponseSignatureMissing
            | ResponseSignatureInvalid
            | ResponseDateInvalid
            | ResponseDateTooOld { .. }
            | ResponseDateInFuture { .. }
            | SignatureAlgorithmNotSupported(_)
            | LicenseKeyNotGenuine
            | LicenseFileNotSupported
            | LicenseFileNotEncrypted
            | LicenseFileNotGenuine
            | MachineFileNotSupported
            | MachineFileNotEncrypted
            | MachineFileNotGenuine => ErrorKind::Authenticity,

            ValidationFingerprintMissing
            | ValidationProductMissing
            | LicenseNotActivated { .. }
            | LicenseExpired
            | LicenseSuspended
            | LicenseTooManyMachines
            | LicenseTooManyCores
            | LicenseInvalid { .. }
            | LicenseNotSigned
            | LicenseSchemeMissing
            | LicenseSchemeNotSupported(_)
            | LicenseKeyMissing
            | LicenseFileSecretMissing
            | LicenseFileExpired
            | MachineFileExpired
            | MachineAlreadyActivated { .. }
            | FingerprintTaken { .. }
            | MachineLimitExceeded { .. }
            | ProcessLimitExceeded { .. }
            | UpgradeNotAvailable
            | ReleaseLocationMissing
            | TokenInvalid(_)
            | LicenseKeyInvalid(_)
            | NotAuthorized(_) => ErrorKind::Policy,

            HeartbeatPingFailed { .. } | HeartbeatRequired { .. } | HeartbeatDead { .. } => {
                ErrorKind::Liveness
            }

            MachineNotFound { .. } | ProcessNotFound { .. } | NotFound(_) => ErrorKind::NotFound,

            Network(_) | Api { .. } | Storage(_) | Serialization(_) => ErrorKind::Transport,

            PublicKeyMissing | PublicKeyInvalid(_) | Config(_) => ErrorKind::Configuration,
        }
    }

    /// Returns true for any not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true if a response was rejected for its date alone.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            Self::ResponseDateTooOld { .. } | Self::ResponseDateInFuture { .. }
        )
    }

    /// Returns true for authenticity failures.
    #[must_use]
    pub fn is_authenticity_failure(&self) -> bool {
        self.kind() == ErrorKind::Authenticity
    }

    /// Returns the not-found error for an entity of `kind`.
    pub(crate) fn not_found(kind: EntityKind, fingerprint: &str) -> Self {
        let fingerprint = fingerprint.to_string();
        match kind {
            EntityKind::Machine => Self::MachineNotFound { fingerprint },
            EntityKind::Process => Self::ProcessNotFound { fingerprint },
        }
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
