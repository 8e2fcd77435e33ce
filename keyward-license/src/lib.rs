//! License validation, activation and heartbeat monitoring for keyward.
//!
//! This crate handles:
//! - Authentication of signed API responses (digest, signature, freshness)
//! - Offline verification of encrypted license and machine files
//! - An activation ledger enforcing fingerprint uniqueness and limits
//! - Per-entity heartbeat workers with dead-man detection
//! - The [`LicenseOrchestrator`] tying them together
//!
//! # Design Principles
//!
//! - **Fail closed**: no field of a response or file is read before it has
//!   been authenticated
//! - **Ledger first**: the ledger, not the last-seen license, decides what
//!   is activated
//! - **Swappable plumbing**: transport and persistence are traits; the HTTP
//!   transport lives behind the `online` feature

mod api;
mod authenticator;
mod config;
mod device;
mod envelope;
mod error;
mod file;
mod heartbeat;
mod key;
mod ledger;
mod license;
mod machine;
mod orchestrator;
mod store;
mod transport;

#[cfg(feature = "online")]
mod http;

pub use api::{
    ApiError, ErrorDocument, LicenseData, MachineData, MachineDocument, ReleaseData,
    ReleaseDocument, ValidationDocument, ValidationMeta,
};
pub use authenticator::{Authenticated, ResponseAuthenticator};
pub use config::{
    FreshnessConfig, HeartbeatConfig, LicenseConfig, ValidationScope, DEFAULT_API_URL,
};
pub use device::{DeviceFingerprint, DeviceInfo};
pub use envelope::{
    http_date, parse_http_date, signing_string, FreshnessContext, RequestTarget, SignedEnvelope,
};
pub use error::{ErrorKind, LicenseError, LicenseResult};
pub use file::{
    signing_data, FileEnvelope, FileKind, FileMeta, FileVerifier, LicenseFile,
    LicenseFileDataset, MachineFile, MachineFileDataset, VerifiedFile, ALG_ENCRYPTED, ALG_SIGNED,
};
pub use heartbeat::{DeadCallback, HeartbeatMonitor, Pinger};
pub use key::{SignedKey, SCHEME_ED25519_SIGN};
pub use ledger::{ActivationLedger, EntryKey, LedgerLimits, MissOutcome};
pub use license::{Entitlement, License, LicenseStatus};
pub use machine::{EntityKind, HeartbeatState, Machine};
pub use orchestrator::{LicenseOrchestrator, OrchestratorBuilder, Upgrade};
pub use store::{FileStore, MemoryStore, Store};
pub use transport::{Request, Transport};

#[cfg(feature = "online")]
pub use http::HttpTransport;
