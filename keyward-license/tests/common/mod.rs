//! Shared test helpers for license tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use keyward_crypto::{digest, seal, KdfParams, SigningKey};
use keyward_license::{
    http_date, signing_data, signing_string, ApiError, EntityKind, Entitlement, ErrorDocument,
    FileEnvelope, FileKind, FileMeta, FreshnessContext, HeartbeatConfig, LicenseConfig,
    LicenseData, LicenseError, LicenseResult, LicenseStatus, MachineData, MachineDocument,
    ReleaseData, ReleaseDocument, Request, SignedEnvelope, Transport, ValidationDocument,
    ValidationMeta, ALG_ENCRYPTED,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const LICENSE_ID: &str = "lic-1";
pub const LICENSE_KEY: &str = "ABCD-1234-EFGH-5678";

/// Returns a deterministic Ed25519 signing key from a fixed seed.
pub fn test_signing_key() -> SigningKey {
    let seed: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    SigningKey::from_bytes(&seed)
}

/// A signing key the client does not trust.
pub fn other_signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

/// Hex public key matching [`test_signing_key`].
pub fn public_key_hex() -> String {
    test_signing_key().public_key().to_hex()
}

/// Signs `body` as of `date`, with no request target.
pub fn sign_envelope(sk: &SigningKey, body: &[u8], date: DateTime<Utc>) -> SignedEnvelope {
    let date = http_date(date);
    let digest = digest(body).to_header();
    let signature = sk.sign(signing_string(None, &date, &digest).as_bytes());
    SignedEnvelope::new(body.to_vec())
        .with_digest(digest)
        .with_date(date)
        .with_signature(STANDARD.encode(signature))
}

/// A freshness window with the default bounds anchored at now.
pub fn fresh_context() -> FreshnessContext {
    FreshnessContext::new(Duration::from_secs(300), Duration::from_secs(60))
}

/// A configuration trusting [`test_signing_key`], with fast file KDF and
/// short heartbeat timings.
pub fn test_config() -> LicenseConfig {
    LicenseConfig {
        account: "acme".into(),
        product: Some("prod-1".into()),
        license_key: LICENSE_KEY.into(),
        public_key: public_key_hex(),
        file_kdf: KdfParams::insecure_fast(),
        heartbeat: HeartbeatConfig {
            interval: Duration::from_secs(10),
            miss_threshold: 3,
            dead_after: Duration::from_secs(3600),
            ping_timeout: Duration::from_secs(5),
            ping_retries: 1,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(4),
            required: false,
        },
        ..LicenseConfig::default()
    }
}

pub fn license_data() -> LicenseData {
    LicenseData {
        id: LICENSE_ID.into(),
        key: LICENSE_KEY.into(),
        name: Some("Test License".into()),
        scheme: None,
        status: LicenseStatus::Active,
        expiry: None,
        max_machines: Some(2),
        max_processes: None,
        require_heartbeat: false,
        entitlements: vec![Entitlement::new("PRO_FEATURE")],
    }
}

/// Seals and signs `dataset` into an armored file.
pub fn make_file<T: Serialize>(sk: &SigningKey, kind: FileKind, dataset: &T, secret: &str) -> String {
    let plaintext = serde_json::to_vec(dataset).unwrap();
    let sealed = seal(secret.as_bytes(), &plaintext, &KdfParams::insecure_fast()).unwrap();
    let signature = sk.sign(&signing_data(kind, &plaintext));
    FileEnvelope {
        enc: sealed.encode(),
        sig: STANDARD.encode(signature),
        alg: ALG_ENCRYPTED.into(),
    }
    .armor(kind)
    .unwrap()
}

pub fn file_meta(expiry: Option<DateTime<Utc>>) -> FileMeta {
    FileMeta {
        issued: Utc::now() - ChronoDuration::minutes(1),
        expiry,
        ttl: expiry.map(|_| 3600),
    }
}

/// How the fake server answers pings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingMode {
    Ok,
    /// Transport error.
    Fail,
    /// Signed `*_HEARTBEAT_DEAD` error.
    Dead,
    /// Never answers.
    Hang,
}

#[derive(Debug)]
struct ServerState {
    activations: HashSet<(EntityKind, String)>,
    ping_mode: PingMode,
    validation_code: Option<String>,
    release: Option<ReleaseData>,
    sign_with: SigningKey,
    tamper_body: bool,
    date_offset: ChronoDuration,
    drop_deactivations: bool,
}

/// An in-process licensing server that signs every response.
#[derive(Debug)]
pub struct FakeServer {
    state: Mutex<ServerState>,
    pings: AtomicUsize,
    requests: AtomicUsize,
}

impl Default for FakeServer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState {
                activations: HashSet::new(),
                ping_mode: PingMode::Ok,
                validation_code: None,
                release: None,
                sign_with: test_signing_key(),
                tamper_body: false,
                date_offset: ChronoDuration::zero(),
                drop_deactivations: false,
            }),
            pings: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn set_ping_mode(&self, mode: PingMode) {
        self.state.lock().unwrap().ping_mode = mode;
    }

    /// Forces the validation code regardless of activations.
    pub fn set_validation_code(&self, code: &str) {
        self.state.lock().unwrap().validation_code = Some(code.to_string());
    }

    pub fn set_release(&self, release: Option<ReleaseData>) {
        self.state.lock().unwrap().release = release;
    }

    pub fn sign_with(&self, sk: SigningKey) {
        self.state.lock().unwrap().sign_with = sk;
    }

    pub fn tamper_body(&self, on: bool) {
        self.state.lock().unwrap().tamper_body = on;
    }

    pub fn shift_dates(&self, offset: ChronoDuration) {
        self.state.lock().unwrap().date_offset = offset;
    }

    /// Makes deactivation requests fail at the transport.
    pub fn drop_deactivations(&self, on: bool) {
        self.state.lock().unwrap().drop_deactivations = on;
    }

    pub fn is_activated(&self, kind: EntityKind, fingerprint: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .activations
            .contains(&(kind, fingerprint.to_string()))
    }

    /// Drops an activation server-side only.
    pub fn forget(&self, kind: EntityKind, fingerprint: &str) {
        self.state
            .lock()
            .unwrap()
            .activations
            .remove(&(kind, fingerprint.to_string()));
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn respond<T: Serialize>(&self, doc: &T) -> SignedEnvelope {
        let state = self.state.lock().unwrap();
        let body = serde_json::to_vec(doc).unwrap();
        let mut envelope = sign_envelope(&state.sign_with, &body, Utc::now() + state.date_offset);
        if state.tamper_body {
            envelope.body[0] ^= 0x01;
        }
        envelope
    }

    fn error(&self, code: &str, detail: &str) -> SignedEnvelope {
        self.respond(&ErrorDocument {
            errors: vec![ApiError {
                title: "Error".into(),
                detail: detail.into(),
                code: Some(code.into()),
            }],
        })
    }

    fn validate(&self, fingerprint: Option<String>) -> SignedEnvelope {
        let forced = self.state.lock().unwrap().validation_code.clone();
        let code = match (forced, fingerprint) {
            (Some(code), _) => code,
            (None, Some(fp)) if !self.is_activated(EntityKind::Machine, &fp) => {
                "NO_MACHINE".to_string()
            }
            _ => "VALID".to_string(),
        };
        self.respond(&ValidationDocument {
            data: Some(license_data()),
            meta: ValidationMeta {
                valid: code == "VALID",
                code,
                detail: String::new(),
            },
        })
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, request: Request) -> LicenseResult<SignedEnvelope> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match request {
            Request::Validate { fingerprint, .. } => Ok(self.validate(fingerprint)),
            Request::Activate {
                kind, fingerprint, ..
            } => {
                let inserted = self
                    .state
                    .lock()
                    .unwrap()
                    .activations
                    .insert((kind, fingerprint.clone()));
                if !inserted {
                    return Ok(self.error("FINGERPRINT_TAKEN", "fingerprint has already been taken"));
                }
                Ok(self.respond(&MachineDocument {
                    data: MachineData {
                        id: format!("srv-{fingerprint}"),
                        fingerprint,
                        created: Some(Utc::now()),
                    },
                }))
            }
            Request::Deactivate {
                kind, fingerprint, ..
            } => {
                if self.state.lock().unwrap().drop_deactivations {
                    return Err(LicenseError::Network("connection reset".into()));
                }
                let removed = self
                    .state
                    .lock()
                    .unwrap()
                    .activations
                    .remove(&(kind, fingerprint));
                if removed {
                    Ok(self.respond(&serde_json::json!({ "meta": {} })))
                } else {
                    Ok(self.error("NOT_FOUND", "machine not found"))
                }
            }
            Request::Ping {
                kind, fingerprint, ..
            } => {
                self.pings.fetch_add(1, Ordering::SeqCst);
                let mode = self.state.lock().unwrap().ping_mode;
                match mode {
                    PingMode::Ok => Ok(self.respond(&MachineDocument {
                        data: MachineData {
                            id: format!("srv-{fingerprint}"),
                            fingerprint,
                            created: None,
                        },
                    })),
                    PingMode::Fail => Err(LicenseError::Network("connection refused".into())),
                    PingMode::Dead => {
                        let code = match kind {
                            EntityKind::Machine => "MACHINE_HEARTBEAT_DEAD",
                            EntityKind::Process => "PROCESS_HEARTBEAT_DEAD",
                        };
                        Ok(self.error(code, "heartbeat is dead"))
                    }
                    PingMode::Hang => std::future::pending().await,
                }
            }
            Request::Upgrade { .. } => {
                let release = self.state.lock().unwrap().release.clone();
                Ok(self.respond(&ReleaseDocument { data: release }))
            }
        }
    }
}

/// Installs a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("keyward_license=debug")
        .with_test_writer()
        .try_init();
}
