//! Offline license and machine files.
//!
//! A file is an armored block around a base64 JSON envelope:
//!
//! ```text
//! -----BEGIN LICENSE FILE-----
//! eyJlbmMiOiIuLi4iLCJzaWciOiIuLi4iLCJhbGciOiJjaGFjaGEyMHBvbHkxMzA1K2VkMjU1MTkifQ==
//! -----END LICENSE FILE-----
//! ```
//!
//! `enc` is the sealed dataset (salt, nonce and ciphertext; the key is
//! derived from the file secret), `sig` is an Ed25519 signature over
//! `license/` or `machine/` followed by the decrypted dataset.
//!
//! Decryption failures and signature failures are logged differently but
//! reported as the same `*NotGenuine` error.

use crate::api::{LicenseData, MachineData};
use crate::error::{LicenseError, LicenseResult};
use crate::license::License;
use crate::machine::{EntityKind, HeartbeatState, Machine};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use keyward_crypto::{open, verify_signature, KdfParams, PublicKey, SealedData, SignatureAlgorithm};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Encrypted and signed.
pub const ALG_ENCRYPTED: &str = "chacha20poly1305+ed25519";
/// Signed only. Rejected: files must be encrypted.
pub const ALG_SIGNED: &str = "base64+ed25519";

/// Which kind of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    License,
    Machine,
}

impl FileKind {
    fn label(self) -> &'static str {
        match self {
            Self::License => "LICENSE FILE",
            Self::Machine => "MACHINE FILE",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::License => "license",
            Self::Machine => "machine",
        }
    }

    fn not_supported(self) -> LicenseError {
        match self {
            Self::License => LicenseError::LicenseFileNotSupported,
            Self::Machine => LicenseError::MachineFileNotSupported,
        }
    }

    fn not_encrypted(self) -> LicenseError {
        match self {
            Self::License => LicenseError::LicenseFileNotEncrypted,
            Self::Machine => LicenseError::MachineFileNotEncrypted,
        }
    }

    fn not_genuine(self) -> LicenseError {
        match self {
            Self::License => LicenseError::LicenseFileNotGenuine,
            Self::Machine => LicenseError::MachineFileNotGenuine,
        }
    }

    fn expired(self) -> LicenseError {
        match self {
            Self::License => LicenseError::LicenseFileExpired,
            Self::Machine => LicenseError::MachineFileExpired,
        }
    }

    /// Detects the kind from the armor header.
    fn detect(text: &str) -> Option<Self> {
        [Self::License, Self::Machine]
            .into_iter()
            .find(|k| text.contains(&format!("-----BEGIN {}-----", k.label())))
    }
}

/// The JSON envelope inside the armor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEnvelope {
    pub enc: String,
    pub sig: String,
    pub alg: String,
}

impl FileEnvelope {
    /// Wraps the envelope in armor for `kind`.
    pub fn armor(&self, kind: FileKind) -> LicenseResult<String> {
        let encoded = STANDARD.encode(serde_json::to_vec(self)?);
        let mut out = format!("-----BEGIN {}-----\n", kind.label());
        for chunk in encoded.as_bytes().chunks(76) {
            out.push_str(&String::from_utf8_lossy(chunk));
            out.push('\n');
        }
        out.push_str(&format!("-----END {}-----\n", kind.label()));
        Ok(out)
    }
}

/// Bytes the file signature covers.
#[must_use]
pub fn signing_data(kind: FileKind, plaintext: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(kind.prefix().len() + 1 + plaintext.len());
    data.extend_from_slice(kind.prefix().as_bytes());
    data.push(b'/');
    data.extend_from_slice(plaintext);
    data
}

/// Issue and expiry of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub issued: DateTime<Utc>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    /// Seconds the file is meant to live.
    #[serde(default)]
    pub ttl: Option<i64>,
}

/// Decrypted contents of a license file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseFileDataset {
    pub license: LicenseData,
    pub meta: FileMeta,
}

/// Decrypted contents of a machine file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineFileDataset {
    pub machine: MachineData,
    pub license: LicenseData,
    pub meta: FileMeta,
}

/// A verified license file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseFile {
    pub license: License,
    pub meta: FileMeta,
}

/// A verified machine file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineFile {
    pub machine: Machine,
    pub license: License,
    pub meta: FileMeta,
}

/// Either kind of verified file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifiedFile {
    License(LicenseFile),
    Machine(MachineFile),
}

/// Decrypts and authenticates offline files.
#[derive(Debug, Clone)]
pub struct FileVerifier {
    public_key: PublicKey,
    kdf: KdfParams,
}

impl FileVerifier {
    /// Creates a verifier for files signed by `public_key`.
    #[must_use]
    pub fn new(public_key: PublicKey, kdf: KdfParams) -> Self {
        Self { public_key, kdf }
    }

    /// Opens a file of either kind, detected from its armor.
    ///
    /// # Errors
    ///
    /// `LicenseFileNotSupported` if no armor is recognised; otherwise as
    /// [`open_license_file`](Self::open_license_file) and
    /// [`open_machine_file`](Self::open_machine_file).
    pub fn open_file(&self, raw: &[u8], secret: &str) -> LicenseResult<VerifiedFile> {
        let text = std::str::from_utf8(raw).map_err(|_| LicenseError::LicenseFileNotSupported)?;
        match FileKind::detect(text) {
            Some(FileKind::License) => self.open_license_file(raw, secret).map(VerifiedFile::License),
            Some(FileKind::Machine) => self.open_machine_file(raw, secret).map(VerifiedFile::Machine),
            None => Err(LicenseError::LicenseFileNotSupported),
        }
    }

    /// Opens a license file. The secret is the license key.
    pub fn open_license_file(&self, raw: &[u8], secret: &str) -> LicenseResult<LicenseFile> {
        let plaintext = self.verify(FileKind::License, raw, secret)?;
        let dataset: LicenseFileDataset = serde_json::from_slice(&plaintext)?;
        check_expiry(FileKind::License, &dataset.meta)?;

        let status = dataset.license.status;
        let license = License::from_data(dataset.license, status, dataset.meta.issued);
        debug!("Opened license file for license {}", license.id);
        Ok(LicenseFile {
            license,
            meta: dataset.meta,
        })
    }

    /// Opens a machine file. The secret is the license key followed by the
    /// machine fingerprint.
    pub fn open_machine_file(&self, raw: &[u8], secret: &str) -> LicenseResult<MachineFile> {
        let plaintext = self.verify(FileKind::Machine, raw, secret)?;
        let dataset: MachineFileDataset = serde_json::from_slice(&plaintext)?;
        check_expiry(FileKind::Machine, &dataset.meta)?;

        let status = dataset.license.status;
        let license = License::from_data(dataset.license, status, dataset.meta.issued);
        let machine = Machine {
            id: dataset.machine.id,
            kind: EntityKind::Machine,
            fingerprint: dataset.machine.fingerprint,
            license_id: license.id.clone(),
            activated_at: dataset.machine.created.unwrap_or(dataset.meta.issued),
            last_heartbeat_at: None,
            heartbeat: HeartbeatState::Alive,
        };
        debug!("Opened machine file for {}", machine.fingerprint);
        Ok(MachineFile {
            machine,
            license,
            meta: dataset.meta,
        })
    }

    /// Parses, decrypts and verifies, returning the genuine plaintext.
    fn verify(&self, kind: FileKind, raw: &[u8], secret: &str) -> LicenseResult<Vec<u8>> {
        let envelope = parse_armor(kind, raw).ok_or_else(|| kind.not_supported())?;

        match envelope.alg.as_str() {
            ALG_ENCRYPTED => {}
            ALG_SIGNED => return Err(kind.not_encrypted()),
            other => {
                warn!("{} uses unsupported algorithm {other:?}", kind.prefix());
                return Err(kind.not_supported());
            }
        }

        if secret.is_empty() {
            return Err(LicenseError::LicenseFileSecretMissing);
        }

        let sealed = SealedData::decode(&envelope.enc).map_err(|e| {
            warn!("{} file rejected: malformed ciphertext: {e}", kind.prefix());
            kind.not_genuine()
        })?;
        let plaintext = open(secret.as_bytes(), &sealed, &self.kdf).map_err(|e| {
            warn!("{} file rejected: decryption failed: {e}", kind.prefix());
            kind.not_genuine()
        })?;

        let signature = STANDARD.decode(envelope.sig.trim()).map_err(|_| {
            warn!("{} file rejected: signature is not base64", kind.prefix());
            kind.not_genuine()
        })?;
        if !verify_signature(
            &self.public_key,
            &signing_data(kind, &plaintext),
            &signature,
            SignatureAlgorithm::Ed25519,
        ) {
            warn!("{} file rejected: signature does not verify", kind.prefix());
            return Err(kind.not_genuine());
        }

        Ok(plaintext)
    }
}

fn parse_armor(kind: FileKind, raw: &[u8]) -> Option<FileEnvelope> {
    let text = std::str::from_utf8(raw).ok()?;
    let begin = format!("-----BEGIN {}-----", kind.label());
    let end = format!("-----END {}-----", kind.label());

    let start = text.find(&begin)? + begin.len();
    let stop = start + text[start..].find(&end)?;
    let body: String = text[start..stop]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let json = STANDARD.decode(body).ok()?;
    serde_json::from_slice(&json).ok()
}

fn check_expiry(kind: FileKind, meta: &FileMeta) -> LicenseResult<()> {
    if meta.expiry.is_some_and(|exp| exp <= Utc::now()) {
        warn!("{} file is expired", kind.prefix());
        return Err(kind.expired());
    }
    Ok(())
}
