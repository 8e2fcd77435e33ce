mod common;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration as ChronoDuration, Utc};
use common::{file_meta, license_data, make_file, test_signing_key, LICENSE_KEY};
use keyward_crypto::KdfParams;
use keyward_license::{
    FileKind, FileVerifier, License, LicenseData, LicenseError, LicenseFileDataset,
    LicenseStatus, SCHEME_ED25519_SIGN,
};

/// Builds a license through the only public path: a verified file.
fn license_from(data: LicenseData) -> License {
    let dataset = LicenseFileDataset {
        license: data,
        meta: file_meta(None),
    };
    let raw = make_file(&test_signing_key(), FileKind::License, &dataset, LICENSE_KEY);
    FileVerifier::new(test_signing_key().public_key(), KdfParams::insecure_fast())
        .open_license_file(raw.as_bytes(), LICENSE_KEY)
        .unwrap()
        .license
}

// ── LicenseStatus ────────────────────────────────────────────────

#[test]
fn only_active_is_usable() {
    assert!(LicenseStatus::Active.is_usable());
    assert!(!LicenseStatus::Suspended.is_usable());
    assert!(!LicenseStatus::Expired.is_usable());
    assert!(!LicenseStatus::NotActivated.is_usable());
}

#[test]
fn status_wire_names() {
    assert_eq!(
        serde_json::to_string(&LicenseStatus::NotActivated).unwrap(),
        r#""NOT_ACTIVATED""#
    );
    let parse = |s: &str| serde_json::from_str::<LicenseStatus>(s).unwrap();
    assert_eq!(parse(r#""ACTIVE""#), LicenseStatus::Active);
    assert_eq!(parse(r#""EXPIRING""#), LicenseStatus::Active);
    assert_eq!(parse(r#""INACTIVE""#), LicenseStatus::Active);
    assert_eq!(parse(r#""BANNED""#), LicenseStatus::Suspended);
    assert_eq!(parse(r#""EXPIRED""#), LicenseStatus::Expired);
}

// ── License ──────────────────────────────────────────────────────

#[test]
fn accessors() {
    let license = license_from(license_data());
    assert_eq!(license.name.as_deref(), Some("Test License"));
    assert_eq!(license.max_machines, Some(2));
    assert!(license.has_entitlement("PRO_FEATURE"));
    assert!(!license.has_entitlement("ENTERPRISE"));
    assert_eq!(license.entitlements().len(), 1);
    assert!(license.machines().is_empty());
}

#[test]
fn expiry() {
    let mut data = license_data();
    data.expiry = Some(Utc::now() + ChronoDuration::days(1));
    let license = license_from(data);
    assert!(!license.is_expired_at(Utc::now()));
    assert!(license.is_expired_at(Utc::now() + ChronoDuration::days(2)));

    assert!(!license_from(license_data()).is_expired_at(Utc::now()));
}

#[test]
fn signed_key_verifies_offline() {
    let payload_b64 = URL_SAFE_NO_PAD.encode(r#"{"id":"lic-1"}"#);
    let signature = test_signing_key().sign(format!("key/{payload_b64}").as_bytes());
    let mut data = license_data();
    data.key = format!("key/{payload_b64}.{}", URL_SAFE_NO_PAD.encode(signature));
    data.scheme = Some(SCHEME_ED25519_SIGN.into());

    let license = license_from(data);
    let signed = license.verify_key(&test_signing_key().public_key()).unwrap();
    assert_eq!(signed.payload(), br#"{"id":"lic-1"}"#);
}

#[test]
fn unsigned_key_has_no_scheme() {
    let license = license_from(license_data());
    let err = license
        .verify_key(&test_signing_key().public_key())
        .unwrap_err();
    assert!(matches!(err, LicenseError::LicenseSchemeMissing));
}
