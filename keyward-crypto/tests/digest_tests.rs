use keyward_crypto::{digest, ContentDigest, CryptoError};

#[test]
fn digest_is_deterministic() {
    assert_eq!(digest(b"body"), digest(b"body"));
    assert_ne!(digest(b"body"), digest(b"other"));
}

#[test]
fn known_sha256_vector() {
    // SHA-256("abc")
    let d = digest(b"abc");
    assert_eq!(
        d.to_header(),
        "sha-256=ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
    );
}

#[test]
fn header_roundtrip() {
    let d = digest(b"{\"data\":null}");
    let parsed = ContentDigest::from_header(&d.to_header()).unwrap();
    assert_eq!(parsed, d);
    assert!(parsed.matches(b"{\"data\":null}"));
}

#[test]
fn header_label_is_case_insensitive() {
    let d = digest(b"x");
    let upper = d.to_header().replacen("sha-256", "SHA-256", 1);
    assert_eq!(ContentDigest::from_header(&upper).unwrap(), d);
}

#[test]
fn matches_rejects_other_content() {
    assert!(!digest(b"original").matches(b"tampered"));
}

#[test]
fn from_header_rejects_unknown_algorithm() {
    let err = ContentDigest::from_header("md5=abcd").unwrap_err();
    assert!(matches!(err, CryptoError::InvalidDigest(_)));
}

#[test]
fn from_header_rejects_missing_label() {
    assert!(ContentDigest::from_header("ungWv48Bz").is_err());
}

#[test]
fn from_header_rejects_wrong_length() {
    assert!(ContentDigest::from_header("sha-256=AAAA").is_err());
}
