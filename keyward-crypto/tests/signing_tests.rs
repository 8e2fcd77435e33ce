use keyward_crypto::{
    verify_signature, CryptoError, PublicKey, SignatureAlgorithm, SigningKey, PUBLIC_KEY_SIZE,
};

fn signing_key() -> SigningKey {
    let seed: [u8; 32] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24,
        25, 26, 27, 28, 29, 30, 31, 32,
    ];
    SigningKey::from_bytes(&seed)
}

#[test]
fn verify_accepts_valid_signature() {
    let sk = signing_key();
    let sig = sk.sign(b"date: x\ndigest: y");
    assert!(verify_signature(
        &sk.public_key(),
        b"date: x\ndigest: y",
        &sig,
        SignatureAlgorithm::Ed25519
    ));
}

#[test]
fn verify_rejects_wrong_key() {
    let sig = signing_key().sign(b"message");
    let other = SigningKey::from_bytes(&[9u8; 32]).public_key();
    assert!(!verify_signature(
        &other,
        b"message",
        &sig,
        SignatureAlgorithm::Ed25519
    ));
}

#[test]
fn verify_rejects_flipped_signature_byte() {
    let sk = signing_key();
    let mut sig = sk.sign(b"message");
    sig[10] ^= 0x01;
    assert!(!verify_signature(
        &sk.public_key(),
        b"message",
        &sig,
        SignatureAlgorithm::Ed25519
    ));
}

// ── PublicKey ────────────────────────────────────────────────────

#[test]
fn public_key_hex_roundtrip() {
    let pk = signing_key().public_key();
    let hex = pk.to_hex();
    assert_eq!(hex.len(), PUBLIC_KEY_SIZE * 2);
    assert_eq!(PublicKey::from_hex(&hex).unwrap(), pk);
}

#[test]
fn public_key_bytes_roundtrip() {
    let pk = signing_key().public_key();
    assert_eq!(PublicKey::from_bytes(&pk.to_bytes()).unwrap(), pk);
}

#[test]
fn empty_public_key_is_rejected() {
    assert!(matches!(
        PublicKey::from_hex("  "),
        Err(CryptoError::InvalidPublicKey(_))
    ));
    assert!(matches!(
        PublicKey::from_bytes(&[]),
        Err(CryptoError::InvalidPublicKey(_))
    ));
}

#[test]
fn malformed_public_key_is_rejected() {
    assert!(matches!(
        PublicKey::from_hex("zz"),
        Err(CryptoError::Encoding(_))
    ));
    assert!(matches!(
        PublicKey::from_bytes(&[1u8; 16]),
        Err(CryptoError::InvalidKeyLength {
            expected: 32,
            actual: 16
        })
    ));
}

// ── SignatureAlgorithm ───────────────────────────────────────────

#[test]
fn algorithm_parse() {
    assert_eq!(
        "ed25519".parse::<SignatureAlgorithm>().unwrap(),
        SignatureAlgorithm::Ed25519
    );
    assert_eq!(
        "ED25519".parse::<SignatureAlgorithm>().unwrap(),
        SignatureAlgorithm::Ed25519
    );
}

#[test]
fn unknown_algorithm_fails_closed() {
    let err = "rsa-sha256".parse::<SignatureAlgorithm>().unwrap_err();
    assert!(matches!(err, CryptoError::UnsupportedAlgorithm(name) if name == "rsa-sha256"));
}

#[test]
fn algorithm_display() {
    assert_eq!(SignatureAlgorithm::Ed25519.to_string(), "ed25519");
}
