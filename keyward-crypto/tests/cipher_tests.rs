use keyward_crypto::{
    decrypt, derive_key, encrypt, open, seal, CryptoError, DerivedKey, KdfParams, Salt,
    SealedData, NONCE_SIZE, TAG_SIZE,
};

fn key(byte: u8) -> DerivedKey {
    derive_key(&[byte], &Salt::from_bytes([byte; 16]), &KdfParams::insecure_fast()).unwrap()
}

#[test]
fn encrypt_decrypt_roundtrip() {
    let key = key(1);
    let plaintext = b"Hello, World!";
    let (nonce, ciphertext) = encrypt(&key, plaintext).unwrap();
    let decrypted = decrypt(&key, &nonce, &ciphertext).unwrap();
    assert_eq!(decrypted, plaintext);
}

#[test]
fn encrypt_decrypt_empty() {
    let key = key(1);
    let (nonce, ciphertext) = encrypt(&key, b"").unwrap();
    assert_eq!(ciphertext.len(), TAG_SIZE);
    assert_eq!(decrypt(&key, &nonce, &ciphertext).unwrap(), b"");
}

#[test]
fn wrong_key_fails_decryption() {
    let (nonce, ciphertext) = encrypt(&key(1), b"Secret").unwrap();
    let err = decrypt(&key(2), &nonce, &ciphertext).unwrap_err();
    assert!(matches!(err, CryptoError::Decryption(_)));
}

#[test]
fn tampered_data_fails_decryption() {
    let key = key(1);
    let (nonce, mut ciphertext) = encrypt(&key, b"Secret").unwrap();
    ciphertext[0] ^= 0xFF;
    assert!(decrypt(&key, &nonce, &ciphertext).is_err());
}

#[test]
fn short_nonce_is_rejected() {
    let key = key(1);
    let (_, ciphertext) = encrypt(&key, b"Secret").unwrap();
    let err = decrypt(&key, &[0u8; 8], &ciphertext).unwrap_err();
    assert!(matches!(
        err,
        CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: 8
        }
    ));
}

#[test]
fn same_plaintext_produces_different_ciphertext() {
    let key = key(1);
    let (n1, c1) = encrypt(&key, b"Same").unwrap();
    let (n2, c2) = encrypt(&key, b"Same").unwrap();
    assert_ne!(n1, n2);
    assert_ne!(c1, c2);
}

// ── seal / open ──────────────────────────────────────────────────

#[test]
fn seal_open_roundtrip() {
    let params = KdfParams::insecure_fast();
    let sealed = seal(b"license-key", b"{\"id\":1}", &params).unwrap();
    let opened = open(b"license-key", &sealed, &params).unwrap();
    assert_eq!(opened, b"{\"id\":1}");
}

#[test]
fn open_with_wrong_secret_fails() {
    let params = KdfParams::insecure_fast();
    let sealed = seal(b"license-key", b"payload", &params).unwrap();
    assert!(open(b"other-key", &sealed, &params).is_err());
}

#[test]
fn open_matches_manual_derivation() {
    let params = KdfParams::insecure_fast();
    let sealed = seal(b"secret", b"payload", &params).unwrap();
    let key = derive_key(b"secret", &sealed.salt, &params).unwrap();
    assert_eq!(
        decrypt(&key, &sealed.nonce, &sealed.ciphertext).unwrap(),
        b"payload"
    );
}

// ── SealedData encoding ──────────────────────────────────────────

#[test]
fn sealed_data_encode_decode() {
    let params = KdfParams::insecure_fast();
    let sealed = seal(b"secret", b"payload", &params).unwrap();
    let encoded = sealed.encode();
    assert_eq!(encoded.split('.').count(), 3);
    assert_eq!(SealedData::decode(&encoded).unwrap(), sealed);
}

#[test]
fn sealed_data_rejects_wrong_part_count() {
    assert!(matches!(
        SealedData::decode("a.b"),
        Err(CryptoError::Encoding(_))
    ));
    assert!(SealedData::decode("a.b.c.d").is_err());
}

#[test]
fn sealed_data_rejects_bad_base64() {
    assert!(SealedData::decode("!!!.!!!.!!!").is_err());
}

#[test]
fn sealed_data_rejects_short_ciphertext() {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let encoded = format!(
        "{}.{}.{}",
        STANDARD.encode(Salt::from_bytes([1; 16]).as_bytes()),
        STANDARD.encode([0u8; NONCE_SIZE]),
        STANDARD.encode([0u8; 4])
    );
    assert!(matches!(
        SealedData::decode(&encoded),
        Err(CryptoError::Decryption(_))
    ));
}
