//! Property-based tests for the crypto primitives.
//!
//! These tests verify security properties that must always hold:
//! - Sealed payloads open with the right secret and nothing else
//! - Any single-byte change to ciphertext is detected
//! - Digests detect any change to the content
//! - Signatures bind the exact message bytes

use keyward_crypto::{
    digest, open, seal, verify_signature, KdfParams, SignatureAlgorithm, SigningKey,
};
use proptest::prelude::*;

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn plaintext_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..2048)
}

fn secret_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z0-9-]{8,40}").unwrap()
}

// =============================================================================
// SEAL / OPEN PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Opening with the sealing secret returns the original plaintext
    #[test]
    fn seal_open_roundtrip(plaintext in plaintext_strategy(), secret in secret_strategy()) {
        let params = KdfParams::insecure_fast();
        let sealed = seal(secret.as_bytes(), &plaintext, &params).unwrap();
        prop_assert_eq!(open(secret.as_bytes(), &sealed, &params).unwrap(), plaintext);
    }

    /// Any changed ciphertext byte fails authentication
    #[test]
    fn tampered_ciphertext_fails(
        plaintext in plaintext_strategy(),
        tamper_pos in any::<usize>(),
        flip in 1u8..=255,
    ) {
        let params = KdfParams::insecure_fast();
        let mut sealed = seal(b"secret", &plaintext, &params).unwrap();
        let pos = tamper_pos % sealed.ciphertext.len();
        sealed.ciphertext[pos] ^= flip;
        prop_assert!(open(b"secret", &sealed, &params).is_err());
    }
}

// =============================================================================
// DIGEST / SIGNATURE PROPERTIES
// =============================================================================

proptest! {
    /// A digest matches its own content and rejects any modification
    #[test]
    fn digest_detects_modification(
        content in plaintext_strategy(),
        pos in any::<usize>(),
        flip in 1u8..=255,
    ) {
        let d = digest(&content);
        prop_assert!(d.matches(&content));

        let mut modified = content.clone();
        let idx = pos % modified.len();
        modified[idx] ^= flip;
        prop_assert!(!d.matches(&modified));
    }

    /// Signatures verify over the signed bytes only
    #[test]
    fn signature_binds_message(message in plaintext_strategy(), other in plaintext_strategy()) {
        let sk = SigningKey::from_bytes(&[3u8; 32]);
        let sig = sk.sign(&message);
        prop_assert!(verify_signature(&sk.public_key(), &message, &sig, SignatureAlgorithm::Ed25519));
        if other != message {
            prop_assert!(!verify_signature(&sk.public_key(), &other, &sig, SignatureAlgorithm::Ed25519));
        }
    }
}
