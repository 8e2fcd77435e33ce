//! Authenticated decryption using ChaCha20-Poly1305.
//!
//! Encrypted files carry their own salt and nonce. The sealed form is
//! `base64(salt).base64(nonce).base64(ciphertext)`; the ciphertext includes
//! the Poly1305 tag.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, DerivedKey, KdfParams, Salt};
use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

/// Size of nonce in bytes (96 bits for ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Size of authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Salt, nonce and ciphertext of a sealed payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedData {
    /// Salt for deriving the key from the secret.
    pub salt: Salt,
    /// The nonce used for encryption.
    pub nonce: [u8; NONCE_SIZE],
    /// The encrypted ciphertext (includes auth tag).
    pub ciphertext: Vec<u8>,
}

impl SealedData {
    /// Encodes as `base64(salt).base64(nonce).base64(ciphertext)`.
    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}",
            STANDARD.encode(self.salt.as_bytes()),
            STANDARD.encode(self.nonce),
            STANDARD.encode(&self.ciphertext)
        )
    }

    /// Decodes the dotted base64 form.
    pub fn decode(encoded: &str) -> CryptoResult<Self> {
        let parts: Vec<&str> = encoded.trim().split('.').collect();
        let &[salt_b64, nonce_b64, ciphertext_b64] = parts.as_slice() else {
            return Err(CryptoError::Encoding(format!(
                "expected 3 dot-separated parts, got {}",
                parts.len()
            )));
        };

        let decode = |part: &str, what: &str| {
            STANDARD
                .decode(part)
                .map_err(|e| CryptoError::Encoding(format!("invalid {what} base64: {e}")))
        };

        let salt = Salt::from_slice(&decode(salt_b64, "salt")?)?;
        let nonce_bytes = decode(nonce_b64, "nonce")?;
        let nonce: [u8; NONCE_SIZE] =
            nonce_bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: nonce_bytes.len(),
                })?;
        let ciphertext = decode(ciphertext_b64, "ciphertext")?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Decryption("data too short".to_string()));
        }

        Ok(Self {
            salt,
            nonce,
            ciphertext,
        })
    }
}

/// Encrypts plaintext using ChaCha20-Poly1305 with a random nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<([u8; NONCE_SIZE], Vec<u8>)> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypts ciphertext using ChaCha20-Poly1305.
///
/// Fails without returning any plaintext if the tag does not verify.
pub fn decrypt(key: &DerivedKey, nonce: &[u8], ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            actual: nonce.len(),
        });
    }
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = Nonce::from_slice(nonce);

    cipher.decrypt(nonce, ciphertext).map_err(|_| {
        CryptoError::Decryption("decryption failed (wrong key or tampered data)".to_string())
    })
}

/// Derives a key from `secret` with a fresh salt and encrypts `plaintext`.
pub fn seal(secret: &[u8], plaintext: &[u8], params: &KdfParams) -> CryptoResult<SealedData> {
    let salt = Salt::random();
    let key = derive_key(secret, &salt, params)?;
    let (nonce, ciphertext) = encrypt(&key, plaintext)?;
    Ok(SealedData {
        salt,
        nonce,
        ciphertext,
    })
}

/// Derives the key for `sealed` from `secret` and decrypts it.
///
/// The derived key is dropped (and zeroized) before this returns.
pub fn open(secret: &[u8], sealed: &SealedData, params: &KdfParams) -> CryptoResult<Vec<u8>> {
    let key = derive_key(secret, &sealed.salt, params)?;
    decrypt(&key, &sealed.nonce, &sealed.ciphertext)
}
