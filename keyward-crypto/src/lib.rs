//! Crypto primitives for keyward.
//!
//! - SHA-256 content digests in `Digest` header form
//! - Ed25519 signature verification against a configured public key
//! - Argon2id key derivation and ChaCha20-Poly1305 decryption for
//!   encrypted license and machine files
//!
//! Every operation is pure. Failures are typed; no partial plaintext is ever
//! returned next to an error.

mod cipher;
mod digest;
mod error;
mod key;
mod signing;

pub use cipher::{decrypt, encrypt, open, seal, SealedData, NONCE_SIZE, TAG_SIZE};
pub use digest::{digest, ContentDigest, DIGEST_SIZE};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use signing::{
    verify_signature, PublicKey, SignatureAlgorithm, SigningKey, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
