//! Pairing cryptography.
//!
//! # How the pairing code becomes trust (for beginners)
//!
//! The sensor displays a 6-digit code.  Six digits are far too weak to be a
//! key by themselves, so the code is only used to *prove knowledge* and to
//! *bind* a derived key to this one handshake:
//!
//! 1. **`auth`** – The sensor sends a random challenge.  Both sides compute
//!    `HMAC-SHA256(key = code, msg = challenge)`.  Matching tags prove both
//!    ends saw the same code without ever sending it.  The sensor answers
//!    with a counter-tag over `challenge || client tag` so the client can
//!    check the sensor knows the code too.
//!
//! 2. **`kdf`** – The client mixes the code, the challenge, a fresh client
//!    nonce and the sensor's identity through HKDF-SHA256 to obtain a 256-bit
//!    shared key that is unique to this attempt.
//!
//! 3. **`sealed`** – The certificate request is encrypted under that key with
//!    AES-256-GCM, so a passive observer on the LAN learns nothing and an
//!    active one cannot tamper without the tag failing.
//!
//! 4. **`keys`** – The client's long-term P-256 key pair, which signs the
//!    certificate request and later authenticates the TLS session.

use thiserror::Error;

use crate::codec::CodecError;

pub mod auth;
pub mod kdf;
pub mod keys;
pub mod sealed;

pub use auth::{
    compute_auth_tag, compute_sensor_tag, verify_auth_tag, verify_sensor_tag, AUTH_TAG_LEN,
};
pub use kdf::{derive_shared_key, generate_client_nonce, SharedKey, CLIENT_NONCE_LEN, PAIRING_INFO};
pub use keys::ClientKeyPair;
pub use sealed::{open, seal, MIN_SEALED_LEN, NONCE_LEN, TAG_LEN};

/// Errors from the pairing cryptography.
///
/// None of these are retried with the same inputs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Input bytes or text had the wrong shape (bad hex, malformed key).
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// A sealed blob is shorter than nonce plus tag.
    #[error("sealed payload too short: {len} bytes, need at least {MIN_SEALED_LEN}")]
    TooShort { len: usize },

    /// The AEAD tag or an HMAC did not verify.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Encryption could not be performed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// HKDF could not produce the requested key length.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// The platform RNG or key generator failed.
    #[error("key generation failed")]
    KeyGeneration,

    /// A stored private key was rejected.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// The signer refused to produce a signature.
    #[error("signing failed")]
    Signing,
}

impl From<CodecError> for CryptoError {
    fn from(e: CodecError) -> Self {
        CryptoError::InvalidEncoding(e.to_string())
    }
}
