//! AES-256-GCM sealed channel for the pairing payload.
//!
//! Wire layout of a sealed blob:
//! ```text
//! [nonce:12][ciphertext:N][tag:16]
//! ```
//! An empty plaintext seals to exactly 28 bytes.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::crypto::{CryptoError, SharedKey};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Smallest blob [`open`] will attempt to decrypt.
pub const MIN_SEALED_LEN: usize = NONCE_LEN + TAG_LEN;

/// Encrypts `plaintext` under `key` with a fresh random nonce.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the cipher refuses the input.
pub fn seal(plaintext: &[u8], key: &SharedKey) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a blob produced by [`seal`].
///
/// # Errors
///
/// - [`CryptoError::TooShort`] when `blob` is under [`MIN_SEALED_LEN`] bytes.
/// - [`CryptoError::AuthenticationFailed`] when the key is wrong or any byte
///   was altered.
pub fn open(blob: &[u8], key: &SharedKey) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < MIN_SEALED_LEN {
        return Err(CryptoError::TooShort { len: blob.len() });
    }
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailed)
}
