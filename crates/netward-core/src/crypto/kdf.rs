//! Shared-key derivation for the sealed pairing payload.

use std::fmt;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::CryptoError;

/// Size of the derived key in bytes (AES-256).
pub const SHARED_KEY_LEN: usize = 32;

/// Size of the client nonce contributed to each handshake.
pub const CLIENT_NONCE_LEN: usize = 32;

/// HKDF `info` label.  Both ends must use the identical literal.
pub const PAIRING_INFO: &[u8] = b"netward/pairing/v1";

/// A 256-bit symmetric key that lives only for one handshake.
///
/// The bytes are wiped when the value is dropped, and `Debug` never prints
/// them.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedKey(Zeroizing<[u8; SHARED_KEY_LEN]>);

impl SharedKey {
    pub fn from_bytes(bytes: [u8; SHARED_KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

/// Derives the handshake key with HKDF-SHA256.
///
/// - IKM: `code || challenge || client_nonce`
/// - salt: the sensor identity string as UTF-8
/// - info: [`PAIRING_INFO`]
///
/// Pure: identical inputs always give the identical key, and changing any
/// one of the four inputs changes it.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if HKDF rejects the output length.
pub fn derive_shared_key(
    code: &str,
    challenge: &[u8],
    client_nonce: &[u8],
    sensor_id: &str,
) -> Result<SharedKey, CryptoError> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(
        code.len() + challenge.len() + client_nonce.len(),
    ));
    ikm.extend_from_slice(code.as_bytes());
    ikm.extend_from_slice(challenge);
    ikm.extend_from_slice(client_nonce);

    let hk = Hkdf::<Sha256>::new(Some(sensor_id.as_bytes()), &ikm);
    let mut okm = Zeroizing::new([0u8; SHARED_KEY_LEN]);
    hk.expand(PAIRING_INFO, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(SharedKey(okm))
}

/// Draws a fresh client nonce from the OS RNG.
pub fn generate_client_nonce() -> [u8; CLIENT_NONCE_LEN] {
    let mut nonce = [0u8; CLIENT_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}
