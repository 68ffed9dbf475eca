//! Challenge authentication tags.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::crypto::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Length of an authentication tag in bytes.
pub const AUTH_TAG_LEN: usize = 32;

/// Computes `HMAC-SHA256(key = code as UTF-8, msg = challenge)`.
///
/// Deterministic: the same challenge and code always give the same tag, and
/// changing either changes it.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] only if the MAC rejects the key,
/// which HMAC never does for any key length.
pub fn compute_auth_tag(challenge: &[u8], code: &str) -> Result<[u8; AUTH_TAG_LEN], CryptoError> {
    let mut mac = new_mac(code)?;
    mac.update(challenge);
    Ok(mac.finalize().into_bytes().into())
}

/// Checks `tag` against the expected tag in constant time.
///
/// # Errors
///
/// Returns [`CryptoError::AuthenticationFailed`] on mismatch, including a tag
/// of the wrong length.
pub fn verify_auth_tag(challenge: &[u8], code: &str, tag: &[u8]) -> Result<(), CryptoError> {
    let mut mac = new_mac(code)?;
    mac.update(challenge);
    mac.verify_slice(tag)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

/// Computes the sensor's counter-tag: `HMAC-SHA256(key = code, msg =
/// challenge || client_tag)`.
///
/// Binding the client's tag means a sensor that merely echoes what it was
/// sent cannot produce a valid counter-tag.
///
/// # Errors
///
/// Same as [`compute_auth_tag`].
pub fn compute_sensor_tag(
    challenge: &[u8],
    client_tag: &[u8],
    code: &str,
) -> Result<[u8; AUTH_TAG_LEN], CryptoError> {
    let mut mac = new_mac(code)?;
    mac.update(challenge);
    mac.update(client_tag);
    Ok(mac.finalize().into_bytes().into())
}

/// Checks the sensor's counter-tag in constant time.
///
/// # Errors
///
/// Returns [`CryptoError::AuthenticationFailed`] on mismatch.
pub fn verify_sensor_tag(
    challenge: &[u8],
    client_tag: &[u8],
    code: &str,
    tag: &[u8],
) -> Result<(), CryptoError> {
    let mut mac = new_mac(code)?;
    mac.update(challenge);
    mac.update(client_tag);
    mac.verify_slice(tag)
        .map_err(|_| CryptoError::AuthenticationFailed)
}

fn new_mac(code: &str) -> Result<HmacSha256, CryptoError> {
    <HmacSha256 as Mac>::new_from_slice(code.as_bytes())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}
