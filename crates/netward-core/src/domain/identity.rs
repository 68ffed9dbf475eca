//! Pairing inputs and the identity that pairing produces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::codec::{hex, pem, CodecError};
use crate::crypto::keys::PRIVATE_KEY_PEM_LABEL;
use crate::crypto::{ClientKeyPair, CryptoError};

pub const CERTIFICATE_PEM_LABEL: &str = "CERTIFICATE";

/// Number of digits in a pairing code.
pub const PAIRING_CODE_LEN: usize = 6;

// ── Pairing code ──────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
#[error("pairing code must be exactly {PAIRING_CODE_LEN} digits")]
pub struct InvalidPairingCode;

/// The 6-digit decimal code displayed by the sensor.
///
/// Consumed by one handshake attempt and never persisted.  `Debug` hides the
/// digits so the code cannot end up in a log line.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingCode(String);

impl PairingCode {
    /// Accepts exactly six ASCII digits, ignoring surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPairingCode`] for any other input.
    pub fn parse(input: &str) -> Result<Self, InvalidPairingCode> {
        let trimmed = input.trim();
        if trimmed.len() == PAIRING_CODE_LEN && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidPairingCode)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PairingCode(******)")
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// A sensor found on the local network, not yet paired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredSensor {
    /// Human-readable name advertised by the sensor.
    pub name: String,
    /// Stable sensor identity, when advertised.
    pub sensor_id: Option<String>,
    /// `host:port` of the sensor's API.
    pub address: String,
}

// ── Paired identity ───────────────────────────────────────────────────────────

/// The credentials produced by a completed handshake.
///
/// Owned by the credential store, loaded once at startup and shared read-only
/// (behind an `Arc`) with the session.  Replaced only by re-pairing and
/// removed only by unpairing.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedIdentity {
    pub sensor_id: String,
    pub sensor_name: String,
    /// `host:port` of the sensor's API.
    pub sensor_address: String,
    /// Client certificate issued by the sensor (PEM).
    pub certificate_pem: String,
    /// Matching private key as PKCS#8 DER, hex-encoded on disk.
    #[serde(with = "hex_bytes")]
    pub private_key_pkcs8: Vec<u8>,
    /// Sensor CA certificate used to verify the sensor's TLS certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate_pem: Option<String>,
    pub paired_at: DateTime<Utc>,
}

impl PairedIdentity {
    /// SHA-256 over the DER of the client certificate, lowercase hex.
    ///
    /// Used as the credential when authenticating the live stream.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidEncoding`] if the certificate PEM is broken.
    pub fn certificate_fingerprint(&self) -> Result<String, CodecError> {
        let der = pem::decode(CERTIFICATE_PEM_LABEL, &self.certificate_pem)?;
        Ok(hex::encode(Sha256::digest(&der)))
    }

    /// Certificate followed by the private key, both PEM, as TLS stacks
    /// expect for a client identity.
    pub fn identity_pem(&self) -> String {
        let mut bundle = self.certificate_pem.trim_end().to_string();
        bundle.push('\n');
        bundle.push_str(&pem::encode(PRIVATE_KEY_PEM_LABEL, &self.private_key_pkcs8));
        bundle
    }

    /// Restores the signing key pair.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the stored key is unusable.
    pub fn key_pair(&self) -> Result<ClientKeyPair, CryptoError> {
        ClientKeyPair::from_pkcs8(&self.private_key_pkcs8)
    }
}

impl fmt::Debug for PairedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairedIdentity")
            .field("sensor_id", &self.sensor_id)
            .field("sensor_name", &self.sensor_name)
            .field("sensor_address", &self.sensor_address)
            .field("has_ca", &self.ca_certificate_pem.is_some())
            .field("paired_at", &self.paired_at)
            .finish_non_exhaustive()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::codec::hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        crate::codec::hex::decode(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_with_cert(der: &[u8]) -> PairedIdentity {
        PairedIdentity {
            sensor_id: "sensor-1".to_string(),
            sensor_name: "Hallway".to_string(),
            sensor_address: "10.0.0.2:8443".to_string(),
            certificate_pem: pem::encode(CERTIFICATE_PEM_LABEL, der),
            private_key_pkcs8: vec![0x30, 0x01, 0x02],
            ca_certificate_pem: None,
            paired_at: Utc::now(),
        }
    }

    #[test]
    fn test_pairing_code_accepts_six_digits() {
        assert_eq!(PairingCode::parse("012345").unwrap().as_str(), "012345");
        assert_eq!(PairingCode::parse(" 999999\n").unwrap().as_str(), "999999");
    }

    #[test]
    fn test_pairing_code_rejects_other_shapes() {
        for bad in ["", "12345", "1234567", "12a456", "１２３４５６", "12 456"] {
            assert_eq!(PairingCode::parse(bad), Err(InvalidPairingCode), "{bad:?}");
        }
    }

    #[test]
    fn test_pairing_code_debug_hides_digits() {
        let code = PairingCode::parse("424242").unwrap();
        assert!(!format!("{code:?}").contains("42"));
    }

    #[test]
    fn test_fingerprint_is_sha256_of_certificate_der() {
        // Arrange
        let identity = identity_with_cert(b"abc");

        // Act
        let fingerprint = identity.certificate_fingerprint().unwrap();

        // Assert – SHA-256("abc")
        assert_eq!(
            fingerprint,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_fingerprint_of_broken_pem_fails() {
        let mut identity = identity_with_cert(b"abc");
        identity.certificate_pem = "garbage".to_string();
        assert!(identity.certificate_fingerprint().is_err());
    }

    #[test]
    fn test_identity_pem_contains_certificate_then_key() {
        let bundle = identity_with_cert(b"abc").identity_pem();
        let cert_at = bundle.find("BEGIN CERTIFICATE").unwrap();
        let key_at = bundle.find("BEGIN PRIVATE KEY").unwrap();
        assert!(cert_at < key_at);
    }

    #[test]
    fn test_identity_serializes_key_as_hex() {
        // Arrange
        let identity = identity_with_cert(b"abc");

        // Act
        let json = serde_json::to_value(&identity).unwrap();
        let restored: PairedIdentity = serde_json::from_value(json.clone()).unwrap();

        // Assert
        assert_eq!(json["private_key_pkcs8"], "300102");
        assert_eq!(restored, identity);
    }

    #[test]
    fn test_debug_omits_key_material() {
        let printed = format!("{:?}", identity_with_cert(b"abc"));
        assert!(!printed.contains("300102"));
        assert!(!printed.contains("private_key"));
    }
}
