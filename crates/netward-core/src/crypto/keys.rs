//! The client's long-term ECDSA P-256 key pair.

use std::fmt;

use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use zeroize::Zeroizing;

use crate::codec::{pem, CertificateRequest};
use crate::crypto::CryptoError;

/// PEM label for a PKCS#8 private key.
pub const PRIVATE_KEY_PEM_LABEL: &str = "PRIVATE KEY";

/// An ECDSA P-256 key pair plus its PKCS#8 encoding for persistence.
pub struct ClientKeyPair {
    pkcs8: Zeroizing<Vec<u8>>,
    key_pair: EcdsaKeyPair,
    rng: SystemRandom,
}

impl ClientKeyPair {
    /// Generates a fresh key pair from the system RNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyGeneration`] if the RNG is unavailable.
    pub fn generate() -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let document = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|_| CryptoError::KeyGeneration)?;
        Self::from_pkcs8(document.as_ref())
    }

    /// Restores a key pair from PKCS#8 DER.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the bytes are not a P-256 key.
    pub fn from_pkcs8(pkcs8: &[u8]) -> Result<Self, CryptoError> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8, &rng)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            pkcs8: Zeroizing::new(pkcs8.to_vec()),
            key_pair,
            rng,
        })
    }

    /// The 65-byte uncompressed public point.
    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }

    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8
    }

    /// PKCS#8 wrapped as a `PRIVATE KEY` PEM block.
    pub fn private_key_pem(&self) -> Zeroizing<String> {
        Zeroizing::new(pem::encode(PRIVATE_KEY_PEM_LABEL, &self.pkcs8))
    }

    /// Signs `message` with ECDSA-SHA256, returning the DER signature.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Signing`] if the signer fails.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let signature = self
            .key_pair
            .sign(&self.rng, message)
            .map_err(|_| CryptoError::Signing)?;
        Ok(signature.as_ref().to_vec())
    }

    /// Builds and signs a certificate request for `subject_cn`.
    ///
    /// # Errors
    ///
    /// Propagates encoding and signing failures.
    pub fn certificate_request(&self, subject_cn: &str) -> Result<CertificateRequest, CryptoError> {
        let info = CertificateRequest::info_der(subject_cn, self.public_key())?;
        let signature = self.sign(&info)?;
        Ok(CertificateRequest::new(
            subject_cn,
            self.public_key().to_vec(),
            signature,
        )?)
    }
}

impl fmt::Debug for ClientKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientKeyPair")
            .field("public_key", &::hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}
