//! PKCS#10 certificate request encoding.
//!
//! The client submits exactly one shape of request:
//!
//! ```text
//! CertificationRequest ::= SEQUENCE {
//!     certificationRequestInfo  SEQUENCE {
//!         version        INTEGER 0,
//!         subject        Name { CN = <subject_cn> },
//!         subjectPKInfo  SEQUENCE {
//!             SEQUENCE { id-ecPublicKey, prime256v1 },
//!             BIT STRING <65-byte uncompressed point>
//!         },
//!         attributes     [0] {}
//!     },
//!     signatureAlgorithm  SEQUENCE { ecdsa-with-SHA256 },
//!     signature           BIT STRING <DER ECDSA signature>
//! }
//! ```
//!
//! The signature covers the DER of `certificationRequestInfo`, which is why
//! [`CertificateRequest::info_der`] is exposed separately: the signer hashes
//! those bytes, then [`CertificateRequest::new`] wraps the result.

use crate::codec::der;
use crate::codec::{pem, CodecError};

/// `2.5.4.3` – X.520 commonName.
pub const OID_COMMON_NAME: &[u64] = &[2, 5, 4, 3];
/// `1.2.840.10045.2.1` – id-ecPublicKey.
pub const OID_EC_PUBLIC_KEY: &[u64] = &[1, 2, 840, 10045, 2, 1];
/// `1.2.840.10045.3.1.7` – prime256v1 (NIST P-256).
pub const OID_PRIME256V1: &[u64] = &[1, 2, 840, 10045, 3, 1, 7];
/// `1.2.840.10045.4.3.2` – ecdsa-with-SHA256.
pub const OID_ECDSA_WITH_SHA256: &[u64] = &[1, 2, 840, 10045, 4, 3, 2];

/// Length of an uncompressed SEC1 P-256 point (`0x04 || X || Y`).
pub const P256_POINT_LEN: usize = 65;

/// PEM label for an encoded request.
pub const PEM_LABEL: &str = "CERTIFICATE REQUEST";

/// A signed PKCS#10 request with a CN-only subject and a P-256 key.
///
/// Immutable once built; encode with [`to_der`](Self::to_der).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    subject_cn: String,
    public_key: Vec<u8>,
    signature: Vec<u8>,
}

impl CertificateRequest {
    /// Encodes the `CertificationRequestInfo` that the signature must cover.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPublicKey`] unless `public_key` is a
    /// 65-byte uncompressed point.
    pub fn info_der(subject_cn: &str, public_key: &[u8]) -> Result<Vec<u8>, CodecError> {
        check_public_key(public_key)?;

        let common_name = der::sequence(&[
            der::object_identifier(OID_COMMON_NAME)?,
            der::utf8_string(subject_cn),
        ]);
        let subject = der::sequence(&[der::set(&[common_name])]);

        let algorithm = der::sequence(&[
            der::object_identifier(OID_EC_PUBLIC_KEY)?,
            der::object_identifier(OID_PRIME256V1)?,
        ]);
        let subject_pk_info = der::sequence(&[algorithm, der::bit_string(public_key)]);

        Ok(der::sequence(&[
            der::integer(0),
            subject,
            subject_pk_info,
            der::context(0, &[]),
        ]))
    }

    /// Wraps a signature produced over [`info_der`](Self::info_der).
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPublicKey`] for a malformed key.
    pub fn new(
        subject_cn: impl Into<String>,
        public_key: Vec<u8>,
        signature: Vec<u8>,
    ) -> Result<Self, CodecError> {
        check_public_key(&public_key)?;
        Ok(Self {
            subject_cn: subject_cn.into(),
            public_key,
            signature,
        })
    }

    pub fn subject_cn(&self) -> &str {
        &self.subject_cn
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Encodes the complete `CertificationRequest`.
    ///
    /// # Errors
    ///
    /// Only fails if the fixed OIDs cannot be encoded, which cannot happen
    /// for the constants above.
    pub fn to_der(&self) -> Result<Vec<u8>, CodecError> {
        let info = Self::info_der(&self.subject_cn, &self.public_key)?;
        let signature_algorithm = der::sequence(&[der::object_identifier(OID_ECDSA_WITH_SHA256)?]);
        Ok(der::sequence(&[
            info,
            signature_algorithm,
            der::bit_string(&self.signature),
        ]))
    }

    /// Encodes the request as a `CERTIFICATE REQUEST` PEM block.
    pub fn to_pem(&self) -> Result<String, CodecError> {
        Ok(pem::encode(PEM_LABEL, &self.to_der()?))
    }
}

fn check_public_key(public_key: &[u8]) -> Result<(), CodecError> {
    if public_key.len() != P256_POINT_LEN || public_key[0] != 0x04 {
        return Err(CodecError::InvalidPublicKey {
            len: public_key.len(),
        });
    }
    Ok(())
}
