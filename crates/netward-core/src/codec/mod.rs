//! Byte-level encodings used during pairing.
//!
//! - **`der`** – A minimal DER writer: just enough ASN.1 to express a PKCS#10
//!   certificate request.
//! - **`csr`** – The certificate request itself (`CertificationRequestInfo`
//!   plus signature envelope).
//! - **`hex`** – Lowercase hex conversions for challenges, nonces and sealed
//!   payloads on the wire.
//! - **`pem`** – Base64 armoring for certificates and private keys.
//!
//! # What is DER? (for beginners)
//!
//! DER (Distinguished Encoding Rules) is the strict, canonical form of ASN.1
//! binary encoding used by X.509 certificates.  Every value is written as a
//! *tag-length-value* triple: one byte saying what kind of value follows, a
//! length, then the bytes.  "Distinguished" means there is exactly one valid
//! encoding for any value, which is what makes signatures over DER stable:
//! two implementations encoding the same request produce identical bytes.

use thiserror::Error;

pub mod csr;
pub mod der;
pub mod hex;
pub mod pem;

pub use csr::CertificateRequest;

/// Errors produced by the encoders and decoders in this module.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Input text is not valid for the expected encoding (odd-length hex,
    /// non-hex characters, broken base64, missing PEM markers).
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),

    /// The public key is not an uncompressed P-256 point.
    #[error("invalid public key: expected 65-byte uncompressed point, got {len} bytes")]
    InvalidPublicKey { len: usize },

    /// An object identifier has fewer than two arcs or an out-of-range first arc.
    #[error("invalid object identifier")]
    InvalidObjectIdentifier,
}
