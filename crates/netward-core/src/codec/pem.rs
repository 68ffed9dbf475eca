//! PEM armoring (RFC 7468 textual encoding).
//!
//! The sensor returns certificates as PEM and the HTTPS client expects the
//! client identity as PEM, so the client only ever needs to wrap a DER blob
//! under a label and unwrap the blocks carrying a given label.  The framing
//! itself is left to the `pem` crate.

use pem::{EncodeConfig, LineEnding, Pem};

use crate::codec::CodecError;

/// Wraps `der` in `-----BEGIN {label}-----` / `-----END {label}-----` with
/// base64 lines of 64 characters and `\n` line endings.
pub fn encode(label: &str, der: &[u8]) -> String {
    let block = Pem::new(label, der.to_vec());
    pem::encode_config(&block, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

/// Extracts the DER bytes of the first block labelled `label`.
///
/// Blocks with other labels are skipped, so a chain returns its leaf
/// certificate and a key bundle returns the requested half.
///
/// # Errors
///
/// Returns [`CodecError::InvalidEncoding`] when no block carries `label` or
/// the text is not valid PEM.
pub fn decode(label: &str, text: &str) -> Result<Vec<u8>, CodecError> {
    decode_all(label, text)?
        .into_iter()
        .next()
        .ok_or_else(|| CodecError::InvalidEncoding(format!("no {label} block")))
}

/// Extracts every block labelled `label`, in document order.
///
/// # Errors
///
/// Returns [`CodecError::InvalidEncoding`] when the text is not valid PEM.
/// Text without any matching block yields an empty list.
pub fn decode_all(label: &str, text: &str) -> Result<Vec<Vec<u8>>, CodecError> {
    let blocks = pem::parse_many(text).map_err(|e| CodecError::InvalidEncoding(e.to_string()))?;
    Ok(blocks
        .into_iter()
        .filter(|block| block.tag() == label)
        .map(Pem::into_contents)
        .collect())
}
