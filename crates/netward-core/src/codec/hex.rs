//! Lowercase hex conversions for byte fields on the wire.
//!
//! Challenges, nonces, auth tags and sealed payloads travel as hex strings in
//! JSON bodies.  Decoding is strict: odd-length input or any non-hex character
//! is an [`CodecError::InvalidEncoding`].

use crate::codec::CodecError;

/// Encodes bytes as a lowercase hex string.
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    ::hex::encode(bytes)
}

/// Decodes a hex string (either case) into bytes.
///
/// # Errors
///
/// Returns [`CodecError::InvalidEncoding`] on odd length or non-hex characters.
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    ::hex::decode(text).map_err(|e| CodecError::InvalidEncoding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_lowercase() {
        assert_eq!(encode([0xDE, 0xAD, 0xBE, 0xEF]), "deadbeef");
    }

    #[test]
    fn test_round_trip_including_empty() {
        for bytes in [vec![], vec![0x00], vec![0x0F, 0xF0, 0x7A]] {
            assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn test_uppercase_input_is_accepted() {
        assert_eq!(decode("ABcd").unwrap(), vec![0xAB, 0xCD]);
    }

    #[test]
    fn test_odd_length_is_rejected() {
        assert!(matches!(decode("abc"), Err(CodecError::InvalidEncoding(_))));
    }

    #[test]
    fn test_non_hex_character_is_rejected() {
        assert!(matches!(decode("zz"), Err(CodecError::InvalidEncoding(_))));
        assert!(matches!(decode("0g"), Err(CodecError::InvalidEncoding(_))));
    }
}
