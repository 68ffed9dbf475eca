//! Minimal DER writer.
//!
//! Each function returns one complete TLV (tag, length, value) as a byte
//! vector.  Constructed values (`sequence`, `set`, `context`) take the already
//! encoded children, so a structure is built bottom-up:
//!
//! ```rust
//! use netward_core::codec::der;
//!
//! let name = der::sequence(&[der::utf8_string("sensor-client")]);
//! assert_eq!(name[0], der::TAG_SEQUENCE);
//! ```
//!
//! Lengths use the short form below 128 bytes and the minimal long form above.

use crate::codec::CodecError;

// ── Universal tags ────────────────────────────────────────────────────────────

pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
pub const TAG_UTF8_STRING: u8 = 0x0C;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;

/// Class bits for a context-specific, constructed tag (`[n]` in ASN.1 notation).
const CONTEXT_CONSTRUCTED: u8 = 0xA0;

// ── Length encoding ───────────────────────────────────────────────────────────

/// Encodes a DER length field.
///
/// `0..=127` is a single byte.  Larger values are `0x80 | n` followed by the
/// `n` big-endian bytes of the length with no leading zero bytes.
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    let significant = &bytes[first..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

/// Writes a complete TLV with the given tag and content bytes.
pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    encode_length(content.len(), &mut out);
    out.extend_from_slice(content);
    out
}

// ── Primitive values ──────────────────────────────────────────────────────────

/// Encodes a non-negative INTEGER in minimal two's-complement form.
///
/// A leading `0x00` is inserted when the most significant bit is set so the
/// value is not read back as negative.
pub fn integer(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
    let mut content = Vec::with_capacity(9);
    if bytes[first] & 0x80 != 0 {
        content.push(0x00);
    }
    content.extend_from_slice(&bytes[first..]);
    tlv(TAG_INTEGER, &content)
}

/// Encodes a UTF8String.
pub fn utf8_string(value: &str) -> Vec<u8> {
    tlv(TAG_UTF8_STRING, value.as_bytes())
}

/// Encodes a BIT STRING with zero unused bits.
pub fn bit_string(bits: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(bits.len() + 1);
    content.push(0x00);
    content.extend_from_slice(bits);
    tlv(TAG_BIT_STRING, &content)
}

/// Encodes an OBJECT IDENTIFIER from its arcs, e.g. `[2, 5, 4, 3]`.
///
/// The first two arcs share one byte (`40 * a + b`); every later arc is
/// written base-128, most significant group first, with the high bit set on
/// all but the last byte.
///
/// # Errors
///
/// Returns [`CodecError::InvalidObjectIdentifier`] for fewer than two arcs, a
/// first arc above 2, or a second arc of 40 or more under roots 0 and 1.
pub fn object_identifier(arcs: &[u64]) -> Result<Vec<u8>, CodecError> {
    if arcs.len() < 2 || arcs[0] > 2 || (arcs[0] < 2 && arcs[1] >= 40) {
        return Err(CodecError::InvalidObjectIdentifier);
    }
    let mut content = Vec::new();
    push_base128(arcs[0] * 40 + arcs[1], &mut content);
    for &arc in &arcs[2..] {
        push_base128(arc, &mut content);
    }
    Ok(tlv(TAG_OBJECT_IDENTIFIER, &content))
}

fn push_base128(mut value: u64, out: &mut Vec<u8>) {
    let mut groups = [0u8; 10];
    let mut n = 0;
    loop {
        groups[n] = (value & 0x7F) as u8;
        n += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i == 0 { 0x00 } else { 0x80 };
        out.push(groups[i] | continuation);
    }
}

// ── Constructed values ────────────────────────────────────────────────────────

/// Encodes a SEQUENCE of already-encoded children.
pub fn sequence(children: &[Vec<u8>]) -> Vec<u8> {
    tlv(TAG_SEQUENCE, &children.concat())
}

/// Encodes a SET of already-encoded children in the order given.
///
/// DER requires SET OF members to be sorted; callers in this crate only
/// build single-member sets.
pub fn set(children: &[Vec<u8>]) -> Vec<u8> {
    tlv(TAG_SET, &children.concat())
}

/// Encodes a context-specific constructed value `[number]`.
pub fn context(number: u8, children: &[Vec<u8>]) -> Vec<u8> {
    tlv(CONTEXT_CONSTRUCTED | (number & 0x1F), &children.concat())
}
