//! Integration tests for the pairing cryptography.
//!
//! Both ends of the handshake are played here through the public API: the
//! "sensor" side verifies the tag, derives the same key, opens the sealed
//! request and checks the CSR signature, exactly as a real sensor would.

use netward_core::codec::{hex, CertificateRequest};
use netward_core::crypto::{
    compute_auth_tag, derive_shared_key, generate_client_nonce, open, seal, verify_auth_tag,
    ClientKeyPair, CryptoError,
};
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};

/// Splits one DER TLV off the front of `bytes`: `(tag, content, rest)`.
fn read_tlv(bytes: &[u8]) -> (u8, &[u8], &[u8]) {
    let tag = bytes[0];
    let (len, header) = if bytes[1] & 0x80 == 0 {
        (bytes[1] as usize, 2)
    } else {
        let n = (bytes[1] & 0x7F) as usize;
        let len = bytes[2..2 + n]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        (len, 2 + n)
    };
    (tag, &bytes[header..header + len], &bytes[header + len..])
}

/// Returns the complete TLV (header included) at the front of `bytes`.
fn whole_tlv(bytes: &[u8]) -> &[u8] {
    let (_, _, rest) = read_tlv(bytes);
    &bytes[..bytes.len() - rest.len()]
}

#[test]
fn test_both_sides_agree_on_auth_tag() {
    // Arrange
    let challenge = [0x42u8; 32];
    let code = "314159";

    // Act
    let client_tag = compute_auth_tag(&challenge, code).unwrap();

    // Assert – the sensor checks it in constant time
    assert!(verify_auth_tag(&challenge, code, &client_tag).is_ok());
    assert_eq!(
        verify_auth_tag(&challenge, "314158", &client_tag),
        Err(CryptoError::AuthenticationFailed)
    );
}

#[test]
fn test_sensor_can_open_and_verify_sealed_request() {
    // Arrange – client side
    let code = "271828";
    let challenge = hex::decode("00112233445566778899aabbccddeeff").unwrap();
    let nonce = generate_client_nonce();
    let pair = ClientKeyPair::generate().unwrap();
    let request = pair.certificate_request("kitchen-laptop").unwrap();
    let client_key = derive_shared_key(code, &challenge, &nonce, "sensor-77").unwrap();
    let sealed = seal(&request.to_der().unwrap(), &client_key).unwrap();

    // Act – sensor side, with the nonce it received in hex
    let received_nonce = hex::decode(&hex::encode(nonce)).unwrap();
    let sensor_key = derive_shared_key(code, &challenge, &received_nonce, "sensor-77").unwrap();
    let der = open(&sealed, &sensor_key).unwrap();

    // Assert – structure: SEQUENCE { info, algorithm, BIT STRING signature }
    let (outer_tag, body, trailing) = read_tlv(&der);
    assert_eq!(outer_tag, 0x30);
    assert!(trailing.is_empty());

    let info = whole_tlv(body);
    let after_info = &body[info.len()..];
    let algorithm = whole_tlv(after_info);
    let (sig_tag, sig_content, rest) = read_tlv(&after_info[algorithm.len()..]);
    assert_eq!(sig_tag, 0x03);
    assert_eq!(sig_content[0], 0x00, "no unused bits");
    assert!(rest.is_empty());

    assert_eq!(
        info,
        CertificateRequest::info_der("kitchen-laptop", pair.public_key())
            .unwrap()
            .as_slice()
    );
    assert_eq!(
        algorithm,
        &[0x30, 0x0A, 0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02]
    );

    // Assert – signature over the info bytes verifies with the embedded key
    let verifier = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, pair.public_key());
    assert!(verifier.verify(info, &sig_content[1..]).is_ok());
}

#[test]
fn test_wrong_code_yields_key_that_cannot_open() {
    // Arrange
    let challenge = b"challenge";
    let nonce = generate_client_nonce();
    let client_key = derive_shared_key("111111", challenge, &nonce, "s").unwrap();
    let sealed = seal(b"payload", &client_key).unwrap();

    // Act
    let attacker_key = derive_shared_key("111112", challenge, &nonce, "s").unwrap();

    // Assert
    assert_eq!(
        open(&sealed, &attacker_key),
        Err(CryptoError::AuthenticationFailed)
    );
}

#[test]
fn test_truncated_sealed_blob_is_too_short() {
    let key = derive_shared_key("000000", b"c", b"n", "s").unwrap();
    let sealed = seal(b"", &key).unwrap();
    assert_eq!(
        open(&sealed[..27], &key),
        Err(CryptoError::TooShort { len: 27 })
    );
}
