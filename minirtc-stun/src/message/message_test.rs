use super::*;
use crate::fingerprint::FINGERPRINT;
use crate::integrity::MessageIntegrity;
use crate::textattrs::TextAttribute;
use crate::xoraddr::XorMappedAddress;
use shared::error::Error;

#[test]
fn test_message_type_value_roundtrip() {
    let tests = [
        BINDING_REQUEST,
        BINDING_SUCCESS,
        BINDING_ERROR,
        MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST),
        MessageType::new(METHOD_CREATE_PERMISSION, CLASS_SUCCESS_RESPONSE),
        MessageType::new(METHOD_CHANNEL_BIND, CLASS_ERROR_RESPONSE),
        MessageType::new(METHOD_SEND, CLASS_INDICATION),
        MessageType::new(METHOD_DATA, CLASS_INDICATION),
    ];
    for t in tests {
        let v = t.value();
        let mut got = MessageType::default();
        got.read_value(v);
        assert_eq!(got, t, "0x{v:04x}");
    }
}

#[test]
fn test_message_type_known_values() {
    // Values from RFC 5389 and RFC 5766.
    assert_eq!(BINDING_REQUEST.value(), 0x0001);
    assert_eq!(BINDING_SUCCESS.value(), 0x0101);
    assert_eq!(BINDING_ERROR.value(), 0x0111);
    assert_eq!(
        MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST).value(),
        0x0003
    );
    assert_eq!(
        MessageType::new(METHOD_SEND, CLASS_INDICATION).value(),
        0x0016
    );
}

#[test]
fn test_message_build_and_decode() -> shared::error::Result<()> {
    let mut m = Message::new();
    m.build(&[
        Box::new(TransactionId::new()),
        Box::new(BINDING_REQUEST),
        Box::new(TextAttribute::new(
            crate::attributes::ATTR_USERNAME,
            "remote:local".to_owned(),
        )),
    ])?;

    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    decoded.decode()?;

    assert_eq!(decoded.typ, BINDING_REQUEST);
    assert_eq!(decoded.transaction_id, m.transaction_id);
    assert_eq!(
        decoded.get(crate::attributes::ATTR_USERNAME)?,
        b"remote:local".to_vec()
    );
    Ok(())
}

#[test]
fn test_message_decode_rejects_bad_cookie() {
    let mut m = Message::new();
    m.build(&[Box::new(TransactionId::new()), Box::new(BINDING_REQUEST)])
        .unwrap();
    m.raw[4] = 0x21 ^ 0xff;

    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    assert_eq!(decoded.decode(), Err(Error::ErrInvalidMagicCookie));
}

#[test]
fn test_message_decode_rejects_inconsistent_length() {
    let mut m = Message::new();
    m.build(&[Box::new(TransactionId::new()), Box::new(BINDING_REQUEST)])
        .unwrap();
    m.add(crate::attributes::ATTR_SOFTWARE, b"x");
    m.raw.push(0); // trailing garbage

    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    assert_eq!(decoded.decode(), Err(Error::ErrUnexpectedEof));
}

#[test]
fn test_attribute_padding() {
    let mut m = Message::new();
    m.write_header();
    m.add(crate::attributes::ATTR_SOFTWARE, b"abc"); // 3 bytes, padded to 4
    assert_eq!(m.raw.len(), MESSAGE_HEADER_SIZE + 4 + 4);
    assert_eq!(m.length, 8);
}

#[test]
fn test_is_message() {
    let mut m = Message::new();
    m.build(&[Box::new(TransactionId::new()), Box::new(BINDING_REQUEST)])
        .unwrap();
    assert!(is_message(&m.raw));
    assert!(!is_message(&m.raw[..MESSAGE_HEADER_SIZE - 1]));
    let mut dtls_like = m.raw.clone();
    dtls_like[4] = 0;
    assert!(!is_message(&dtls_like));
}

// Property from the protocol design: a request carrying a valid
// MESSAGE-INTEGRITY yields a response whose FINGERPRINT and
// MESSAGE-INTEGRITY both verify under the same key.
#[test]
fn test_integrity_then_fingerprint_verifies() -> shared::error::Result<()> {
    let key = "0123456789abcdef0123456789abcdef".to_owned();

    let mut req = Message::new();
    req.build(&[
        Box::new(TransactionId::new()),
        Box::new(BINDING_REQUEST),
        Box::new(MessageIntegrity::new_short_term_integrity(key.clone())),
        Box::new(FINGERPRINT),
    ])?;

    let mut parsed = Message::new();
    parsed.raw = req.raw.clone();
    parsed.decode()?;
    MessageIntegrity::new_short_term_integrity(key.clone()).check(&parsed)?;
    FINGERPRINT.check(&parsed)?;

    let mut resp = Message::new();
    resp.build(&[
        Box::new(parsed.transaction_id),
        Box::new(BINDING_SUCCESS),
        Box::new(XorMappedAddress {
            ip: "203.0.113.5".parse().unwrap(),
            port: 31337,
        }),
        Box::new(MessageIntegrity::new_short_term_integrity(key.clone())),
        Box::new(FINGERPRINT),
    ])?;

    let mut parsed_resp = Message::new();
    parsed_resp.raw = resp.raw.clone();
    parsed_resp.decode()?;
    MessageIntegrity::new_short_term_integrity(key).check(&parsed_resp)?;
    FINGERPRINT.check(&parsed_resp)?;
    assert_eq!(parsed_resp.transaction_id, req.transaction_id);
    Ok(())
}
