use super::*;

#[test]
fn test_short_term_integrity_roundtrip() -> Result<()> {
    let i = MessageIntegrity::new_short_term_integrity("password".to_owned());

    let mut m = Message::new();
    m.transaction_id = TransactionId::new();
    m.typ = BINDING_REQUEST;
    m.write_header();
    i.add_to(&mut m)?;

    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    decoded.decode()?;
    i.check(&decoded)
}

#[test]
fn test_integrity_detects_tamper() -> Result<()> {
    let i = MessageIntegrity::new_short_term_integrity("password".to_owned());

    let mut m = Message::new();
    m.write_header();
    m.add(ATTR_SOFTWARE, b"software");
    i.add_to(&mut m)?;

    m.raw[24] ^= 0x01; // flip a bit inside SOFTWARE
    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    decoded.decode()?;
    assert_eq!(i.check(&decoded), Err(Error::ErrIntegrityMismatch));
    Ok(())
}

#[test]
fn test_integrity_wrong_key() -> Result<()> {
    let i = MessageIntegrity::new_short_term_integrity("password".to_owned());

    let mut m = Message::new();
    m.write_header();
    i.add_to(&mut m)?;

    let other = MessageIntegrity::new_short_term_integrity("drowssap".to_owned());
    assert_eq!(other.check(&m), Err(Error::ErrIntegrityMismatch));
    Ok(())
}

#[test]
fn test_long_term_integrity_key_is_md5() {
    // RFC 5389 section 15.4: key = MD5(username ":" realm ":" password)
    let i = MessageIntegrity::new_long_term_integrity("user", "realm", "pass");
    assert_eq!(i.0.len(), 16);

    let same = MessageIntegrity::new_long_term_integrity("user", "realm", "pass");
    assert_eq!(i.0, same.0);
    let different = MessageIntegrity::new_long_term_integrity("user", "realm", "ssap");
    assert_ne!(i.0, different.0);
}

#[test]
fn test_integrity_missing_attribute() {
    let i = MessageIntegrity::new_short_term_integrity("password".to_owned());
    let mut m = Message::new();
    m.write_header();
    assert_eq!(i.check(&m), Err(Error::ErrAttributeNotFound));
}
