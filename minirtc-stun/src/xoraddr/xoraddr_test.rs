use super::*;

#[test]
fn test_xor_mapped_address_roundtrip_v4() -> Result<()> {
    let mut m = Message::new();
    m.transaction_id = TransactionId::new();
    m.write_header();

    let addr = XorMappedAddress {
        ip: "122.12.34.5".parse().unwrap(),
        port: 5412,
    };
    addr.add_to(&mut m)?;

    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    decoded.decode()?;

    let mut got = XorMappedAddress::default();
    got.get_from(&decoded)?;
    assert_eq!(got.ip, addr.ip);
    assert_eq!(got.port, addr.port);
    Ok(())
}

#[test]
fn test_xor_mapped_address_roundtrip_v6() -> Result<()> {
    let mut m = Message::new();
    m.transaction_id = TransactionId::new();
    m.write_header();

    let addr = XorMappedAddress {
        ip: "2001:db8::68".parse().unwrap(),
        port: 21254,
    };
    addr.add_to(&mut m)?;

    let mut got = XorMappedAddress::default();
    got.get_from(&m)?;
    assert_eq!(got.ip, addr.ip);
    assert_eq!(got.port, addr.port);
    Ok(())
}

#[test]
fn test_xor_mapped_address_value_is_xored() -> Result<()> {
    // The wire value must not contain the plain address bytes.
    let mut m = Message::new();
    m.write_header();

    let addr = XorMappedAddress {
        ip: "192.168.1.1".parse().unwrap(),
        port: 80,
    };
    addr.add_to(&mut m)?;

    let v = m.get(ATTR_XOR_MAPPED_ADDRESS)?;
    assert_ne!(&v[4..8], &[192, 168, 1, 1]);
    Ok(())
}

#[test]
fn test_xor_mapped_address_truncated() {
    let mut m = Message::new();
    m.write_header();
    m.add(ATTR_XOR_MAPPED_ADDRESS, &[0x00, 0x01, 0x00]);

    let mut got = XorMappedAddress::default();
    assert_eq!(got.get_from(&m), Err(Error::ErrUnexpectedEof));
}
