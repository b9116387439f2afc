use super::*;
use shared::error::Error;

#[test]
fn test_open_roundtrip() {
    let open = Message::DataChannelOpen(DataChannelOpen {
        channel_type: ChannelType::Reliable,
        priority: 256,
        reliability_parameter: 0,
        label: b"ch".to_vec(),
        protocol: b"".to_vec(),
    });

    let raw = open.marshal().unwrap();
    // type(1) + channel type(1) + priority(2) + reliability(4) +
    // label len(2) + protocol len(2) + label(2)
    assert_eq!(raw.len(), 14);
    assert_eq!(raw[0], 0x03);

    let mut buf = &raw[..];
    let decoded = Message::unmarshal(&mut buf).unwrap();
    assert_eq!(decoded, open);
}

#[test]
fn test_ack_roundtrip() {
    let ack = Message::DataChannelAck(DataChannelAck);
    let raw = ack.marshal().unwrap();
    assert_eq!(&raw[..], &[0x02]);

    let mut buf = &raw[..];
    assert_eq!(Message::unmarshal(&mut buf).unwrap(), ack);
}

#[test]
fn test_unknown_message_type_rejected() {
    let mut buf = &[0x07u8][..];
    assert_eq!(
        Message::unmarshal(&mut buf),
        Err(Error::InvalidMessageType(0x07))
    );
}

#[test]
fn test_partial_reliability_rejected() {
    // channel type 0x81 (partial reliable, retransmit) is out of scope.
    let raw = [0x03, 0x81, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    let mut buf = &raw[..];
    assert_eq!(
        Message::unmarshal(&mut buf),
        Err(Error::InvalidChannelType(0x81))
    );
}

#[test]
fn test_open_truncated_label() {
    // Label length says 5 but only 2 bytes follow.
    let raw = [0x03, 0x00, 0, 0, 0, 0, 0, 0, 0, 5, 0, 0, b'h', b'i'];
    let mut buf = &raw[..];
    assert!(Message::unmarshal(&mut buf).is_err());
}
