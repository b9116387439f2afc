use super::*;

#[test]
fn test_dial_queues_open() {
    let mut dc = DataChannel::dial(
        DataChannelConfig {
            label: "ch".to_owned(),
            ..Default::default()
        },
        1,
    )
    .unwrap();

    let msg = dc.poll_write().unwrap();
    assert_eq!(msg.stream_id, 1);
    assert_eq!(msg.ppi, PayloadProtocolIdentifier::Dcep);
    assert_eq!(msg.payload[0], 0x03);
    assert!(!dc.is_acked());
    assert!(dc.poll_write().is_none());
}

#[test]
fn test_accept_answers_with_ack() {
    let mut opener = DataChannel::dial(
        DataChannelConfig {
            label: "chat".to_owned(),
            protocol: "proto".to_owned(),
            priority: 7,
            ..Default::default()
        },
        1,
    )
    .unwrap();
    let open_msg = opener.poll_write().unwrap();

    let mut acceptor =
        DataChannel::accept(1, PayloadProtocolIdentifier::Dcep, &open_msg.payload).unwrap();
    assert_eq!(acceptor.label(), "chat");
    assert_eq!(acceptor.protocol(), "proto");
    assert!(acceptor.is_acked());

    let ack_msg = acceptor.poll_write().unwrap();
    assert_eq!(ack_msg.ppi, PayloadProtocolIdentifier::Dcep);
    assert_eq!(&ack_msg.payload[..], &[0x02]);

    // The opener sees the ACK and completes.
    let mut buf = &ack_msg.payload[..];
    assert_eq!(
        Message::unmarshal(&mut buf).unwrap(),
        Message::DataChannelAck(DataChannelAck)
    );
    opener.handle_ack();
    assert!(opener.is_acked());
}

#[test]
fn test_accept_rejects_wrong_ppid() {
    assert_eq!(
        DataChannel::accept(1, PayloadProtocolIdentifier::Binary, &[0x03]).unwrap_err(),
        Error::InvalidPayloadProtocolIdentifier(PayloadProtocolIdentifier::Binary as u32)
    );
}

#[test]
fn test_write_tags_payloads_by_kind() {
    let mut dc = DataChannel::dial(DataChannelConfig::default(), 2).unwrap();
    let _open = dc.poll_write();

    dc.write(false, b"hello");
    dc.write(true, &[1, 2, 3]);

    let s = dc.poll_write().unwrap();
    assert_eq!(s.ppi, PayloadProtocolIdentifier::String);
    assert_eq!(&s.payload[..], b"hello");

    let b = dc.poll_write().unwrap();
    assert_eq!(b.ppi, PayloadProtocolIdentifier::Binary);
    assert_eq!(&b.payload[..], &[1, 2, 3]);

    assert_eq!(dc.messages_sent(), 2);
    assert_eq!(dc.bytes_sent(), 8);
}
