use super::*;
use std::net::{IpAddr, Ipv4Addr};

fn test_client() -> Client {
    let _ = env_logger::builder().is_test(true).try_init();
    Client::new(ClientConfig {
        server_addr: "203.0.113.1:3478".parse().unwrap(),
        username: "user".to_owned(),
        password: "pass".to_owned(),
        software: "minirtc".to_owned(),
    })
}

fn decode(raw: &[u8]) -> Message {
    let mut m = Message::new();
    m.raw = raw.to_vec();
    m.decode().unwrap();
    m
}

fn unauthorized_response(req: &Message) -> Message {
    let mut resp = Message::new();
    resp.build(&[
        Box::new(req.transaction_id),
        Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_ERROR_RESPONSE)),
        Box::new(stun::error_code::CODE_UNAUTHORIZED),
        Box::new(Realm::new(ATTR_REALM, "example.org".to_owned())),
        Box::new(Nonce::new(ATTR_NONCE, "dcba4321".to_owned())),
    ])
    .unwrap();
    resp
}

fn success_response(req: &Message, relayed: SocketAddr) -> Message {
    let mut resp = Message::new();
    resp.build(&[
        Box::new(req.transaction_id),
        Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_SUCCESS_RESPONSE)),
        Box::new(RelayedAddress {
            ip: relayed.ip(),
            port: relayed.port(),
        }),
        Box::new(XorMappedAddress {
            ip: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)),
            port: 41000,
        }),
        Box::new(Lifetime(Duration::from_secs(600))),
    ])
    .unwrap();
    resp
}

fn allocate(client: &mut Client, now: Instant) -> SocketAddr {
    client.allocate(now).unwrap();
    let first = decode(&client.poll_transmit().unwrap());
    client
        .handle_read(&unauthorized_response(&first).raw, now)
        .unwrap();
    let retry = decode(&client.poll_transmit().unwrap());
    let relayed: SocketAddr = "203.0.113.1:49152".parse().unwrap();
    client
        .handle_read(&success_response(&retry, relayed).raw, now)
        .unwrap();
    match client.poll_event() {
        Some(Event::AllocateResponse {
            relayed: Some(addr),
            ..
        }) => addr,
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_allocate_retries_with_long_term_credentials() {
    let mut client = test_client();
    let now = Instant::now();

    client.allocate(now).unwrap();
    let first = decode(&client.poll_transmit().unwrap());
    assert_eq!(first.typ, MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST));
    assert!(!first.contains(ATTR_MESSAGE_INTEGRITY));

    client
        .handle_read(&unauthorized_response(&first).raw, now)
        .unwrap();

    let retry = decode(&client.poll_transmit().unwrap());
    assert_eq!(retry.typ, MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST));
    assert_eq!(retry.get(ATTR_USERNAME).unwrap(), b"user".to_vec());
    assert_eq!(retry.get(ATTR_REALM).unwrap(), b"example.org".to_vec());
    assert_eq!(retry.get(ATTR_NONCE).unwrap(), b"dcba4321".to_vec());

    // The retry must verify under MD5(user:realm:pass).
    let key = MessageIntegrity::new_long_term_integrity("user", "example.org", "pass");
    key.check(&retry).unwrap();

    let relayed: SocketAddr = "203.0.113.1:49152".parse().unwrap();
    client
        .handle_read(&success_response(&retry, relayed).raw, now)
        .unwrap();
    match client.poll_event() {
        Some(Event::AllocateResponse {
            relayed: Some(addr),
            lifetime,
            ..
        }) => {
            assert_eq!(addr, relayed);
            assert_eq!(lifetime, Duration::from_secs(600));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(client.is_allocated());
}

#[test]
fn test_allocate_second_failure_is_final() {
    let mut client = test_client();
    let now = Instant::now();

    client.allocate(now).unwrap();
    let first = decode(&client.poll_transmit().unwrap());
    client
        .handle_read(&unauthorized_response(&first).raw, now)
        .unwrap();
    let retry = decode(&client.poll_transmit().unwrap());
    client
        .handle_read(&unauthorized_response(&retry).raw, now)
        .unwrap();

    match client.poll_event() {
        Some(Event::AllocateResponse {
            relayed: None,
            lifetime,
            ..
        }) => assert_eq!(lifetime, Duration::ZERO),
        other => panic!("unexpected event {other:?}"),
    }
    // No third attempt.
    assert!(client.poll_transmit().is_none());
}

#[test]
fn test_channel_bind_and_channel_data() {
    let mut client = test_client();
    let now = Instant::now();
    allocate(&mut client, now);

    let peer: SocketAddr = "192.0.2.10:7000".parse().unwrap();
    let number = ChannelNumber(0x4003);
    client.channel_bind(number, peer, now).unwrap();
    let req = decode(&client.poll_transmit().unwrap());
    assert_eq!(
        req.typ,
        MessageType::new(METHOD_CHANNEL_BIND, CLASS_REQUEST)
    );

    let mut resp = Message::new();
    resp.build(&[
        Box::new(req.transaction_id),
        Box::new(MessageType::new(METHOD_CHANNEL_BIND, CLASS_SUCCESS_RESPONSE)),
    ])
    .unwrap();
    client.handle_read(&resp.raw, now).unwrap();
    assert_matches::assert_matches!(
        client.poll_event(),
        Some(Event::ChannelBindResponse { success: true, .. })
    );
    assert_eq!(client.binding_peer(number), Some(peer));

    // Outbound channel data is framed and padded.
    client.send_channel_data(number, b"hello").unwrap();
    let frame = client.poll_transmit().unwrap();
    assert_eq!(frame.len(), 12);
    assert_eq!(&frame[0..2], &number.0.to_be_bytes());

    // Inbound channel data surfaces as an event, even split across
    // two TCP segments.
    let mut cd = ChannelData {
        number,
        data: b"response".to_vec(),
        raw: vec![],
    };
    cd.encode();
    client.handle_read(&cd.raw[..5], now).unwrap();
    assert!(client.poll_event().is_none());
    client.handle_read(&cd.raw[5..], now).unwrap();
    match client.poll_event() {
        Some(Event::ChannelData { number: n, data }) => {
            assert_eq!(n, number);
            assert_eq!(data, b"response".to_vec());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_data_indication_decodes_peer() {
    let mut client = test_client();
    let now = Instant::now();
    allocate(&mut client, now);

    let peer: SocketAddr = "192.0.2.99:9999".parse().unwrap();
    let mut ind = Message::new();
    ind.build(&[
        Box::new(TransactionId::new()),
        Box::new(MessageType::new(METHOD_DATA, CLASS_INDICATION)),
        Box::new(PeerAddress {
            ip: peer.ip(),
            port: peer.port(),
        }),
        Box::new(Data(b"indicated".to_vec())),
    ])
    .unwrap();
    client.handle_read(&ind.raw, now).unwrap();

    match client.poll_event() {
        Some(Event::Data { peer: from, data }) => {
            assert_eq!(from, peer);
            assert_eq!(data, b"indicated".to_vec());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_allocate_timeout() {
    let mut client = test_client();
    let now = Instant::now();
    client.allocate(now).unwrap();
    client.poll_transmit().unwrap();

    let deadline = client.poll_timeout().unwrap();
    client.handle_timeout(deadline);
    match client.poll_event() {
        Some(Event::AllocateResponse {
            relayed: None,
            lifetime,
            ..
        }) => assert_eq!(lifetime, Duration::ZERO),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_send_indication_is_fingerprinted() {
    let mut client = test_client();
    let now = Instant::now();
    allocate(&mut client, now);

    let peer: SocketAddr = "192.0.2.10:7000".parse().unwrap();
    client.send_indication(peer, b"payload").unwrap();
    let msg = decode(&client.poll_transmit().unwrap());
    assert_eq!(msg.typ, MessageType::new(METHOD_SEND, CLASS_INDICATION));
    FINGERPRINT.check(&msg).unwrap();
    assert!(!msg.contains(ATTR_MESSAGE_INTEGRITY));
}
