use super::*;
use crate::offer::OfferBlock;
use std::net::{IpAddr, Ipv4Addr};
use stun::addr::{MappedAddress, OtherAddress};
use stun::message::{BINDING_SUCCESS, CLASS_SUCCESS_RESPONSE, METHOD_ALLOCATE, MessageType};
use stun::xoraddr::XorMappedAddress;
use turn::proto::lifetime::Lifetime;
use turn::proto::relayaddr::RelayedAddress;

// ------------------------------------------------------------------
// A plaintext stand-in for the external DTLS record engine. Records
// keep a first byte in the DTLS range so the demultiplexer routes
// them: 22 handshake, 21 alert, 23 application data.
// ------------------------------------------------------------------

struct FakeDtls {
    peer_fingerprint: [u8; 32],
    role: Option<DtlsRole>,
    complete: bool,
    records_out: VecDeque<Vec<u8>>,
    plaintexts_in: VecDeque<Vec<u8>>,
    events: VecDeque<DtlsEvent>,
}

impl FakeDtls {
    fn new(peer_fingerprint: [u8; 32]) -> Self {
        FakeDtls {
            peer_fingerprint,
            role: None,
            complete: false,
            records_out: VecDeque::new(),
            plaintexts_in: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    fn finish(&mut self) {
        if !self.complete {
            self.complete = true;
            self.events.push_back(DtlsEvent::HandshakeComplete {
                peer_fingerprint: self.peer_fingerprint,
            });
        }
    }
}

impl DtlsEngine for FakeDtls {
    fn start_handshake(&mut self, role: DtlsRole) -> Result<()> {
        self.role = Some(role);
        if role == DtlsRole::Client {
            self.records_out.push_back(vec![22, 1]); // "ClientHello"
        }
        Ok(())
    }

    fn handle_record(&mut self, record: &[u8]) -> Result<()> {
        match record.first() {
            Some(22) => {
                if record.get(1) == Some(&1) {
                    self.records_out.push_back(vec![22, 2]); // server flight
                }
                self.finish();
            }
            Some(21) => self.events.push_back(DtlsEvent::CloseNotify),
            Some(23) => self.plaintexts_in.push_back(record[1..].to_vec()),
            _ => {}
        }
        Ok(())
    }

    fn write_application_data(&mut self, data: &[u8]) -> Result<()> {
        let mut record = Vec::with_capacity(data.len() + 1);
        record.push(23);
        record.extend_from_slice(data);
        self.records_out.push_back(record);
        Ok(())
    }

    fn poll_record(&mut self) -> Option<Vec<u8>> {
        self.records_out.pop_front()
    }

    fn poll_application_data(&mut self) -> Option<Vec<u8>> {
        self.plaintexts_in.pop_front()
    }

    fn poll_event(&mut self) -> Option<DtlsEvent> {
        self.events.pop_front()
    }

    fn close_notify(&mut self) {
        self.records_out.push_back(vec![21, 0]);
    }
}

// ------------------------------------------------------------------
// Two endpoints on a lossless virtual wire with a controllable clock.
// ------------------------------------------------------------------

fn fp(b: u8) -> [u8; 32] {
    [b; 32]
}

fn make_endpoint(addr: &str, secret_byte: u8, local_fp: u8, peer_fp: u8) -> Endpoint {
    let config = EndpointConfig {
        secret: [secret_byte; 32],
        cert_fingerprint: fp(local_fp),
        local_addr: addr.parse().unwrap(),
        relay_policy: RelayPolicy::Disabled,
        turn: None,
        disable_consent_freshness: false,
    };
    Endpoint::new(
        config,
        Box::new(move |_role| Box::new(FakeDtls::new(fp(peer_fp)))),
    )
}

struct Net {
    a: Endpoint,
    b: Endpoint,
    a_addr: SocketAddr,
    b_addr: SocketAddr,
    now: Instant,
    /// When set, STUN datagrams are eaten by the wire.
    drop_stun: bool,
}

impl Net {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let a_addr: SocketAddr = "127.0.0.1:5001".parse().unwrap();
        let b_addr: SocketAddr = "127.0.0.1:5002".parse().unwrap();
        Net {
            a: make_endpoint("127.0.0.1:5001", 0x11, 0xaa, 0xbb),
            b: make_endpoint("127.0.0.1:5002", 0x22, 0xbb, 0xaa),
            a_addr,
            b_addr,
            now: Instant::now(),
            drop_stun: false,
        }
    }

    fn pump(&mut self) {
        loop {
            let mut any = false;
            while let Some((to, payload)) = self.a.poll_transmit() {
                any = true;
                if self.drop_stun && stun::message::is_message(&payload) {
                    continue;
                }
                if to == self.b_addr {
                    self.b.handle_read(self.now, self.a_addr, &payload);
                }
            }
            while let Some((to, payload)) = self.b.poll_transmit() {
                any = true;
                if self.drop_stun && stun::message::is_message(&payload) {
                    continue;
                }
                if to == self.a_addr {
                    self.a.handle_read(self.now, self.b_addr, &payload);
                }
            }
            if !any {
                break;
            }
        }
    }

    /// run_until steps the virtual clock through both endpoints' timer
    /// wheels, delivering traffic after each step.
    fn run_until(&mut self, deadline: Instant) {
        self.pump();
        while self.now < deadline {
            let next = [self.a.poll_timeout(), self.b.poll_timeout()]
                .into_iter()
                .flatten()
                .min();
            let step = match next {
                Some(t) if t <= self.now => self.now + Duration::from_millis(1),
                Some(t) => t,
                None => deadline,
            };
            self.now = step.min(deadline);
            self.a.handle_timeout(self.now);
            self.b.handle_timeout(self.now);
            self.pump();
        }
    }

    fn drain_a(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(e) = self.a.poll_event() {
            events.push(e);
        }
        events
    }

    fn drain_b(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(e) = self.b.poll_event() {
            events.push(e);
        }
        events
    }

    /// connect runs the full offer/answer, checks, DTLS and SCTP
    /// establishment and returns the two offer slots.
    fn connect(&mut self) -> (usize, usize) {
        let (slot_a, block_a) = self.a.create_offer(self.now).unwrap();
        let slot_b = self.b.set_remote_offer(&block_a, None, self.now).unwrap();
        let answer = self.b.offer_block(slot_b).unwrap();
        assert_eq!(
            self.a
                .set_remote_offer(&answer, Some(slot_a), self.now)
                .unwrap(),
            slot_a
        );

        self.run_until(self.now + Duration::from_secs(5));

        let a_events = self.drain_a();
        assert!(
            a_events
                .iter()
                .any(|e| matches!(e, Event::Connected { slot } if *slot == slot_a)),
            "A never connected: {a_events:?}"
        );
        let b_events = self.drain_b();
        assert!(
            b_events
                .iter()
                .any(|e| matches!(e, Event::Connected { slot } if *slot == slot_b)),
            "B never connected: {b_events:?}"
        );
        (slot_a, slot_b)
    }
}

// ------------------------------------------------------------------
// Scenarios
// ------------------------------------------------------------------

#[test]
fn test_loopback_happy_path() {
    let mut net = Net::new();
    let (slot_a, slot_b) = net.connect();

    // The offer creator is the DTLS client and so opens odd streams.
    let stream_id = net.a.open_channel(slot_a, "ch", "", net.now).unwrap();
    assert_eq!(stream_id, 1);
    net.pump();

    let b_events = net.drain_b();
    assert!(
        b_events.iter().any(|e| matches!(
            e,
            Event::DataChannelOpen { slot, stream_id: 1, label, .. }
                if *slot == slot_b && label == "ch"
        )),
        "B saw no channel open: {b_events:?}"
    );
    let a_events = net.drain_a();
    assert!(
        a_events
            .iter()
            .any(|e| matches!(e, Event::DataChannelAck { stream_id: 1, .. })),
        "A saw no ack: {a_events:?}"
    );

    net.a
        .send(slot_a, stream_id, false, b"hello", net.now)
        .unwrap();
    net.pump();

    let b_events = net.drain_b();
    let data = b_events
        .iter()
        .find_map(|e| match e {
            Event::Data {
                stream_id: 1,
                ppid,
                payload,
                ..
            } => Some((ppid, payload)),
            _ => None,
        })
        .expect("B received no data");
    assert_eq!(*data.0, PayloadProtocolIdentifier::String);
    assert_eq!(data.1, b"hello");
}

#[test]
fn test_elected_dtls_role_matches_offer_flag() {
    let mut net = Net::new();

    let (slot_a, block_a) = net.a.create_offer(net.now).unwrap();
    let parsed = OfferBlock::unmarshal(&block_a).unwrap();
    assert!(!parsed.generator_is_dtls_server);

    let slot_b = net.b.set_remote_offer(&block_a, None, net.now).unwrap();
    let answer = net.b.offer_block(slot_b).unwrap();
    let parsed_answer = OfferBlock::unmarshal(&answer).unwrap();
    assert!(parsed_answer.generator_is_dtls_server);

    net.a
        .set_remote_offer(&answer, Some(slot_a), net.now)
        .unwrap();
    net.run_until(net.now + Duration::from_secs(5));

    assert_eq!(net.a.session_dtls_role(slot_a), Some(DtlsRole::Client));
    assert_eq!(net.b.session_dtls_role(slot_b), Some(DtlsRole::Server));
}

#[test]
fn test_fragmented_binary_payload() {
    let mut net = Net::new();
    let (slot_a, _slot_b) = net.connect();

    let stream_id = net.a.open_channel(slot_a, "bulk", "", net.now).unwrap();
    net.pump();
    net.drain_a();
    net.drain_b();

    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    net.a
        .send(slot_a, stream_id, true, &payload, net.now)
        .unwrap();
    net.run_until(net.now + Duration::from_millis(500));

    let b_events = net.drain_b();
    let received = b_events
        .iter()
        .find_map(|e| match e {
            Event::Data { ppid, payload, .. } => Some((ppid, payload)),
            _ => None,
        })
        .expect("B received nothing");
    assert_eq!(*received.0, PayloadProtocolIdentifier::Binary);
    assert_eq!(received.1, &payload);
}

#[test]
fn test_role_conflict_smaller_tie_breaker_yields() {
    let mut net = Net::new();

    // Both sides generate an offer and so both believe they control.
    let (slot_a, block_a) = net.a.create_offer(net.now).unwrap();
    let (slot_b, block_b) = net.b.create_offer(net.now).unwrap();

    // Force the comparison: A must lose.
    net.a.offers[slot_a].as_mut().unwrap().tie_breaker = 1;
    net.b.offers[slot_b].as_mut().unwrap().tie_breaker = u64::MAX;

    net.a
        .set_remote_offer(&block_b, Some(slot_a), net.now)
        .unwrap();
    net.b
        .set_remote_offer(&block_a, Some(slot_b), net.now)
        .unwrap();

    net.run_until(net.now + Duration::from_secs(8));

    // A yielded: it is now controlled and took the server role.
    let offer_a = net.a.offers[slot_a].as_ref().unwrap();
    assert!(offer_a.peer_is_controlling);
    assert_eq!(offer_a.dtls_role, DtlsRole::Server);
    let offer_b = net.b.offers[slot_b].as_ref().unwrap();
    assert!(!offer_b.peer_is_controlling);

    // And the handshake still completed.
    let a_events = net.drain_a();
    assert!(
        a_events
            .iter()
            .any(|e| matches!(e, Event::Connected { .. })),
        "A never connected after conflict: {a_events:?}"
    );
    assert!(
        net.drain_b()
            .iter()
            .any(|e| matches!(e, Event::Connected { .. }))
    );
}

#[test]
fn test_consent_failure_disconnects() {
    let mut net = Net::new();
    let (slot_a, _slot_b) = net.connect();
    let established_at = net.now;

    // The wire now eats every STUN datagram; DTLS/SCTP still flow, so
    // liveness is upheld while consent silently rots.
    net.drop_stun = true;
    net.run_until(established_at + Duration::from_secs(35));

    let a_events = net.drain_a();
    assert!(
        a_events
            .iter()
            .any(|e| matches!(e, Event::Disconnected { slot } if *slot == slot_a)),
        "A never disconnected: {a_events:?}"
    );

    // No further events after the funnel fired.
    net.run_until(net.now + Duration::from_secs(5));
    assert!(net.drain_a().is_empty());
}

#[test]
fn test_offer_table_eviction() {
    let mut net = Net::new();
    for _ in 0..crate::MAX_SLOTS {
        net.a.create_offer(net.now).unwrap();
    }
    assert!(matches!(
        net.a.create_offer(net.now),
        Err(Error::ErrSlotsExhausted)
    ));

    // Expired, sessionless offers are evicted for new ones.
    net.now += Duration::from_secs(61);
    assert!(net.a.create_offer(net.now).is_ok());
}

#[test]
fn test_same_credentials_reuse_slot() {
    let mut net = Net::new();
    let (_slot_a, block_a) = net.a.create_offer(net.now).unwrap();

    let first = net.b.set_remote_offer(&block_a, None, net.now).unwrap();
    let second = net.b.set_remote_offer(&block_a, None, net.now).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_two_checks_scheduled_per_candidate() {
    let mut net = Net::new();
    let (slot_a, block_a) = net.a.create_offer(net.now).unwrap();
    let slot_b = net.b.set_remote_offer(&block_a, None, net.now).unwrap();
    let answer = net.b.offer_block(slot_b).unwrap();
    net.a
        .set_remote_offer(&answer, Some(slot_a), net.now)
        .unwrap();

    // Walk past the whole 100-500 ms scheduling window without
    // delivering anything; the 3 s election has not fired yet, so
    // everything sent is a connectivity check. The answer carries one
    // candidate, which gets probed twice.
    let mut checks = 0;
    for _ in 0..20 {
        net.now += Duration::from_millis(50);
        net.a.handle_timeout(net.now);
        while let Some((to, payload)) = net.a.poll_transmit() {
            if to == net.b_addr && stun::message::is_message(&payload) {
                checks += 1;
            }
        }
    }
    assert_eq!(checks, 2);
}

#[test]
fn test_nat_discovery_symmetric() {
    let mut net = Net::new();
    let server: SocketAddr = "198.51.100.1:3478".parse().unwrap();
    let alternate: SocketAddr = "198.51.100.2:3479".parse().unwrap();

    net.a.discover_nat(server, net.now).unwrap();
    let (to, payload) = net.a.poll_transmit().unwrap();
    assert_eq!(to, server);
    let req = decode_stun(&payload);

    // First answer: mapped differs from local (we are behind a NAT)
    // and OTHER-ADDRESS points at the alternate.
    let mapped1: SocketAddr = "203.0.113.1:40000".parse().unwrap();
    let resp = nat_response(&req, mapped1, Some(alternate));
    net.a.handle_read(net.now, server, &resp.raw);

    // Second rung: CHANGE-REQUEST probe; let it time out.
    let (to, _) = net.a.poll_transmit().unwrap();
    assert_eq!(to, server);
    net.now += Duration::from_secs(3);
    net.a.handle_timeout(net.now);

    // Third rung goes to the alternate; answer with a different
    // mapping, which is the symmetric signature.
    let (to, payload) = net.a.poll_transmit().unwrap();
    assert_eq!(to, alternate);
    let req = decode_stun(&payload);
    let mapped2: SocketAddr = "203.0.113.1:40001".parse().unwrap();
    let resp = nat_response(&req, mapped2, Some(alternate));
    net.a.handle_read(net.now, alternate, &resp.raw);

    let events = net.drain_a();
    assert!(
        events.iter().any(|e| matches!(
            e,
            Event::NatDiscovered {
                nat: NatType::Symmetric,
                mapped: Some(m)
            } if *m == mapped1
        )),
        "wrong discovery outcome: {events:?}"
    );
}

#[test]
fn test_nat_discovery_symmetric_when_alternate_unreachable() {
    let mut net = Net::new();
    let server: SocketAddr = "198.51.100.1:3478".parse().unwrap();
    let alternate: SocketAddr = "198.51.100.2:3479".parse().unwrap();

    net.a.discover_nat(server, net.now).unwrap();
    let (_, payload) = net.a.poll_transmit().unwrap();
    let req = decode_stun(&payload);
    let mapped: SocketAddr = "203.0.113.1:40000".parse().unwrap();
    net.a
        .handle_read(net.now, server, &nat_response(&req, mapped, Some(alternate)).raw);

    // Filtering probe: no answer.
    let (to, _) = net.a.poll_transmit().unwrap();
    assert_eq!(to, server);
    net.now += Duration::from_secs(3);
    net.a.handle_timeout(net.now);

    // Mapping-comparison probe to the alternate: no answer either.
    // A NAT that drops everything from a second server address is the
    // symmetric signature.
    let (to, _) = net.a.poll_transmit().unwrap();
    assert_eq!(to, alternate);
    net.now += Duration::from_secs(3);
    net.a.handle_timeout(net.now);

    let events = net.drain_a();
    assert!(
        events.iter().any(|e| matches!(
            e,
            Event::NatDiscovered {
                nat: NatType::Symmetric,
                ..
            }
        )),
        "wrong discovery outcome: {events:?}"
    );
}

#[test]
fn test_nat_discovery_address_restricted() {
    let mut net = Net::new();
    let server: SocketAddr = "198.51.100.1:3478".parse().unwrap();
    let alternate: SocketAddr = "198.51.100.2:3479".parse().unwrap();
    let mapped: SocketAddr = "203.0.113.1:40000".parse().unwrap();

    net.a.discover_nat(server, net.now).unwrap();
    let (_, payload) = net.a.poll_transmit().unwrap();
    let req = decode_stun(&payload);
    net.a
        .handle_read(net.now, server, &nat_response(&req, mapped, Some(alternate)).raw);

    // Filtering probe times out.
    let (to, _) = net.a.poll_transmit().unwrap();
    assert_eq!(to, server);
    net.now += Duration::from_secs(3);
    net.a.handle_timeout(net.now);

    // The alternate answers with the same mapping: not symmetric.
    let (to, payload) = net.a.poll_transmit().unwrap();
    assert_eq!(to, alternate);
    let req = decode_stun(&payload);
    net.a
        .handle_read(net.now, alternate, &nat_response(&req, mapped, Some(alternate)).raw);

    // The changed-port probe goes back to the primary server; a
    // response despite the changed source port means only the address
    // is filtered.
    let (to, payload) = net.a.poll_transmit().unwrap();
    assert_eq!(to, server);
    let req = decode_stun(&payload);
    net.a
        .handle_read(net.now, server, &nat_response(&req, mapped, None).raw);

    let events = net.drain_a();
    assert!(
        events.iter().any(|e| matches!(
            e,
            Event::NatDiscovered {
                nat: NatType::AddressRestricted,
                ..
            }
        )),
        "wrong discovery outcome: {events:?}"
    );
}

#[test]
fn test_always_relay_suppresses_host_candidates() {
    let turn_server: SocketAddr = "198.51.100.9:3478".parse().unwrap();
    let config = EndpointConfig {
        secret: [0x33; 32],
        cert_fingerprint: fp(0xcc),
        local_addr: "10.0.0.1:5000".parse().unwrap(),
        relay_policy: RelayPolicy::Always,
        turn: Some(TurnConfig {
            server_addr: turn_server,
            username: "user".to_owned(),
            password: "pass".to_owned(),
            software: "minirtc".to_owned(),
        }),
        disable_consent_freshness: true,
    };
    let mut ep = Endpoint::new(
        config,
        Box::new(|_role| Box::new(FakeDtls::new(fp(0xdd)))),
    );
    let now = Instant::now();

    // Allocate over the TCP stream.
    ep.start_turn(now).unwrap();
    let alloc_req = decode_stun(&ep.poll_tcp_transmit().unwrap());
    assert_eq!(
        alloc_req.typ,
        MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)
    );
    let relayed: SocketAddr = "198.51.100.9:49152".parse().unwrap();
    let mut resp = Message::new();
    resp.build(&[
        Box::new(alloc_req.transaction_id),
        Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_SUCCESS_RESPONSE)),
        Box::new(RelayedAddress {
            ip: relayed.ip(),
            port: relayed.port(),
        }),
        Box::new(XorMappedAddress {
            ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 77)),
            port: 41000,
        }),
        Box::new(Lifetime(Duration::from_secs(600))),
    ])
    .unwrap();
    ep.handle_tcp_read(now, &resp.raw).unwrap();

    // The offer block advertises the relayed candidate only.
    let (slot, block) = ep.create_offer(now).unwrap();
    let parsed = OfferBlock::unmarshal(&block).unwrap();
    assert!(parsed.candidates.is_empty());
    assert_eq!(parsed.relay_candidate, Some(relayed));

    // With a remote offer set, every outbound byte goes to the TCP
    // socket as a TURN message, never out the UDP path.
    let peer_block = OfferBlock {
        generator_is_dtls_server: true,
        username: b"Apeerpee".to_vec(),
        password: b"0123456789abcdef0123456789abcdef".to_vec(),
        fingerprint: fp(0xdd),
        candidates: vec!["192.0.2.44:6000".parse().unwrap()],
        relay_candidate: None,
    };
    ep.set_remote_offer(&peer_block.marshal(), Some(slot), now)
        .unwrap();

    let mut deadline = now;
    for _ in 0..40 {
        deadline += Duration::from_millis(100);
        ep.handle_timeout(deadline);
    }
    assert!(ep.poll_transmit().is_none(), "bytes leaked to UDP");
    assert!(
        ep.poll_tcp_transmit().is_some(),
        "expected relayed traffic on the TCP stream"
    );
}

// ------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------

fn decode_stun(raw: &[u8]) -> Message {
    let mut m = Message::new();
    m.raw = raw.to_vec();
    m.decode().unwrap();
    m
}

fn nat_response(req: &Message, mapped: SocketAddr, other: Option<SocketAddr>) -> Message {
    let mut setters: Vec<Box<dyn stun::message::Setter>> = vec![
        Box::new(req.transaction_id),
        Box::new(BINDING_SUCCESS),
        Box::new(XorMappedAddress {
            ip: mapped.ip(),
            port: mapped.port(),
        }),
    ];
    if let Some(other) = other {
        setters.push(Box::new(OtherAddress(MappedAddress {
            ip: other.ip(),
            port: other.port(),
        })));
    }
    let mut resp = Message::new();
    resp.build(&setters).unwrap();
    resp
}
