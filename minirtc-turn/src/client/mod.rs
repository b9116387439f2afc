#[cfg(test)]
mod client_test;

use log::{debug, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::proto::chandata::*;
use crate::proto::channum::ChannelNumber;
use crate::proto::data::Data;
use crate::proto::lifetime::Lifetime;
use crate::proto::peeraddr::PeerAddress;
use crate::proto::relayaddr::RelayedAddress;
use crate::proto::reqtrans::RequestedTransport;
use crate::proto::PROTO_UDP;
use shared::error::{Error, Result};
use stun::attributes::*;
use stun::error_code::ErrorCodeAttribute;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::{Nonce, Realm, Software, Username};
use stun::xoraddr::XorMappedAddress;

/// Per-request deadline. TCP carries retransmission, so a request is
/// sent once and either answered or timed out.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay usage policy.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum RelayPolicy {
    /// Never use the relay.
    #[default]
    Disabled,
    /// Use the relay only if direct connectivity fails.
    Auto,
    /// Suppress host candidates and force all traffic through the relay.
    Always,
}

/// ClientConfig is a bag of config parameters for Client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub username: String,
    pub password: String,
    pub software: String,
}

#[derive(Debug)]
pub enum Event {
    /// Allocation finished. `lifetime` is zero when authentication was
    /// exhausted or the request timed out.
    AllocateResponse {
        relayed: Option<SocketAddr>,
        mapped: Option<SocketAddr>,
        lifetime: Duration,
    },
    CreatePermissionResponse {
        success: bool,
    },
    ChannelBindResponse {
        number: ChannelNumber,
        success: bool,
    },
    /// Application data decoded from a Data indication.
    Data {
        peer: SocketAddr,
        data: Vec<u8>,
    },
    /// Application data from a channel-data frame.
    ChannelData {
        number: ChannelNumber,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
enum TransactionKind {
    Allocate,
    CreatePermission,
    ChannelBind(ChannelNumber, SocketAddr),
}

struct Transaction {
    kind: TransactionKind,
    deadline: Instant,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
enum AllocateState {
    #[default]
    Idle,
    /// First, unauthenticated Allocate in flight.
    Requesting,
    /// Retry with long-term credentials in flight.
    Authenticating,
    Allocated,
    Failed,
}

/// Client is a sans-IO TURN client over a TCP stream (RFC 5766).
///
/// The caller owns the socket: inbound segments are fed to
/// [`handle_read`](Client::handle_read), outbound stream bytes drained
/// from [`poll_transmit`](Client::poll_transmit). A short TCP write
/// ("pending") is treated by the caller as packet loss; SCTP above
/// retransmits.
pub struct Client {
    server_addr: SocketAddr,
    username: String,
    password: String,
    software: Software,

    state: AllocateState,
    realm: Option<Realm>,
    nonce: Option<Nonce>,
    integrity: Option<MessageIntegrity>,

    relayed_addr: Option<SocketAddr>,
    mapped_addr: Option<SocketAddr>,
    bindings: HashMap<ChannelNumber, SocketAddr>,

    stream_in: Vec<u8>,
    transactions: HashMap<TransactionId, Transaction>,
    transmits: VecDeque<Vec<u8>>,
    events: VecDeque<Event>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            server_addr: config.server_addr,
            username: config.username,
            password: config.password,
            software: Software::new(ATTR_SOFTWARE, config.software),
            state: AllocateState::default(),
            realm: None,
            nonce: None,
            integrity: None,
            relayed_addr: None,
            mapped_addr: None,
            bindings: HashMap::new(),
            stream_in: Vec::new(),
            transactions: HashMap::new(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn relayed_addr(&self) -> Option<SocketAddr> {
        self.relayed_addr
    }

    pub fn is_allocated(&self) -> bool {
        self.state == AllocateState::Allocated
    }

    /// binding_peer returns the peer bound to `number`, if any.
    pub fn binding_peer(&self, number: ChannelNumber) -> Option<SocketAddr> {
        self.bindings.get(&number).copied()
    }

    /// allocate sends the initial (unauthenticated) Allocate request.
    pub fn allocate(&mut self, now: Instant) -> Result<()> {
        if self.state != AllocateState::Idle && self.state != AllocateState::Failed {
            return Err(Error::Other("allocation already in progress".to_owned()));
        }
        self.state = AllocateState::Requesting;

        let mut msg = Message::new();
        msg.build(&[
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)),
            Box::new(RequestedTransport {
                protocol: PROTO_UDP,
            }),
            Box::new(self.software.clone()),
            Box::new(FINGERPRINT),
        ])?;
        self.register(msg.transaction_id, TransactionKind::Allocate, now);
        self.transmits.push_back(msg.raw);
        Ok(())
    }

    fn allocate_with_auth(&mut self, now: Instant) -> Result<()> {
        let realm = self.realm.clone().ok_or(Error::ErrTurnNotConnected)?;
        let nonce = self.nonce.clone().ok_or(Error::ErrTurnNotConnected)?;
        let integrity = MessageIntegrity::new_long_term_integrity(
            &self.username,
            &realm.text,
            &self.password,
        );
        self.integrity = Some(integrity.clone());
        self.state = AllocateState::Authenticating;

        let mut msg = Message::new();
        msg.build(&[
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)),
            Box::new(RequestedTransport {
                protocol: PROTO_UDP,
            }),
            Box::new(Username::new(ATTR_USERNAME, self.username.clone())),
            Box::new(realm),
            Box::new(nonce),
            Box::new(self.software.clone()),
            Box::new(integrity),
            Box::new(FINGERPRINT),
        ])?;
        self.register(msg.transaction_id, TransactionKind::Allocate, now);
        self.transmits.push_back(msg.raw);
        Ok(())
    }

    /// create_permission requests forwarding permission for each peer.
    pub fn create_permission(&mut self, peers: &[SocketAddr], now: Instant) -> Result<()> {
        if self.state != AllocateState::Allocated {
            return Err(Error::ErrTurnNotConnected);
        }

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_CREATE_PERMISSION, CLASS_REQUEST)),
        ];
        for peer in peers {
            setters.push(Box::new(PeerAddress {
                ip: peer.ip(),
                port: peer.port(),
            }));
        }
        self.push_auth(&mut setters)?;

        let mut msg = Message::new();
        msg.build(&setters)?;
        self.register(msg.transaction_id, TransactionKind::CreatePermission, now);
        self.transmits.push_back(msg.raw);
        Ok(())
    }

    /// channel_bind binds `number` to `peer`. Channel numbers must be in
    /// the TURN-reserved range.
    pub fn channel_bind(
        &mut self,
        number: ChannelNumber,
        peer: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        if self.state != AllocateState::Allocated {
            return Err(Error::ErrTurnNotConnected);
        }
        if !number.is_valid() {
            return Err(Error::ErrInvalidChannelNumber);
        }

        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_CHANNEL_BIND, CLASS_REQUEST)),
            Box::new(number),
            Box::new(PeerAddress {
                ip: peer.ip(),
                port: peer.port(),
            }),
        ];
        self.push_auth(&mut setters)?;

        let mut msg = Message::new();
        msg.build(&setters)?;
        self.register(
            msg.transaction_id,
            TransactionKind::ChannelBind(number, peer),
            now,
        );
        self.transmits.push_back(msg.raw);
        Ok(())
    }

    /// send_indication ships application data to `peer` as an
    /// unauthenticated, fingerprinted Send indication.
    pub fn send_indication(&mut self, peer: SocketAddr, data: &[u8]) -> Result<()> {
        if self.state != AllocateState::Allocated {
            return Err(Error::ErrTurnNotConnected);
        }

        let mut msg = Message::new();
        msg.build(&[
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_SEND, CLASS_INDICATION)),
            Box::new(Data(data.to_vec())),
            Box::new(PeerAddress {
                ip: peer.ip(),
                port: peer.port(),
            }),
            Box::new(FINGERPRINT),
        ])?;
        self.transmits.push_back(msg.raw);
        Ok(())
    }

    /// send_channel_data ships application data on a bound channel.
    pub fn send_channel_data(&mut self, number: ChannelNumber, data: &[u8]) -> Result<()> {
        if !self.bindings.contains_key(&number) {
            return Err(Error::ErrNoPermission);
        }
        let mut cd = ChannelData {
            number,
            data: data.to_vec(),
            raw: vec![],
        };
        cd.encode();
        self.transmits.push_back(cd.raw);
        Ok(())
    }

    /// handle_read feeds inbound TCP stream bytes, splitting the stream
    /// into STUN-formatted messages and channel-data frames.
    pub fn handle_read(&mut self, buf: &[u8], now: Instant) -> Result<()> {
        self.stream_in.extend_from_slice(buf);

        loop {
            if self.stream_in.is_empty() {
                return Ok(());
            }
            let first = self.stream_in[0];
            if ChannelData::is_channel_data(&self.stream_in) {
                let Some(n) = ChannelData::frame_length(&self.stream_in) else {
                    return Ok(());
                };
                if self.stream_in.len() < n {
                    return Ok(());
                }
                let frame: Vec<u8> = self.stream_in.drain(..n).collect();
                self.handle_channel_data(frame)?;
            } else if first & 0xc0 == 0 {
                if self.stream_in.len() < MESSAGE_HEADER_SIZE {
                    return Ok(());
                }
                let n = MESSAGE_HEADER_SIZE
                    + u16::from_be_bytes([self.stream_in[2], self.stream_in[3]]) as usize;
                if self.stream_in.len() < n {
                    return Ok(());
                }
                let raw: Vec<u8> = self.stream_in.drain(..n).collect();
                self.handle_stun_message(raw, now)?;
            } else {
                // The stream is desynchronized; nothing sane can follow.
                self.stream_in.clear();
                return Err(Error::ErrShortChannelData);
            }
        }
    }

    fn handle_channel_data(&mut self, raw: Vec<u8>) -> Result<()> {
        let mut cd = ChannelData {
            raw,
            ..Default::default()
        };
        cd.decode()?;
        trace!("channel data received (ch={})", cd.number);
        self.events.push_back(Event::ChannelData {
            number: cd.number,
            data: cd.data,
        });
        Ok(())
    }

    fn handle_stun_message(&mut self, raw: Vec<u8>, now: Instant) -> Result<()> {
        let mut msg = Message::new();
        msg.raw = raw;
        msg.decode()?;

        if msg.typ.class == CLASS_INDICATION {
            if msg.typ.method == METHOD_DATA {
                let mut peer_addr = PeerAddress::default();
                peer_addr.get_from(&msg)?;
                let mut data = Data::default();
                data.get_from(&msg)?;
                let from = SocketAddr::new(peer_addr.ip, peer_addr.port);
                debug!("data indication received from {from}");
                self.events.push_back(Event::Data {
                    peer: from,
                    data: data.0,
                });
            }
            return Ok(());
        }

        let Some(tr) = self.transactions.remove(&msg.transaction_id) else {
            debug!("no transaction for {msg}");
            return Ok(());
        };

        match tr.kind {
            TransactionKind::Allocate => self.handle_allocate_response(&msg, now),
            TransactionKind::CreatePermission => {
                let success = msg.typ.class == CLASS_SUCCESS_RESPONSE;
                if !success {
                    warn!("create permission failed: {}", error_reason(&msg));
                }
                self.events
                    .push_back(Event::CreatePermissionResponse { success });
                Ok(())
            }
            TransactionKind::ChannelBind(number, peer) => {
                let success = msg.typ.class == CLASS_SUCCESS_RESPONSE;
                if success {
                    self.bindings.insert(number, peer);
                } else {
                    warn!("channel bind failed: {}", error_reason(&msg));
                }
                self.events
                    .push_back(Event::ChannelBindResponse { number, success });
                Ok(())
            }
        }
    }

    fn handle_allocate_response(&mut self, msg: &Message, now: Instant) -> Result<()> {
        if msg.typ.class == CLASS_SUCCESS_RESPONSE {
            let mut relayed = RelayedAddress::default();
            relayed.get_from(msg)?;
            self.relayed_addr = Some(SocketAddr::new(relayed.ip, relayed.port));

            let mut mapped = XorMappedAddress::default();
            if mapped.get_from(msg).is_ok() {
                self.mapped_addr = Some(SocketAddr::new(mapped.ip, mapped.port));
            }

            let mut lifetime = Lifetime::default();
            let _ = lifetime.get_from(msg);

            self.state = AllocateState::Allocated;
            self.events.push_back(Event::AllocateResponse {
                relayed: self.relayed_addr,
                mapped: self.mapped_addr,
                lifetime: lifetime.0,
            });
            return Ok(());
        }

        let mut code = ErrorCodeAttribute::default();
        let _ = code.get_from(msg);
        let unauthorized = code.code.0 == 401 || code.code.0 == 438;

        if unauthorized && self.state == AllocateState::Requesting {
            // One retry with long-term credentials.
            self.realm = Some(Realm::new(
                ATTR_REALM,
                String::from_utf8(msg.get(ATTR_REALM)?)?,
            ));
            self.nonce = Some(Nonce::new(
                ATTR_NONCE,
                String::from_utf8(msg.get(ATTR_NONCE)?)?,
            ));
            return self.allocate_with_auth(now);
        }

        // A second failure is final.
        warn!("allocate failed: {code}");
        self.state = AllocateState::Failed;
        self.events.push_back(Event::AllocateResponse {
            relayed: None,
            mapped: None,
            lifetime: Duration::ZERO,
        });
        Ok(())
    }

    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.transactions.values().map(|t| t.deadline).min()
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        let expired: Vec<TransactionId> = self
            .transactions
            .iter()
            .filter(|(_, t)| t.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            let Some(tr) = self.transactions.remove(&id) else {
                continue;
            };
            debug!("transaction {id} timed out");
            match tr.kind {
                TransactionKind::Allocate => {
                    self.state = AllocateState::Failed;
                    self.events.push_back(Event::AllocateResponse {
                        relayed: None,
                        mapped: None,
                        lifetime: Duration::ZERO,
                    });
                }
                TransactionKind::CreatePermission => {
                    self.events
                        .push_back(Event::CreatePermissionResponse { success: false });
                }
                TransactionKind::ChannelBind(number, _) => {
                    self.events
                        .push_back(Event::ChannelBindResponse {
                            number,
                            success: false,
                        });
                }
            }
        }
    }

    fn register(&mut self, id: TransactionId, kind: TransactionKind, now: Instant) {
        self.transactions.insert(
            id,
            Transaction {
                kind,
                deadline: now + REQUEST_TIMEOUT,
            },
        );
    }

    /// push_auth appends USERNAME, REALM, NONCE, MESSAGE-INTEGRITY and
    /// FINGERPRINT for an authenticated request.
    fn push_auth(&self, setters: &mut Vec<Box<dyn Setter>>) -> Result<()> {
        if let (Some(realm), Some(nonce), Some(integrity)) =
            (&self.realm, &self.nonce, &self.integrity)
        {
            setters.push(Box::new(Username::new(
                ATTR_USERNAME,
                self.username.clone(),
            )));
            setters.push(Box::new(realm.clone()));
            setters.push(Box::new(nonce.clone()));
            setters.push(Box::new(integrity.clone()));
        }
        setters.push(Box::new(FINGERPRINT));
        Ok(())
    }
}

fn error_reason(msg: &Message) -> String {
    let mut code = ErrorCodeAttribute::default();
    if code.get_from(msg).is_ok() {
        code.to_string()
    } else {
        msg.typ.to_string()
    }
}
