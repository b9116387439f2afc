#[cfg(test)]
mod endpoint_test;

pub(crate) mod demux;

use log::{debug, trace, warn};
use rand::Rng;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use datachannel::{DataChannel, DataChannelConfig};
use sctp::{Association, AssociationConfig, PayloadProtocolIdentifier};
use shared::error::{Error, Result};
use shared::marshal::Unmarshal;
use stun::attributes::ATTR_USERNAME;
use stun::error_code::{CODE_ROLE_CONFLICT, ErrorCodeAttribute};
use stun::message::{
    CLASS_INDICATION, CLASS_REQUEST, Getter, Message, METHOD_BINDING, TransactionId,
};
use turn::client::{Client as TurnClient, Event as TurnEvent};
pub use turn::client::{ClientConfig as TurnConfig, RelayPolicy};
use turn::proto::channum::{ChannelNumber, MIN_CHANNEL_NUMBER};

use crate::dtls::{DtlsEngine, DtlsEvent, DtlsRole};
use crate::ice::control::{AttrControlled, AttrControlling};
use crate::ice::nat::{NatDiscovery, NatType};
use crate::ice::use_candidate::UseCandidateAttr;
use crate::ice::{self, Role};
use crate::offer::{Candidate, Offer, OfferBlock, ScheduledCheck, char_to_slot};
use crate::session::{ConsentFreshness, ConsentProbe, RemoteAddr, Session, SessionState};
use crate::MAX_SLOTS;
use demux::Classified;

/// Consent freshness interval and failure window.
const CONSENT_INTERVAL: Duration = Duration::from_secs(15);
/// Consent probe retry cadence while unanswered.
const CONSENT_PROBE_INTERVAL: Duration = Duration::from_millis(500);
/// Window for connectivity checks before electing a candidate.
const ELECTION_WINDOW: Duration = Duration::from_secs(3);
/// Connectivity-check rounds before giving up on an offer.
const MAX_CHECK_ROUNDS: u8 = 3;

/// DtlsFactory builds one record engine per session; the endpoint
/// neither generates certificates nor touches record internals.
pub type DtlsFactory = Box<dyn Fn(DtlsRole) -> Box<dyn DtlsEngine>>;

/// EndpointConfig carries everything the endpoint cannot derive.
pub struct EndpointConfig {
    /// 32-byte secret all local ICE passwords derive from.
    pub secret: [u8; 32],
    /// SHA-256 fingerprint of the local DTLS certificate, advertised in
    /// offer blocks.
    pub cert_fingerprint: [u8; 32],
    /// Bound local UDP address (IPv4).
    pub local_addr: SocketAddr,
    pub relay_policy: RelayPolicy,
    pub turn: Option<TurnConfig>,
    /// Suppresses the consent-freshness probes (interop escape hatch).
    pub disable_consent_freshness: bool,
}

/// Event is the application-visible surface, polled from the driving
/// loop.
#[derive(Debug)]
pub enum Event {
    /// DTLS and SCTP are up on this offer's elected pair.
    Connected { slot: usize },
    /// The one disconnect path: consent failure, liveness expiry, DTLS
    /// teardown, peer close, or local close.
    Disconnected { slot: usize },
    /// One complete message, tagged string or binary by PPID.
    Data {
        slot: usize,
        stream_id: u16,
        ppid: PayloadProtocolIdentifier,
        payload: Vec<u8>,
    },
    /// All queued sends are in flight; more may be written.
    SendBufferEmpty { slot: usize },
    /// The peer opened a data channel.
    DataChannelOpen {
        slot: usize,
        stream_id: u16,
        label: String,
        protocol: String,
    },
    /// The peer acknowledged a locally opened channel.
    DataChannelAck { slot: usize, stream_id: u16 },
    /// NAT discovery finished.
    NatDiscovered {
        nat: NatType,
        mapped: Option<SocketAddr>,
    },
    /// The local candidate set changed (server-reflexive or relayed
    /// address learned); re-signal this block.
    OfferUpdated { slot: usize, block: Vec<u8> },
}

/// Endpoint is the process-wide protocol engine: the offer and session
/// slot tables, the demultiplexer, the ICE machinery and the TURN
/// client, glued to an external DTLS record engine.
///
/// Sans-IO. The driving loop feeds UDP datagrams to
/// [`handle_read`](Endpoint::handle_read), TURN TCP segments to
/// [`handle_tcp_read`](Endpoint::handle_tcp_read), fires
/// [`handle_timeout`](Endpoint::handle_timeout) at
/// [`poll_timeout`](Endpoint::poll_timeout), and drains
/// [`poll_transmit`](Endpoint::poll_transmit) /
/// [`poll_tcp_transmit`](Endpoint::poll_tcp_transmit) /
/// [`poll_event`](Endpoint::poll_event).
pub struct Endpoint {
    secret: [u8; 32],
    cert_fingerprint: [u8; 32],
    local_addr: SocketAddr,
    relay_policy: RelayPolicy,
    disable_consent_freshness: bool,
    dtls_factory: DtlsFactory,

    offers: [Option<Offer>; MAX_SLOTS],
    sessions: [Option<Session>; MAX_SLOTS],

    turn: Option<TurnClient>,
    relayed_addr: Option<SocketAddr>,
    nat: Option<NatDiscovery>,
    srflx_addr: Option<SocketAddr>,

    /// Reference point for the millisecond stamps embedded in consent
    /// transaction ids.
    epoch: Instant,

    transmits: VecDeque<(SocketAddr, Vec<u8>)>,
    events: VecDeque<Event>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig, dtls_factory: DtlsFactory) -> Self {
        let turn = config.turn.map(TurnClient::new);
        Endpoint {
            secret: config.secret,
            cert_fingerprint: config.cert_fingerprint,
            local_addr: config.local_addr,
            relay_policy: config.relay_policy,
            disable_consent_freshness: config.disable_consent_freshness,
            dtls_factory,
            offers: std::array::from_fn(|_| None),
            sessions: std::array::from_fn(|_| None),
            turn,
            relayed_addr: None,
            nat: None,
            srflx_addr: None,
            epoch: Instant::now(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    // ---------------------------------------------------------------
    // Offer management
    // ---------------------------------------------------------------

    /// create_offer allocates a slot and returns its signaling block.
    /// The creator takes the DTLS client (and so ICE-CONTROLLING) role,
    /// probes once the answer arrives, and initiates the SCTP
    /// association when DTLS completes.
    pub fn create_offer(&mut self, now: Instant) -> Result<(usize, Vec<u8>)> {
        let slot = self.free_offer_slot(now)?;
        let offer = Offer::new(slot, &self.secret, DtlsRole::Client, now);
        let block = self.build_block(&offer);
        self.offers[slot] = Some(offer);
        Ok((slot, block))
    }

    /// set_remote_offer ingests a peer's block. With `local_slot` it is
    /// an answer to an offer this endpoint created; without, it is a
    /// fresh remote offer and this endpoint becomes the DTLS client and
    /// ICE-CONTROLLING side.
    pub fn set_remote_offer(
        &mut self,
        block: &[u8],
        local_slot: Option<usize>,
        now: Instant,
    ) -> Result<usize> {
        let block = OfferBlock::unmarshal(block)?;

        // Reuse the slot when the same credentials show up again.
        let remote_username = String::from_utf8(block.username.clone())?;
        let reuse = local_slot.or_else(|| {
            self.offers.iter().position(|o| {
                o.as_ref().is_some_and(|o| {
                    !o.remote_username.is_empty()
                        && o.remote_username == remote_username
                        && o.remote_password.as_bytes() == &block.password[..]
                })
            })
        });
        // An answer (its generator took the server role) without a slot
        // hint binds to the oldest offer still waiting for one.
        let reuse = reuse.or_else(|| {
            if block.generator_is_dtls_server {
                self.offers.iter().position(|o| {
                    o.as_ref()
                        .is_some_and(|o| o.created_locally && o.remote_username.is_empty())
                })
            } else {
                None
            }
        });

        let slot = match reuse {
            Some(slot) => {
                if self.offers[slot].is_none() {
                    return Err(Error::ErrUnknownSlot);
                }
                slot
            }
            None => {
                let slot = self.free_offer_slot(now)?;
                let role = if block.generator_is_dtls_server {
                    DtlsRole::Client
                } else {
                    DtlsRole::Server
                };
                self.offers[slot] = Some(Offer::new(slot, &self.secret, role, now));
                slot
            }
        };

        let mut offer = self.offers[slot].take().expect("slot populated above");
        offer.remote_username = remote_username;
        offer.remote_password = String::from_utf8(block.password)?;
        offer.remote_fingerprint = block.fingerprint;
        offer.candidates = block
            .candidates
            .iter()
            .map(|&addr| Candidate {
                addr,
                reachable: false,
            })
            .collect();
        if let Some(relay) = block.relay_candidate {
            if offer.candidates.len() < crate::offer::MAX_CANDIDATES {
                offer.candidates.push(Candidate {
                    addr: relay,
                    reachable: false,
                });
            }
        }
        offer.responded = vec![false; offer.candidates.len()];

        if !offer.peer_is_controlling {
            // Controlling side: randomized-delay checks per candidate,
            // then an election after the check window.
            self.schedule_checks(&mut offer, now);
        } else {
            // Controlled side only keeps the pair warm.
            offer.next_keepalive = Some(now + keepalive_delay());
        }

        // Ask the relay to pass the peer's packets.
        if let Some(turn) = &mut self.turn {
            if turn.is_allocated() {
                let peers: Vec<SocketAddr> = offer.candidates.iter().map(|c| c.addr).collect();
                let _ = turn.create_permission(&peers, now);
            }
        }

        self.offers[slot] = Some(offer);
        Ok(slot)
    }

    /// offer_block re-emits the signaling block for a local slot with
    /// the current candidate set.
    pub fn offer_block(&self, slot: usize) -> Result<Vec<u8>> {
        let offer = self.offers[slot].as_ref().ok_or(Error::ErrUnknownSlot)?;
        Ok(self.build_block(offer))
    }

    fn build_block(&self, offer: &Offer) -> Vec<u8> {
        let mut candidates = Vec::new();
        if self.relay_policy != RelayPolicy::Always {
            candidates.push(self.local_addr);
            if let Some(srflx) = self.srflx_addr {
                if srflx != self.local_addr {
                    candidates.push(srflx);
                }
            }
        }
        OfferBlock {
            generator_is_dtls_server: offer.dtls_role == DtlsRole::Server,
            username: offer.local_username.to_vec(),
            password: offer.local_password.clone().into_bytes(),
            fingerprint: self.cert_fingerprint,
            candidates,
            relay_candidate: self.relayed_addr,
        }
        .marshal()
    }

    fn free_offer_slot(&mut self, now: Instant) -> Result<usize> {
        if let Some(slot) = self.offers.iter().position(|o| o.is_none()) {
            return Ok(slot);
        }
        // Evict the oldest expired, sessionless offer.
        let victim = self
            .offers
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.as_ref().map(|o| (i, o)))
            .filter(|(_, o)| o.is_expired(now))
            .min_by_key(|(_, o)| o.created_at)
            .map(|(i, _)| i);
        match victim {
            Some(slot) => {
                self.offers[slot] = None;
                Ok(slot)
            }
            None => Err(Error::ErrSlotsExhausted),
        }
    }

    fn schedule_checks(&self, offer: &mut Offer, now: Instant) {
        let mut rng = rand::rng();
        // Two independently delayed probes per candidate, so one lost
        // datagram does not write a candidate off.
        offer.checks = Vec::with_capacity(offer.candidates.len() * 2);
        for candidate_index in 0..offer.candidates.len() {
            for _ in 0..2 {
                offer.checks.push(ScheduledCheck {
                    candidate_index,
                    at: now + Duration::from_millis(rng.random_range(100..500)),
                    sent: false,
                });
            }
        }
        offer.responded = vec![false; offer.candidates.len()];
        offer.election_deadline = Some(now + ELECTION_WINDOW);
        offer.nominated = None;
    }

    // ---------------------------------------------------------------
    // Application surface
    // ---------------------------------------------------------------

    /// open_channel opens a data channel on the slot's session and
    /// returns the assigned stream id (odd for the DTLS client, even
    /// for the server).
    pub fn open_channel(
        &mut self,
        slot: usize,
        label: &str,
        protocol: &str,
        now: Instant,
    ) -> Result<u16> {
        let session_slot = self.session_slot(slot)?;
        let mut session = self.sessions[session_slot].take().unwrap();

        let result = (|| {
            if session.state != SessionState::Established || !session.assoc.is_established() {
                return Err(Error::ErrSessionNotEstablished);
            }
            let stream_id = session.next_stream_id()?;
            let channel = DataChannel::dial(
                DataChannelConfig {
                    label: label.to_owned(),
                    protocol: protocol.to_owned(),
                    ..Default::default()
                },
                stream_id,
            )?;
            session.channels.push(channel);
            Ok(stream_id)
        })();

        self.flush_channels(&mut session, now);
        if self.pump_session_inner(&mut session, now) {
            self.finish_teardown(session, now);
        } else {
            self.sessions[session_slot] = Some(session);
        }
        result
    }

    /// send writes one message to an open channel; `binary` selects the
    /// PPID tag.
    pub fn send(
        &mut self,
        slot: usize,
        stream_id: u16,
        binary: bool,
        data: &[u8],
        now: Instant,
    ) -> Result<()> {
        let session_slot = self.session_slot(slot)?;
        let mut session = self.sessions[session_slot].take().unwrap();

        let result = match session.channel_mut(stream_id) {
            Some(channel) => {
                channel.write(binary, data);
                Ok(())
            }
            None => Err(Error::ErrUnknownSlot),
        };

        self.flush_channels(&mut session, now);
        if self.pump_session_inner(&mut session, now) {
            self.finish_teardown(session, now);
        } else {
            self.sessions[session_slot] = Some(session);
        }
        result
    }

    /// close tears the slot's session down gracefully: best-effort DTLS
    /// close_notify, queues drained, one Disconnected event.
    pub fn close(&mut self, slot: usize, now: Instant) {
        if let Ok(session_slot) = self.session_slot(slot) {
            self.teardown_session(session_slot, now, true);
        }
    }

    pub fn poll_transmit(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.transmits.pop_front()
    }

    pub fn poll_tcp_transmit(&mut self) -> Option<Vec<u8>> {
        self.turn.as_mut()?.poll_transmit()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// session_dtls_role reports the role the slot's session actually
    /// elected, for asserting it against the offer's role flag.
    pub fn session_dtls_role(&self, slot: usize) -> Option<DtlsRole> {
        let session_slot = self.session_slot(slot).ok()?;
        self.sessions[session_slot].as_ref().map(|s| s.dtls_role)
    }

    fn session_slot(&self, offer_slot: usize) -> Result<usize> {
        self.offers
            .get(offer_slot)
            .and_then(|o| o.as_ref())
            .and_then(|o| o.session_slot)
            .ok_or(Error::ErrSessionNotEstablished)
    }

    // ---------------------------------------------------------------
    // NAT discovery and TURN
    // ---------------------------------------------------------------

    /// discover_nat starts the RFC 5780 classification ladder.
    pub fn discover_nat(&mut self, server: SocketAddr, now: Instant) -> Result<()> {
        let mut nat = NatDiscovery::new(server, self.local_addr);
        nat.start(now)?;
        while let Some((to, payload)) = nat.poll_transmit() {
            self.transmits.push_back((to, payload));
        }
        self.nat = Some(nat);
        Ok(())
    }

    /// start_turn opens the relay allocation on the configured server.
    pub fn start_turn(&mut self, now: Instant) -> Result<()> {
        let turn = self.turn.as_mut().ok_or(Error::ErrTurnNotConnected)?;
        turn.allocate(now)
    }

    /// handle_tcp_read feeds bytes read from the TURN TCP socket.
    pub fn handle_tcp_read(&mut self, now: Instant, buf: &[u8]) -> Result<()> {
        let Some(turn) = self.turn.as_mut() else {
            return Err(Error::ErrTurnNotConnected);
        };
        turn.handle_read(buf, now)?;
        self.process_turn_events(now);
        Ok(())
    }

    fn process_turn_events(&mut self, now: Instant) {
        loop {
            let Some(turn) = self.turn.as_mut() else {
                return;
            };
            let Some(event) = turn.poll_event() else {
                return;
            };
            match event {
                TurnEvent::AllocateResponse {
                    relayed, mapped, ..
                } => {
                    self.relayed_addr = relayed;
                    if self.srflx_addr.is_none() {
                        self.srflx_addr = mapped;
                    }
                    if relayed.is_some() {
                        self.emit_offer_updates();
                    }
                }
                TurnEvent::Data { peer, data } => {
                    // A relayed datagram is just an inbound datagram
                    // with the peer as its source.
                    self.handle_read(now, peer, &data);
                }
                TurnEvent::ChannelData { number, data } => {
                    self.handle_relay_frame(now, number, &data);
                }
                TurnEvent::CreatePermissionResponse { success } => {
                    if !success {
                        warn!("turn permission refused");
                    }
                }
                TurnEvent::ChannelBindResponse { number, success } => {
                    debug!("turn channel bind {number}: {success}");
                }
            }
        }
    }

    fn emit_offer_updates(&mut self) {
        for slot in 0..MAX_SLOTS {
            let Some(offer) = self.offers[slot].as_ref() else {
                continue;
            };
            if offer.session_slot.is_some() {
                continue;
            }
            let block = self.build_block(offer);
            self.events.push_back(Event::OfferUpdated { slot, block });
        }
    }

    fn handle_relay_frame(&mut self, now: Instant, number: ChannelNumber, buf: &[u8]) {
        let from = RemoteAddr::Relay(number);
        match demux::classify(buf) {
            Classified::Stun(msg) => {
                let Some(peer) = self.turn.as_ref().and_then(|t| t.binding_peer(number)) else {
                    return;
                };
                self.handle_stun(now, peer, *msg);
            }
            Classified::Dtls => self.handle_dtls_datagram(now, from, buf),
            Classified::Drop => trace!("dropping unclassifiable relay frame (ch={number})"),
        }
    }

    // ---------------------------------------------------------------
    // Inbound datagrams
    // ---------------------------------------------------------------

    /// handle_read classifies and processes one inbound UDP datagram.
    pub fn handle_read(&mut self, now: Instant, src: SocketAddr, buf: &[u8]) {
        match demux::classify(buf) {
            Classified::Stun(msg) => self.handle_stun(now, src, *msg),
            Classified::Dtls => self.handle_dtls_datagram(now, RemoteAddr::Udp(src), buf),
            Classified::Drop => trace!("dropping unclassifiable datagram from {src}"),
        }
    }

    fn handle_stun(&mut self, now: Instant, src: SocketAddr, msg: Message) {
        if msg.typ.class == CLASS_REQUEST {
            if msg.typ.method == METHOD_BINDING {
                self.handle_binding_request(now, src, msg);
            }
            return;
        }
        if msg.typ.class == CLASS_INDICATION {
            return;
        }
        self.handle_stun_response(now, src, msg);
    }

    fn handle_binding_request(&mut self, now: Instant, src: SocketAddr, msg: Message) {
        let Ok(username) = msg.get(ATTR_USERNAME) else {
            debug!("binding request without USERNAME from {src}");
            return;
        };
        if username.len() < 8 {
            return;
        }
        let Some(slot) = char_to_slot(username[0]) else {
            return;
        };

        let Some(mut offer) = self.offers[slot].take() else {
            return;
        };
        // The local fragment must be ours, byte for byte; the key is
        // re-derived, never stored.
        if username[..8] != offer.local_username {
            self.offers[slot] = Some(offer);
            return;
        }
        let key = ice::compute_integrity_key(&username[..8], &self.secret);
        if ice::verify_request(&msg, &key).is_err() {
            debug!("binding request failed authentication from {src}");
            self.offers[slot] = Some(offer);
            return;
        }

        offer.mark_reachable(src);

        // Role conflict (RFC 5245 section 7.2.1.1). The side with the
        // lower tie-breaker yields; the winner answers 487.
        let mut controlling = AttrControlling::default();
        let mut controlled = AttrControlled::default();
        if controlling.get_from(&msg).is_ok() && !offer.peer_is_controlling {
            if offer.tie_breaker < controlling.0 {
                debug!("role conflict: yielding controlling role on slot {slot}");
                offer.peer_is_controlling = true;
                offer.dtls_role = DtlsRole::Server;
                offer.checks.clear();
                offer.election_deadline = None;
                offer.next_keepalive = Some(now + keepalive_delay());
            } else {
                if let Ok(resp) = ice::role_conflict_response(msg.transaction_id, src, &key) {
                    self.send_datagram(RemoteAddr::Udp(src), resp.raw);
                }
                self.offers[slot] = Some(offer);
                return;
            }
        } else if controlled.get_from(&msg).is_ok() && offer.peer_is_controlling {
            if offer.tie_breaker < controlled.0 {
                debug!("role conflict: taking controlling role on slot {slot}");
                offer.peer_is_controlling = false;
                offer.dtls_role = DtlsRole::Client;
                self.schedule_checks(&mut offer, now);
            } else {
                if let Ok(resp) = ice::role_conflict_response(msg.transaction_id, src, &key) {
                    self.send_datagram(RemoteAddr::Udp(src), resp.raw);
                }
                self.offers[slot] = Some(offer);
                return;
            }
        }

        if let Ok(resp) = ice::binding_success_response(msg.transaction_id, src, &key) {
            self.send_datagram(RemoteAddr::Udp(src), resp.raw);
        }

        if UseCandidateAttr::is_set(&msg) && offer.peer_is_controlling {
            trace!("peer nominated {src} for slot {slot}");
            // Nothing else to do: the pair is reachable now, and the
            // controlling peer initiates DTLS toward us.
        }

        self.offers[slot] = Some(offer);
    }

    fn handle_stun_response(&mut self, now: Instant, src: SocketAddr, msg: Message) {
        // NAT discovery matches on the full transaction id and comes
        // first; its ids are random, not slot-tagged.
        if let Some(nat) = self.nat.as_mut() {
            if nat.matches(&msg) {
                let _ = nat.handle_response(&msg, now);
                self.pump_nat(now);
                return;
            }
        }

        let b0 = msg.transaction_id.0[0];
        if b0 & 0x80 != 0 {
            self.handle_consent_response((b0 & 0x7f) as usize, now, msg);
        } else {
            self.handle_check_response(b0 as usize, now, src, msg);
        }
    }

    fn handle_check_response(
        &mut self,
        slot: usize,
        now: Instant,
        src: SocketAddr,
        msg: Message,
    ) {
        if slot >= MAX_SLOTS {
            return;
        }
        let Some(mut offer) = self.offers[slot].take() else {
            return;
        };

        // A 487 means the peer won the tie-breaker comparison: adopt
        // the controlled role and let it drive.
        let mut code = ErrorCodeAttribute::default();
        if code.get_from(&msg).is_ok() && code.code == CODE_ROLE_CONFLICT {
            debug!("peer reported role conflict on slot {slot}; yielding");
            offer.peer_is_controlling = true;
            offer.dtls_role = DtlsRole::Server;
            offer.checks.clear();
            offer.election_deadline = None;
            offer.next_keepalive = Some(now + keepalive_delay());
            self.offers[slot] = Some(offer);
            return;
        }

        let authenticated = stun::integrity::MessageIntegrity::new_short_term_integrity(
            offer.remote_password.clone(),
        )
        .check(&msg)
        .is_ok();
        if !authenticated {
            self.offers[slot] = Some(offer);
            return;
        }

        if let Some(i) = offer.candidates.iter().position(|c| c.addr == src) {
            if let Some(r) = offer.responded.get_mut(i) {
                *r = true;
            }
        }
        self.offers[slot] = Some(offer);
    }

    fn handle_consent_response(&mut self, session_slot: usize, now: Instant, msg: Message) {
        if session_slot >= MAX_SLOTS {
            return;
        }
        let Some(mut session) = self.sessions[session_slot].take() else {
            return;
        };

        let offer_slot = session.offer_slot;
        let key = self.offers[offer_slot]
            .as_ref()
            .map(|o| o.remote_password.clone())
            .unwrap_or_default();
        let authenticated =
            stun::integrity::MessageIntegrity::new_short_term_integrity(key)
                .check(&msg)
                .is_ok();

        if authenticated
            && session
                .freshness
                .probe
                .map_or(false, |p| p.transaction_id == msg.transaction_id)
        {
            trace!("consent refreshed for session {session_slot}");
            session.freshness.probe = None;
            session.freshness.next_probe_at = Some(now + CONSENT_INTERVAL);
        }
        self.sessions[session_slot] = Some(session);
    }

    // ---------------------------------------------------------------
    // DTLS and session plumbing
    // ---------------------------------------------------------------

    fn handle_dtls_datagram(&mut self, now: Instant, from: RemoteAddr, buf: &[u8]) {
        let found = self
            .sessions
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.remote == from));

        let session_slot = match found {
            Some(i) => Some(i),
            None => match from {
                RemoteAddr::Udp(addr) => self.admit_dtls_source(now, addr),
                RemoteAddr::Relay(_) => None,
            },
        };
        let Some(session_slot) = session_slot else {
            trace!("dropping DTLS from unadmitted source {from:?}");
            return;
        };

        let mut session = self.sessions[session_slot].take().unwrap();
        if let Err(e) = session.dtls.handle_record(buf) {
            debug!("dtls record rejected: {e}");
        }
        let dead = self.pump_session_inner(&mut session, now);
        if dead {
            self.finish_teardown(session, now);
        } else {
            self.sessions[session_slot] = Some(session);
        }
    }

    /// admit_dtls_source applies the candidate allowlist: DTLS may only
    /// come from a source a previously authenticated binding request
    /// proved reachable. A known offer with a session on another
    /// reachable candidate migrates instead (address mobility).
    fn admit_dtls_source(&mut self, now: Instant, addr: SocketAddr) -> Option<usize> {
        let offer_slot = (0..MAX_SLOTS).find(|&i| {
            self.offers[i]
                .as_ref()
                .is_some_and(|o| o.is_reachable_candidate(addr))
        })?;

        let existing = self.offers[offer_slot].as_ref().and_then(|o| o.session_slot);
        if let Some(session_slot) = existing {
            if let Some(session) = self.sessions[session_slot].as_mut() {
                debug!("session {session_slot} migrates to {addr}");
                session.remote = RemoteAddr::Udp(addr);
            }
            return Some(session_slot);
        }

        let role = self.offers[offer_slot].as_ref().map(|o| o.dtls_role)?;
        match self.create_session(now, offer_slot, RemoteAddr::Udp(addr), role) {
            Ok(slot) => Some(slot),
            Err(e) => {
                warn!("cannot admit DTLS source {addr}: {e}");
                None
            }
        }
    }

    fn create_session(
        &mut self,
        now: Instant,
        offer_slot: usize,
        remote: RemoteAddr,
        role: DtlsRole,
    ) -> Result<usize> {
        let session_slot = self
            .sessions
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::ErrSlotsExhausted)?;

        let mut dtls = (self.dtls_factory)(role);
        dtls.start_handshake(role)?;

        let session = Session {
            offer_slot,
            remote,
            dtls,
            dtls_role: role,
            assoc: Association::new(AssociationConfig::default(), now),
            channels: Vec::new(),
            state: SessionState::Handshake,
            next_tick: now + sctp::association::TICK_INTERVAL,
            freshness: ConsentFreshness {
                disabled: self.disable_consent_freshness,
                ..Default::default()
            },
        };
        self.sessions[session_slot] = Some(session);
        if let Some(offer) = self.offers[offer_slot].as_mut() {
            offer.session_slot = Some(session_slot);
        }

        // Bind a compact relay channel for the pair when relaying; the
        // channel number is the session slot lifted into the reserved
        // range.
        if let (RemoteAddr::Udp(peer), Some(turn)) = (remote, self.turn.as_mut()) {
            if turn.is_allocated() && self.relay_policy == RelayPolicy::Always {
                let number = ChannelNumber(MIN_CHANNEL_NUMBER + session_slot as u16);
                let _ = turn.channel_bind(number, peer, now);
            }
        }

        let mut session = self.sessions[session_slot].take().unwrap();
        let dead = self.pump_session_inner(&mut session, now);
        if dead {
            self.finish_teardown(session, now);
        } else {
            self.sessions[session_slot] = Some(session);
        }
        Ok(session_slot)
    }

    /// pump_session_inner moves data across the DTLS/SCTP boundary
    /// until quiescent. Returns true when the session died and must not
    /// be put back.
    fn pump_session_inner(&mut self, session: &mut Session, now: Instant) -> bool {
        let mut dead = false;

        // DTLS handshake / teardown events.
        while let Some(event) = session.dtls.poll_event() {
            match event {
                DtlsEvent::HandshakeComplete { peer_fingerprint } => {
                    let pinned = self.offers[session.offer_slot]
                        .as_ref()
                        .map(|o| o.remote_fingerprint)
                        .unwrap_or_default();
                    if pinned != peer_fingerprint {
                        warn!("peer certificate does not match pinned fingerprint");
                        dead = true;
                        break;
                    }
                    session.state = SessionState::Established;
                    if !session.freshness.disabled {
                        session.freshness.next_probe_at = Some(now + CONSENT_INTERVAL);
                    }
                    let initiates = self.offers[session.offer_slot]
                        .as_ref()
                        .map(|o| o.created_locally)
                        .unwrap_or(false);
                    if initiates {
                        session.assoc.connect(now);
                    }
                }
                DtlsEvent::CloseNotify => {
                    debug!("peer sent close_notify");
                    dead = true;
                }
                DtlsEvent::Fatal(reason) => {
                    warn!("dtls failure: {reason}");
                    dead = true;
                }
            }
        }

        if !dead {
            // Decrypted records feed SCTP; malformed ones are dropped.
            while let Some(plaintext) = session.dtls.poll_application_data() {
                if let Err(e) = session.assoc.handle_packet(&plaintext, now) {
                    debug!("dropping malformed SCTP packet: {e}");
                }
            }

            dead = self.drain_assoc_events(session);
            self.flush_channels(session, now);
        }

        // Outbound SCTP goes through the record layer...
        while let Some(packet) = session.assoc.poll_transmit() {
            let _ = session.dtls.write_application_data(&packet);
        }
        // ...and records go to the wire.
        while let Some(record) = session.dtls.poll_record() {
            self.send_datagram(session.remote, record);
        }

        dead
    }

    fn drain_assoc_events(&mut self, session: &mut Session) -> bool {
        let offer_slot = session.offer_slot;
        let mut dead = false;
        while let Some(event) = session.assoc.poll_event() {
            match event {
                sctp::Event::Connected => {
                    self.events.push_back(Event::Connected { slot: offer_slot });
                }
                sctp::Event::Data {
                    stream_id,
                    ppid,
                    payload,
                } => match ppid {
                    PayloadProtocolIdentifier::Dcep => {
                        self.handle_dcep(session, stream_id, &payload)
                    }
                    PayloadProtocolIdentifier::String | PayloadProtocolIdentifier::Binary => {
                        if let Some(channel) = session.channel_mut(stream_id) {
                            channel.read_received(payload.len());
                        }
                        self.events.push_back(Event::Data {
                            slot: offer_slot,
                            stream_id,
                            ppid,
                            payload,
                        });
                    }
                    PayloadProtocolIdentifier::Unknown => {
                        debug!("dropping payload with unknown PPID on stream {stream_id}");
                    }
                },
                sctp::Event::SendBufferEmpty => {
                    self.events
                        .push_back(Event::SendBufferEmpty { slot: offer_slot });
                }
                sctp::Event::Disconnected => {
                    dead = true;
                }
            }
        }
        dead
    }

    fn handle_dcep(&mut self, session: &mut Session, stream_id: u16, payload: &[u8]) {
        let offer_slot = session.offer_slot;
        let mut buf = payload;
        match datachannel::Message::unmarshal(&mut buf) {
            Ok(datachannel::Message::DataChannelOpen(_)) => {
                match DataChannel::accept(stream_id, PayloadProtocolIdentifier::Dcep, payload) {
                    Ok(channel) => {
                        self.events.push_back(Event::DataChannelOpen {
                            slot: offer_slot,
                            stream_id,
                            label: channel.label().to_owned(),
                            protocol: channel.protocol().to_owned(),
                        });
                        session.channels.push(channel);
                    }
                    Err(e) => debug!("rejecting DATA_CHANNEL_OPEN: {e}"),
                }
            }
            Ok(datachannel::Message::DataChannelAck(_)) => {
                if let Some(channel) = session.channel_mut(stream_id) {
                    channel.handle_ack();
                    self.events.push_back(Event::DataChannelAck {
                        slot: offer_slot,
                        stream_id,
                    });
                }
            }
            Err(e) => debug!("dropping malformed DCEP message: {e}"),
        }
    }

    fn flush_channels(&mut self, session: &mut Session, now: Instant) {
        for i in 0..session.channels.len() {
            while let Some(msg) = session.channels[i].poll_write() {
                if let Err(e) =
                    session
                        .assoc
                        .send(msg.stream_id, msg.ppi, &msg.payload, now)
                {
                    debug!("cannot flush stream {}: {e}", msg.stream_id);
                }
            }
        }
    }

    fn teardown_session(&mut self, session_slot: usize, now: Instant, graceful: bool) {
        let Some(mut session) = self.sessions[session_slot].take() else {
            return;
        };
        if graceful {
            session.dtls.close_notify();
        }
        self.finish_teardown(session, now);
    }

    /// finish_teardown is the single disconnect funnel: drain queues,
    /// flush the close_notify, free the offer binding and emit exactly
    /// one Disconnected.
    fn finish_teardown(&mut self, mut session: Session, _now: Instant) {
        while let Some(record) = session.dtls.poll_record() {
            self.send_datagram(session.remote, record);
        }
        session.assoc.shutdown_silently();
        session.channels.clear();

        let offer_slot = session.offer_slot;
        if let Some(offer) = self.offers[offer_slot].as_mut() {
            offer.session_slot = None;
        }
        self.events
            .push_back(Event::Disconnected { slot: offer_slot });
    }

    fn send_datagram(&mut self, remote: RemoteAddr, payload: Vec<u8>) {
        match remote {
            RemoteAddr::Relay(number) => {
                if let Some(turn) = self.turn.as_mut() {
                    let _ = turn.send_channel_data(number, &payload);
                }
            }
            RemoteAddr::Udp(addr) => {
                let relaying = self.relay_policy == RelayPolicy::Always
                    && self.turn.as_ref().is_some_and(|t| t.is_allocated());
                if relaying {
                    if let Some(turn) = self.turn.as_mut() {
                        let _ = turn.send_indication(addr, &payload);
                    }
                } else {
                    self.transmits.push_back((addr, payload));
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------

    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut deadline: Option<Instant> = None;
        let mut fold = |t: Option<Instant>| {
            if let Some(t) = t {
                deadline = Some(match deadline {
                    Some(d) if d <= t => d,
                    _ => t,
                });
            }
        };

        for offer in self.offers.iter().flatten() {
            for check in &offer.checks {
                if !check.sent {
                    fold(Some(check.at));
                }
            }
            fold(offer.election_deadline);
            fold(offer.next_keepalive);
        }
        for session in self.sessions.iter().flatten() {
            fold(Some(session.next_tick));
            fold(session.freshness.next_probe_at);
            fold(session.freshness.probe.map(|p| p.deadline));
        }
        if let Some(nat) = &self.nat {
            fold(nat.poll_timeout());
        }
        if let Some(turn) = &self.turn {
            fold(turn.poll_timeout());
        }
        deadline
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        self.fire_checks(now);
        self.fire_elections(now);
        self.fire_keepalives(now);
        self.fire_session_timers(now);

        if let Some(nat) = self.nat.as_mut() {
            nat.handle_timeout(now);
            self.pump_nat(now);
        }
        if let Some(turn) = self.turn.as_mut() {
            turn.handle_timeout(now);
            self.process_turn_events(now);
        }
    }

    fn pump_nat(&mut self, _now: Instant) {
        let Some(nat) = self.nat.as_mut() else {
            return;
        };
        while let Some((to, payload)) = nat.poll_transmit() {
            self.transmits.push_back((to, payload));
        }
        let Some(nat) = self.nat.as_mut() else {
            return;
        };
        if let Some((nat_type, mapped)) = nat.poll_result() {
            self.srflx_addr = mapped.filter(|m| *m != self.local_addr);
            self.events.push_back(Event::NatDiscovered {
                nat: nat_type,
                mapped,
            });
            if self.srflx_addr.is_some() {
                // The single server-reflexive trickle update.
                self.emit_offer_updates();
            }
        }
    }

    fn fire_checks(&mut self, now: Instant) {
        for slot in 0..MAX_SLOTS {
            let Some(mut offer) = self.offers[slot].take() else {
                continue;
            };
            for i in 0..offer.checks.len() {
                let check = offer.checks[i];
                if check.sent || check.at > now {
                    continue;
                }
                offer.checks[i].sent = true;
                let Some(candidate) = offer.candidates.get(check.candidate_index) else {
                    continue;
                };
                let addr = candidate.addr;
                let priority = candidate_priority(check.candidate_index);
                let msg = ice::binding_request(
                    check_transaction_id(slot),
                    format!(
                        "{}:{}",
                        offer.remote_username,
                        offer.local_username_str()
                    ),
                    &offer.remote_password,
                    Role::Controlling(offer.tie_breaker),
                    priority,
                    false,
                );
                if let Ok(msg) = msg {
                    self.send_datagram(RemoteAddr::Udp(addr), msg.raw);
                }
            }
            self.offers[slot] = Some(offer);
        }
    }

    fn fire_elections(&mut self, now: Instant) {
        for slot in 0..MAX_SLOTS {
            let Some(mut offer) = self.offers[slot].take() else {
                continue;
            };
            let due = offer.election_deadline.is_some_and(|d| d <= now);
            if !due {
                self.offers[slot] = Some(offer);
                continue;
            }
            offer.election_deadline = None;

            // Highest-priority responding candidate; the block orders
            // candidates best-first.
            let elected = offer.responded.iter().position(|&r| r);
            match elected {
                Some(index) => {
                    let addr = offer.candidates[index].addr;
                    offer.candidates[index].reachable = true;
                    offer.nominated = Some(index);
                    debug!("slot {slot} elects candidate {addr}");

                    let msg = ice::binding_request(
                        check_transaction_id(slot),
                        format!(
                            "{}:{}",
                            offer.remote_username,
                            offer.local_username_str()
                        ),
                        &offer.remote_password,
                        Role::Controlling(offer.tie_breaker),
                        candidate_priority(index),
                        true,
                    );
                    if let Ok(msg) = msg {
                        self.send_datagram(RemoteAddr::Udp(addr), msg.raw);
                    }

                    // The controlling side is the DTLS client; start
                    // the handshake toward the elected pair now. The
                    // offer goes back on the table first so the session
                    // can bind to it.
                    let role = offer.dtls_role;
                    self.offers[slot] = Some(offer);
                    if let Err(e) = self.create_session(now, slot, RemoteAddr::Udp(addr), role)
                    {
                        warn!("cannot start session for slot {slot}: {e}");
                    }
                    continue;
                }
                None if offer.requery_count + 1 < MAX_CHECK_ROUNDS => {
                    offer.requery_count += 1;
                    debug!(
                        "slot {slot}: no candidate responded, round {}",
                        offer.requery_count + 1
                    );
                    self.schedule_checks(&mut offer, now);
                }
                None => {
                    debug!("slot {slot}: connectivity checks exhausted");
                }
            }
            self.offers[slot] = Some(offer);
        }
    }

    fn fire_keepalives(&mut self, now: Instant) {
        for slot in 0..MAX_SLOTS {
            let Some(mut offer) = self.offers[slot].take() else {
                continue;
            };
            let due =
                offer.session_slot.is_none() && offer.next_keepalive.is_some_and(|t| t <= now);
            if due {
                for i in 0..offer.candidates.len() {
                    let addr = offer.candidates[i].addr;
                    let msg = ice::binding_request(
                        check_transaction_id(slot),
                        format!(
                            "{}:{}",
                            offer.remote_username,
                            offer.local_username_str()
                        ),
                        &offer.remote_password,
                        if offer.peer_is_controlling {
                            Role::Controlled(offer.tie_breaker)
                        } else {
                            Role::Controlling(offer.tie_breaker)
                        },
                        candidate_priority(i),
                        false,
                    );
                    if let Ok(msg) = msg {
                        self.send_datagram(RemoteAddr::Udp(addr), msg.raw);
                    }
                }
                offer.next_keepalive = Some(now + keepalive_delay());
            }
            self.offers[slot] = Some(offer);
        }
    }

    fn fire_session_timers(&mut self, now: Instant) {
        for session_slot in 0..MAX_SLOTS {
            let Some(mut session) = self.sessions[session_slot].take() else {
                continue;
            };

            // SCTP tick, catching up if the loop overslept.
            let mut dead = false;
            while session.next_tick <= now {
                session.next_tick += sctp::association::TICK_INTERVAL;
                session.assoc.handle_tick(now);
            }
            if self.pump_session_inner(&mut session, now) {
                dead = true;
            }

            // Consent freshness.
            if !dead && session.state == SessionState::Established {
                dead = self.drive_consent(&mut session, session_slot, now);
            }

            if dead {
                self.finish_teardown(session, now);
            } else {
                self.sessions[session_slot] = Some(session);
            }
        }
    }

    /// drive_consent runs the 15 s probe schedule; returns true when
    /// consent expired and the session must die.
    fn drive_consent(&mut self, session: &mut Session, session_slot: usize, now: Instant) -> bool {
        if session.freshness.disabled {
            return false;
        }

        if let Some(probe) = session.freshness.probe {
            if now < probe.deadline {
                return false;
            }
            if now.duration_since(probe.started_at) >= CONSENT_INTERVAL {
                warn!("consent freshness expired for session {session_slot}");
                return true;
            }
            // Re-probe on the 500 ms cadence, keeping the original
            // start so the failure window stays anchored.
            self.send_consent_probe(session, session_slot, probe.started_at, now);
            return false;
        }

        if session
            .freshness
            .next_probe_at
            .is_some_and(|t| t <= now)
        {
            session.freshness.next_probe_at = None;
            self.send_consent_probe(session, session_slot, now, now);
        }
        false
    }

    fn send_consent_probe(
        &mut self,
        session: &mut Session,
        session_slot: usize,
        started_at: Instant,
        now: Instant,
    ) {
        let Some(offer) = self.offers[session.offer_slot].as_ref() else {
            return;
        };
        let stamp = started_at.duration_since(self.epoch).as_millis() as u64;
        let transaction_id = consent_transaction_id(session_slot, stamp);
        let msg = ice::binding_request(
            transaction_id,
            format!("{}:{}", offer.remote_username, offer.local_username_str()),
            &offer.remote_password,
            if offer.peer_is_controlling {
                Role::Controlled(offer.tie_breaker)
            } else {
                Role::Controlling(offer.tie_breaker)
            },
            0,
            false,
        );
        if let Ok(msg) = msg {
            session.freshness.probe = Some(ConsentProbe {
                started_at,
                transaction_id,
                deadline: now + CONSENT_PROBE_INTERVAL,
            });
            let remote = session.remote;
            self.send_datagram(remote, msg.raw);
        }
    }
}

/// check_transaction_id tags a connectivity-check transaction with its
/// offer slot in byte 0 so responses route in O(1).
fn check_transaction_id(slot: usize) -> TransactionId {
    let mut id = TransactionId::new();
    id.0[0] = slot as u8;
    id
}

/// consent_transaction_id tags byte 0 with `session slot | 0x80` and
/// bytes 1..9 with the probe window's start stamp. Only byte 0 is
/// interpreted on the way back; the stamp keeps probe windows distinct.
fn consent_transaction_id(session_slot: usize, stamp_millis: u64) -> TransactionId {
    let mut id = TransactionId::new();
    id.0[0] = 0x80 | session_slot as u8;
    id.0[1..9].copy_from_slice(&stamp_millis.to_le_bytes());
    id
}

fn candidate_priority(index: usize) -> u32 {
    // Host-type preference with the block order as the tie-break.
    0x7eff_ff00u32.saturating_sub(index as u32) + 0xff
}

fn keepalive_delay() -> Duration {
    Duration::from_secs(rand::rng().random_range(1..=15))
}
