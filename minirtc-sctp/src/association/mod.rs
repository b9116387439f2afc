
pub(crate) mod queue;
pub(crate) mod rto;

use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::chunk::chunk_cookie::{ChunkCookieAck, ChunkCookieEcho};
use crate::chunk::chunk_data::ChunkData;
use crate::chunk::chunk_heartbeat::{ChunkHeartbeat, ChunkHeartbeatAck};
use crate::chunk::chunk_init::ChunkInit;
use crate::chunk::chunk_sack::{ChunkSack, GapAckBlock};
use crate::chunk::chunk_shutdown::{ChunkShutdown, ChunkShutdownAck};
use crate::chunk::{Chunk, ChunkType};
use crate::packet::Packet;
use crate::{
    FAST_RETRY_GAP, MAX_DATA_CHUNK_PAYLOAD, MAX_RECEIVER_CREDITS, MAX_STREAMS, MTU,
    PayloadProtocolIdentifier,
};
use queue::{GAP_ACKED, HoldingQueue, MARKED_FOR_RETRANSMIT, OutboundPacket, PendingQueue, ReceiveHold};
use rto::RtoManager;
use shared::error::{Error, Result};

/// Liveness tick interval.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Tick count at which heartbeats start.
const HEARTBEAT_TICK: u32 = 40;
/// Tick count at which the association is torn down.
const TEARDOWN_TICK: u32 = 80;
/// Handshake chunks are re-sent every this many ticks until answered.
const HANDSHAKE_RETRY_TICKS: u32 = 10;

/// AssociationState tracks RFC 4960 section 4, reduced to the states
/// this transport can occupy.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssociationState {
    #[default]
    Closed,
    /// INIT sent, waiting for INIT-ACK.
    CookieWait,
    /// COOKIE-ECHO sent, waiting for COOKIE-ACK.
    CookieEchoed,
    Established,
    /// SHUTDOWN sent, waiting for SHUTDOWN-ACK.
    ShutdownSent,
}

/// Event is an application-visible association event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The association reached the established state.
    Connected,
    /// One complete, ordered user message.
    Data {
        stream_id: u16,
        ppid: PayloadProtocolIdentifier,
        payload: Vec<u8>,
    },
    /// The holding queue drained; everything handed to `send` is now in
    /// flight or acknowledged.
    SendBufferEmpty,
    /// The association is gone (peer abort, shutdown, or liveness
    /// expiry).
    Disconnected,
}

/// AssociationConfig selects the SCTP port pair.
#[derive(Debug, Clone)]
pub struct AssociationConfig {
    pub local_port: u16,
    pub remote_port: u16,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        AssociationConfig {
            local_port: 5000,
            remote_port: 5000,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct StreamReassembly {
    active: bool,
    ppid: PayloadProtocolIdentifier,
    buf: Vec<u8>,
}

/// Association is a single-homed, reliable-ordered SCTP association in
/// user space (RFC 4960), sized for WebRTC data channels: 16 streams,
/// one DATA chunk per packet, credit-based flow control.
///
/// Sans-IO: decrypted inbound packets enter via
/// [`handle_packet`](Association::handle_packet), outbound plaintext
/// packets leave via [`poll_transmit`](Association::poll_transmit) on
/// their way to the DTLS record layer. [`handle_tick`](Association::handle_tick)
/// must be driven every 100 ms.
pub struct Association {
    state: AssociationState,
    local_port: u16,
    remote_port: u16,

    my_verification_tag: u32,
    peer_verification_tag: u32,

    // Outbound.
    next_tsn: u32,
    stream_seq: [u16; MAX_STREAMS],
    pending: PendingQueue,
    holding: HoldingQueue,
    sender_credits: u32,
    receiver_credits: u32,
    cwnd: u32,
    ssthresh: u32,
    partial_bytes_acked: u32,
    fast_recovery_exit_point: Option<u32>,
    rto_mgr: RtoManager,
    t3_rtx_armed_at: Option<Instant>,
    last_retransmit_time: Option<Instant>,

    // Inbound.
    cumulative_tsn: u32,
    peer_seen: bool,
    receive_hold: ReceiveHold,
    reassembly: Vec<StreamReassembly>,
    duplicate_tsns: Vec<u32>,

    // Liveness and handshake.
    tick_count: u32,
    init_sent_at: Option<Instant>,
    cookie: Option<Vec<u8>>,
    epoch: Instant,

    transmits: VecDeque<Vec<u8>>,
    events: VecDeque<Event>,
}

impl Association {
    pub fn new(config: AssociationConfig, now: Instant) -> Self {
        // Keep the initial TSN out of the top half so plain integer
        // comparisons cannot wrap within a session's lifetime.
        let initial_tsn = rand::random::<u32>() >> 1;
        Association {
            state: AssociationState::Closed,
            local_port: config.local_port,
            remote_port: config.remote_port,
            my_verification_tag: rand::random::<u32>().max(1),
            peer_verification_tag: 0,
            next_tsn: initial_tsn,
            stream_seq: [0; MAX_STREAMS],
            pending: PendingQueue::default(),
            holding: HoldingQueue::default(),
            sender_credits: 4 * MTU,
            receiver_credits: 0,
            cwnd: 4 * MTU,
            ssthresh: 4 * MTU,
            partial_bytes_acked: 0,
            fast_recovery_exit_point: None,
            rto_mgr: RtoManager::new(),
            t3_rtx_armed_at: None,
            last_retransmit_time: None,
            cumulative_tsn: 0,
            peer_seen: false,
            receive_hold: ReceiveHold::default(),
            reassembly: vec![StreamReassembly::default(); MAX_STREAMS],
            duplicate_tsns: Vec::new(),
            tick_count: 0,
            init_sent_at: None,
            cookie: None,
            epoch: now,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == AssociationState::Established
    }

    /// unflushed_bytes is the application's view of bytes not yet
    /// acknowledged: in flight plus held for credits.
    pub fn unflushed_bytes(&self) -> u32 {
        self.pending.byte_count() + self.holding.byte_count()
    }

    pub(crate) fn sender_credits(&self) -> u32 {
        self.sender_credits
    }

    pub(crate) fn receiver_credits(&self) -> u32 {
        self.receiver_credits
    }

    pub(crate) fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub(crate) fn rto(&self) -> u64 {
        self.rto_mgr.rto()
    }

    pub(crate) fn pending_bytes(&self) -> u32 {
        self.pending.byte_count()
    }

    /// connect starts the handshake; the side that created the offer
    /// initiates.
    pub fn connect(&mut self, now: Instant) {
        if self.state != AssociationState::Closed {
            return;
        }
        self.state = AssociationState::CookieWait;
        self.init_sent_at = Some(now);
        self.send_init();
    }

    fn send_init(&mut self) {
        let init = ChunkInit {
            initiate_tag: self.my_verification_tag,
            advertised_receiver_window_credit: MAX_RECEIVER_CREDITS,
            num_outbound_streams: MAX_STREAMS as u16,
            num_inbound_streams: MAX_STREAMS as u16,
            initial_tsn: self.next_tsn,
            state_cookie: None,
        };
        // An INIT packet must carry verification tag zero.
        let packet = Packet {
            source_port: self.local_port,
            destination_port: self.remote_port,
            verification_tag: 0,
            chunks: vec![Chunk::Init(init)],
        };
        self.transmits.push_back(packet.marshal().to_vec());
    }

    /// send fragments one user message onto `stream_id` and transmits
    /// what the credit counters allow; the rest waits in the holding
    /// queue.
    pub fn send(
        &mut self,
        stream_id: u16,
        ppid: PayloadProtocolIdentifier,
        data: &[u8],
        now: Instant,
    ) -> Result<()> {
        if self.state != AssociationState::Established {
            return Err(Error::ErrAssociationNotEstablished);
        }
        if stream_id as usize >= MAX_STREAMS {
            return Err(Error::ErrStreamOutOfRange);
        }

        let seq = self.stream_seq[stream_id as usize];
        self.stream_seq[stream_id as usize] = seq.wrapping_add(1);

        let fragments: Vec<&[u8]> = if data.is_empty() {
            vec![&data[0..0]]
        } else {
            data.chunks(MAX_DATA_CHUNK_PAYLOAD).collect()
        };
        let last = fragments.len() - 1;

        for (i, fragment) in fragments.into_iter().enumerate() {
            let chunk = ChunkData {
                unordered: false,
                beginning_fragment: i == 0,
                ending_fragment: i == last,
                tsn: self.next_tsn,
                stream_identifier: stream_id,
                stream_sequence_number: seq,
                payload_type: ppid,
                user_data: fragment.to_vec(),
            };
            self.next_tsn = self.next_tsn.wrapping_add(1);

            let raw = Packet {
                source_port: self.local_port,
                destination_port: self.remote_port,
                verification_tag: self.peer_verification_tag,
                chunks: vec![Chunk::Data(chunk)],
            }
            .marshal()
            .to_vec();

            let packet = OutboundPacket {
                tsn: self.next_tsn.wrapping_sub(1),
                payload_len: fragment.len() as u32,
                raw,
                retries: 0,
                gap_count: 0,
                last_sent: now,
            };

            let fits = self.holding.is_empty()
                && self.sender_credits >= packet.payload_len
                && self.receiver_credits >= packet.payload_len;
            if fits {
                self.sender_credits -= packet.payload_len;
                self.receiver_credits -= packet.payload_len;
                if self.t3_rtx_armed_at.is_none() {
                    self.t3_rtx_armed_at = Some(now);
                }
                self.transmits.push_back(packet.raw.clone());
                self.pending.push_back(packet);
            } else {
                self.holding.push_back(packet);
            }
        }
        Ok(())
    }

    /// close starts a graceful shutdown.
    pub fn close(&mut self) {
        match self.state {
            AssociationState::Established => {
                self.state = AssociationState::ShutdownSent;
                self.send_chunk(Chunk::Shutdown(ChunkShutdown {
                    cumulative_tsn_ack: self.cumulative_tsn,
                }));
            }
            AssociationState::Closed => {}
            _ => self.teardown(),
        }
    }

    /// abort tears the association down immediately, without an event.
    /// Used when the layer above (DTLS) is already gone.
    pub fn shutdown_silently(&mut self) {
        self.state = AssociationState::Closed;
        self.drain();
    }

    /// handle_packet processes one decrypted inbound SCTP packet.
    pub fn handle_packet(&mut self, raw: &[u8], now: Instant) -> Result<()> {
        let packet = Packet::unmarshal(raw)?;

        let has_init = packet
            .chunks
            .iter()
            .any(|c| c.chunk_type() == ChunkType::Init);
        if !has_init && self.peer_seen && packet.verification_tag != self.my_verification_tag {
            trace!(
                "dropping packet with bad verification tag {:08x}",
                packet.verification_tag
            );
            return Ok(());
        }

        let ports = packet_ports(raw);
        let mut data_processed = false;
        for chunk in packet.chunks {
            match chunk {
                Chunk::Init(init) => self.handle_init(ports, init, now),
                Chunk::InitAck(init) => self.handle_init_ack(init, now),
                Chunk::CookieEcho(echo) => self.handle_cookie_echo(echo, now),
                Chunk::CookieAck(_) => self.handle_cookie_ack(),
                Chunk::Data(data) => {
                    self.handle_data(data);
                    data_processed = true;
                }
                Chunk::Sack(sack) => self.handle_sack(sack, now),
                Chunk::Heartbeat(hb) => {
                    self.tick_count = 0;
                    self.send_chunk(Chunk::HeartbeatAck(ChunkHeartbeatAck { info: hb.info }));
                }
                Chunk::HeartbeatAck(_) => {
                    self.tick_count = 0;
                }
                Chunk::Abort(abort) => {
                    debug!("peer aborted association ({} cause bytes)", abort.causes.len());
                    self.teardown();
                    return Ok(());
                }
                Chunk::Shutdown(_) => {
                    self.send_chunk(Chunk::ShutdownAck(ChunkShutdownAck {}));
                    self.teardown();
                    return Ok(());
                }
                Chunk::ShutdownAck(_) => {
                    if self.state == AssociationState::ShutdownSent {
                        self.teardown();
                        return Ok(());
                    }
                }
                Chunk::Error(e) => {
                    warn!("peer reported error ({} cause bytes)", e.causes.len());
                }
            }
        }

        if data_processed {
            self.send_sack();
        }
        Ok(())
    }

    fn handle_init(&mut self, ports: (u16, u16), init: ChunkInit, now: Instant) {
        if init.initiate_tag == 0 {
            return;
        }
        // A duplicate INIT is legal; re-answer it with the same
        // parameters rather than dropping state.
        self.peer_verification_tag = init.initiate_tag;
        self.peer_seen = true;
        self.receiver_credits = init
            .advertised_receiver_window_credit
            .min(MAX_RECEIVER_CREDITS);
        self.cumulative_tsn = init.initial_tsn.wrapping_sub(1);
        // Mirror the port pair the peer chose.
        self.remote_port = ports.0;
        self.local_port = ports.1;

        let ack = ChunkInit {
            initiate_tag: self.my_verification_tag,
            advertised_receiver_window_credit: MAX_RECEIVER_CREDITS,
            num_outbound_streams: MAX_STREAMS as u16,
            num_inbound_streams: MAX_STREAMS as u16,
            initial_tsn: self.next_tsn,
            // The cookie carries our send time; its echo seeds SRTT.
            state_cookie: Some(self.now_millis_at(now).to_be_bytes().to_vec()),
        };
        self.send_chunk(Chunk::InitAck(ack));
    }

    fn handle_init_ack(&mut self, init: ChunkInit, now: Instant) {
        if self.state != AssociationState::CookieWait || init.initiate_tag == 0 {
            return;
        }
        self.peer_verification_tag = init.initiate_tag;
        self.peer_seen = true;
        self.receiver_credits = init
            .advertised_receiver_window_credit
            .min(MAX_RECEIVER_CREDITS);
        self.cumulative_tsn = init.initial_tsn.wrapping_sub(1);

        if let Some(sent_at) = self.init_sent_at {
            self.rto_mgr
                .set_new_rtt(now.duration_since(sent_at).as_millis() as u64);
        }

        let Some(cookie) = init.state_cookie else {
            warn!("INIT-ACK without state cookie");
            return;
        };
        self.cookie = Some(cookie.clone());
        self.state = AssociationState::CookieEchoed;
        self.send_chunk(Chunk::CookieEcho(ChunkCookieEcho { cookie }));
    }

    fn handle_cookie_echo(&mut self, echo: ChunkCookieEcho, now: Instant) {
        // Seed SRTT from the cookie round trip.
        if echo.cookie.len() == 8 {
            let mut ts = [0u8; 8];
            ts.copy_from_slice(&echo.cookie);
            let sent = u64::from_be_bytes(ts);
            let rtt = self.now_millis_at(now).saturating_sub(sent);
            self.rto_mgr.set_new_rtt(rtt);
        }
        self.send_chunk(Chunk::CookieAck(ChunkCookieAck {}));
        if self.state != AssociationState::Established {
            self.establish();
        }
    }

    fn handle_cookie_ack(&mut self) {
        if self.state == AssociationState::CookieEchoed {
            self.establish();
        }
    }

    fn establish(&mut self) {
        self.state = AssociationState::Established;
        self.cwnd = 4 * MTU;
        self.ssthresh = 4 * MTU;
        self.sender_credits = self.cwnd;
        self.tick_count = 0;
        debug!(
            "association established (rto={}ms, peer window={})",
            self.rto_mgr.rto(),
            self.receiver_credits
        );
        self.events.push_back(Event::Connected);
    }

    fn handle_data(&mut self, chunk: ChunkData) {
        if !self.peer_seen || chunk.stream_identifier as usize >= MAX_STREAMS {
            return;
        }
        let expected = self.cumulative_tsn.wrapping_add(1);
        if chunk.tsn == expected {
            self.cumulative_tsn = chunk.tsn;
            self.deliver(chunk);
            // Drain everything that just became contiguous.
            loop {
                let next = self.cumulative_tsn.wrapping_add(1);
                match self.receive_hold.pop_next(next) {
                    Some(held) => {
                        self.cumulative_tsn = next;
                        self.deliver(held);
                    }
                    None => break,
                }
            }
        } else if chunk.tsn > expected {
            if !self.receive_hold.insert(chunk.clone()) {
                self.duplicate_tsns.push(chunk.tsn);
            }
        } else {
            // At or below the cumulative point: acknowledged but stale.
            self.duplicate_tsns.push(chunk.tsn);
        }
    }

    fn deliver(&mut self, chunk: ChunkData) {
        let sid = chunk.stream_identifier as usize;
        if chunk.beginning_fragment && chunk.ending_fragment {
            self.events.push_back(Event::Data {
                stream_id: chunk.stream_identifier,
                ppid: chunk.payload_type,
                payload: chunk.user_data,
            });
            return;
        }

        let r = &mut self.reassembly[sid];
        if chunk.beginning_fragment {
            r.active = true;
            r.ppid = chunk.payload_type;
            r.buf = chunk.user_data;
        } else if r.active {
            r.buf.extend_from_slice(&chunk.user_data);
        } else {
            trace!("middle fragment without beginning on stream {sid}, dropped");
            return;
        }

        if chunk.ending_fragment {
            let r = &mut self.reassembly[sid];
            r.active = false;
            let payload = std::mem::take(&mut r.buf);
            let ppid = r.ppid;
            self.events.push_back(Event::Data {
                stream_id: chunk.stream_identifier,
                ppid,
                payload,
            });
        }
    }

    fn send_sack(&mut self) {
        let gap_ack_blocks = self
            .receive_hold
            .gap_blocks(self.cumulative_tsn)
            .into_iter()
            .map(|(start, end)| GapAckBlock { start, end })
            .collect();
        let sack = ChunkSack {
            cumulative_tsn_ack: self.cumulative_tsn,
            advertised_receiver_window_credit: MAX_RECEIVER_CREDITS,
            gap_ack_blocks,
            duplicate_tsns: std::mem::take(&mut self.duplicate_tsns),
        };
        self.send_chunk(Chunk::Sack(sack));
    }

    fn handle_sack(&mut self, sack: ChunkSack, now: Instant) {
        // A SACK proves the peer is alive.
        self.tick_count = 0;

        let cum = sack.cumulative_tsn_ack;
        let pending_bytes_before = self.pending.byte_count();

        if let Some(exit) = self.fast_recovery_exit_point {
            if cum >= exit {
                self.fast_recovery_exit_point = None;
            }
        }

        // Dequeue everything at or below the cumulative ack, sampling
        // RTT off the first eligible packet (Karn: never off a
        // retransmitted packet, and not while any retransmission was in
        // flight alongside it).
        let mut rtt_sampled = false;
        let mut acked_bytes: u32 = 0;
        while let Some(front) = self.pending.front() {
            if front.tsn > cum {
                break;
            }
            if front.retries == 0 && !rtt_sampled {
                let clean = self
                    .last_retransmit_time
                    .map_or(true, |t| t < front.last_sent);
                if clean {
                    let rtt = now.duration_since(front.last_sent).as_millis() as u64;
                    self.rto_mgr.set_new_rtt(rtt);
                    rtt_sampled = true;
                }
            }
            let p = self.pending.pop_front().unwrap();
            acked_bytes += p.payload_len;
        }

        if acked_bytes > 0 {
            self.sender_credits = (self.sender_credits + acked_bytes).min(self.cwnd);
            self.receiver_credits =
                (self.receiver_credits + acked_bytes).min(MAX_RECEIVER_CREDITS);
        }

        if self.pending.is_empty() {
            self.sender_credits = self.cwnd;
            self.partial_bytes_acked = 0;
            self.t3_rtx_armed_at = None;
        } else {
            self.partial_bytes_acked += acked_bytes;
            if acked_bytes > 0 {
                // Lowest outstanding TSN moved; restart the timer.
                self.t3_rtx_armed_at = Some(now);
            }
        }

        // Window growth per RFC 4960 section 7.2, never past the
        // receiver-credit ceiling.
        if self.cwnd <= self.ssthresh
            && self.fast_recovery_exit_point.is_none()
            && acked_bytes != 0
            && self.cwnd < MAX_RECEIVER_CREDITS
        {
            self.cwnd = (self.cwnd + acked_bytes.min(MTU)).min(MAX_RECEIVER_CREDITS);
        } else if self.cwnd > self.ssthresh
            && self.partial_bytes_acked >= self.cwnd
            && pending_bytes_before >= self.cwnd
        {
            self.cwnd = (self.cwnd + MTU).min(MAX_RECEIVER_CREDITS);
            self.partial_bytes_acked = self.partial_bytes_acked.saturating_sub(self.cwnd);
        }

        self.process_gap_blocks(&sack, cum, now);
        self.drain_holding(now);
    }

    fn process_gap_blocks(&mut self, sack: &ChunkSack, cum: u32, now: Instant) {
        let mut window_reset = false;
        let mut immediate_retry_done = false;
        let mut any_marked = false;
        let mut idx = 0;

        for block in &sack.gap_ack_blocks {
            let gstart = cum.wrapping_add(block.start as u32);
            let gend = cum.wrapping_add(block.end as u32);

            while idx < self.pending.len() {
                let Some(p) = self.pending.get_mut(idx) else {
                    break;
                };
                if p.tsn > gend {
                    break;
                }
                let mut frt = p.gap_count;
                let payload_len = p.payload_len;

                if p.tsn < gstart {
                    // Below the block: the peer is missing it.
                    if frt < GAP_ACKED {
                        frt += 1;
                        if frt >= GAP_ACKED {
                            frt = GAP_ACKED - 1;
                        }
                    } else if frt == GAP_ACKED {
                        // Previously gap-acked, now missing again: the
                        // peer reneged on it.
                        frt = 1;
                    }
                } else if frt != GAP_ACKED {
                    // Inside the block, first time: credit it back and
                    // bar it from retransmission.
                    frt = GAP_ACKED;
                    self.sender_credits += payload_len;
                    self.partial_bytes_acked += payload_len;
                }

                if frt >= FAST_RETRY_GAP && frt < GAP_ACKED {
                    if !window_reset && self.fast_recovery_exit_point.is_none() {
                        self.ssthresh = (self.cwnd / 2).max(4 * MTU);
                        self.cwnd = self.ssthresh;
                        self.sender_credits = self.sender_credits.min(self.cwnd);
                        self.partial_bytes_acked = 0;
                        window_reset = true;
                    }
                    frt = MARKED_FOR_RETRANSMIT;
                    any_marked = true;

                    if !immediate_retry_done {
                        // First candidate goes out right now, ignoring
                        // sender credits.
                        let p = self.pending.get_mut(idx).unwrap();
                        p.last_sent = now;
                        p.retries = p.retries.saturating_add(1);
                        p.gap_count = frt;
                        let raw = p.raw.clone();
                        self.last_retransmit_time = Some(now);
                        self.t3_rtx_armed_at = Some(now);
                        self.transmits.push_back(raw);
                        immediate_retry_done = true;
                        idx += 1;
                        continue;
                    } else if self.sender_credits >= payload_len {
                        let p = self.pending.get_mut(idx).unwrap();
                        p.last_sent = now;
                        p.retries = p.retries.saturating_add(1);
                        p.gap_count = frt;
                        let raw = p.raw.clone();
                        self.sender_credits -= payload_len;
                        self.last_retransmit_time = Some(now);
                        if self.t3_rtx_armed_at.is_none() {
                            self.t3_rtx_armed_at = Some(now);
                        }
                        self.transmits.push_back(raw);
                        idx += 1;
                        continue;
                    }
                } else if frt == MARKED_FOR_RETRANSMIT && self.sender_credits >= payload_len {
                    // Marked in an earlier round; credits permit now.
                    let p = self.pending.get_mut(idx).unwrap();
                    p.last_sent = now;
                    p.retries = p.retries.saturating_add(1);
                    let raw = p.raw.clone();
                    self.sender_credits -= payload_len;
                    self.last_retransmit_time = Some(now);
                    self.transmits.push_back(raw);
                    idx += 1;
                    continue;
                }

                let p = self.pending.get_mut(idx).unwrap();
                p.gap_count = frt;
                idx += 1;
            }
        }

        if any_marked && self.fast_recovery_exit_point.is_none() {
            self.fast_recovery_exit_point = self.pending.highest_tsn();
        }
    }

    fn drain_holding(&mut self, now: Instant) {
        let had_held = !self.holding.is_empty();
        while let Some(front) = self.holding.front() {
            let len = front.payload_len;
            if self.receiver_credits < len || self.sender_credits < len {
                break;
            }
            let mut p = self.holding.pop_front().unwrap();
            p.last_sent = now;
            self.sender_credits -= len;
            self.receiver_credits -= len;
            if self.t3_rtx_armed_at.is_none() {
                self.t3_rtx_armed_at = Some(now);
            }
            self.transmits.push_back(p.raw.clone());
            self.pending.push_back(p);
        }
        if had_held && self.holding.is_empty() {
            self.events.push_back(Event::SendBufferEmpty);
        }
    }

    /// handle_tick drives retransmission, heartbeats and liveness. It
    /// must be called every [`TICK_INTERVAL`].
    pub fn handle_tick(&mut self, now: Instant) {
        match self.state {
            AssociationState::Closed => return,
            AssociationState::CookieWait => {
                self.tick_count += 1;
                if self.tick_count % HANDSHAKE_RETRY_TICKS == 0 {
                    self.init_sent_at = Some(now);
                    self.send_init();
                }
            }
            AssociationState::CookieEchoed => {
                self.tick_count += 1;
                if self.tick_count % HANDSHAKE_RETRY_TICKS == 0 {
                    if let Some(cookie) = self.cookie.clone() {
                        self.send_chunk(Chunk::CookieEcho(ChunkCookieEcho { cookie }));
                    }
                }
            }
            AssociationState::Established | AssociationState::ShutdownSent => {
                self.tick_count += 1;
                self.check_t3_rtx(now);
                if self.tick_count >= HEARTBEAT_TICK
                    && self.state == AssociationState::Established
                {
                    self.send_chunk(Chunk::Heartbeat(ChunkHeartbeat::with_timestamp(
                        self.now_millis_at(now),
                    )));
                }
            }
        }

        if self.tick_count >= TEARDOWN_TICK {
            debug!("association timed out after {} ticks", self.tick_count);
            self.teardown();
        }
    }

    fn check_t3_rtx(&mut self, now: Instant) {
        let Some(armed_at) = self.t3_rtx_armed_at else {
            return;
        };
        if now < armed_at + Duration::from_millis(self.rto_mgr.rto()) || self.pending.is_empty() {
            return;
        }

        self.t3_rtx_armed_at = None;
        self.rto_mgr.backoff();
        self.ssthresh = (self.cwnd / 2).max(4 * MTU);
        self.cwnd = MTU;
        self.sender_credits = MTU;

        let mut credits = self.sender_credits;
        let mut sent: Vec<Vec<u8>> = Vec::new();
        let mut rearmed = false;
        for p in self.pending.iter_mut() {
            if p.is_gap_acked() {
                continue;
            }
            if credits >= p.payload_len {
                p.retries = p.retries.saturating_add(1);
                p.gap_count = 0;
                p.last_sent = now;
                credits -= p.payload_len;
                sent.push(p.raw.clone());
                rearmed = true;
            } else {
                p.gap_count = MARKED_FOR_RETRANSMIT;
            }
        }
        self.sender_credits = credits;
        if !sent.is_empty() {
            self.last_retransmit_time = Some(now);
        }
        for raw in sent {
            self.transmits.push_back(raw);
        }
        if rearmed {
            self.t3_rtx_armed_at = Some(now);
        }
    }

    fn teardown(&mut self) {
        if self.state == AssociationState::Closed {
            return;
        }
        self.state = AssociationState::Closed;
        self.drain();
        self.events.push_back(Event::Disconnected);
    }

    fn drain(&mut self) {
        self.pending.clear();
        self.holding.clear();
        self.receive_hold.clear();
        for r in &mut self.reassembly {
            r.active = false;
            r.buf.clear();
        }
        self.duplicate_tsns.clear();
        self.t3_rtx_armed_at = None;
    }

    fn send_chunk(&mut self, chunk: Chunk) {
        let packet = Packet {
            source_port: self.local_port,
            destination_port: self.remote_port,
            verification_tag: self.peer_verification_tag,
            chunks: vec![chunk],
        };
        self.transmits.push_back(packet.marshal().to_vec());
    }

    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    fn now_millis_at(&self, now: Instant) -> u64 {
        now.duration_since(self.epoch).as_millis() as u64
    }
}

fn packet_ports(header: &[u8]) -> (u16, u16) {
    (
        u16::from_be_bytes([header[0], header[1]]),
        u16::from_be_bytes([header[2], header[3]]),
    )
}
