use std::net::SocketAddr;
use std::time::Instant;

use datachannel::DataChannel;
use sctp::Association;
use shared::error::{Error, Result};
use stun::message::TransactionId;
use turn::proto::channum::ChannelNumber;

use crate::dtls::{DtlsEngine, DtlsRole};

/// RemoteAddr is where a session's packets go: a plain UDP peer, or a
/// TURN channel binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RemoteAddr {
    Udp(SocketAddr),
    Relay(ChannelNumber),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SessionState {
    /// DTLS handshake in progress.
    Handshake,
    Established,
}

/// Consent-freshness probe in flight.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConsentProbe {
    pub(crate) started_at: Instant,
    pub(crate) transaction_id: TransactionId,
    pub(crate) deadline: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ConsentFreshness {
    pub(crate) disabled: bool,
    pub(crate) next_probe_at: Option<Instant>,
    pub(crate) probe: Option<ConsentProbe>,
}

/// Session is one established (or establishing) DTLS+SCTP association
/// bound to an elected candidate pair.
pub struct Session {
    pub(crate) offer_slot: usize,
    pub(crate) remote: RemoteAddr,
    pub(crate) dtls: Box<dyn DtlsEngine>,
    pub(crate) dtls_role: DtlsRole,
    pub(crate) assoc: Association,
    pub(crate) channels: Vec<DataChannel>,
    pub(crate) state: SessionState,
    pub(crate) next_tick: Instant,
    pub(crate) freshness: ConsentFreshness,
}

impl Session {
    /// next_stream_id picks the first unused stream of this side's
    /// parity: the DTLS client takes odd ids, the server even ones.
    pub(crate) fn next_stream_id(&self) -> Result<u16> {
        let first = match self.dtls_role {
            DtlsRole::Client => 1,
            DtlsRole::Server => 0,
        };
        let mut id = first;
        while (id as usize) < sctp::MAX_STREAMS {
            if !self.channels.iter().any(|c| c.stream_id() == id) {
                return Ok(id);
            }
            id += 2;
        }
        Err(Error::ErrStreamIdsExhausted)
    }

    pub(crate) fn channel_mut(&mut self, stream_id: u16) -> Option<&mut DataChannel> {
        self.channels.iter_mut().find(|c| c.stream_id() == stream_id)
    }
}
