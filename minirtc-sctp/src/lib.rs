#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod association;
pub mod chunk;
pub mod packet;

pub use association::{Association, AssociationConfig, Event};

use std::fmt;

/// MTU assumed for the path; DATA chunk payloads are sized so a full
/// packet stays under this.
pub const MTU: u32 = 1400;
/// Upper bound on the path MTU this implementation will consider.
pub const MAX_MTU: u32 = 2048;
/// Largest DATA chunk payload; MTU minus IP/UDP/DTLS/SCTP overhead.
pub const MAX_DATA_CHUNK_PAYLOAD: usize = 1232;
/// Advertised receiver window, and the hard cap applied to the peer's.
pub const MAX_RECEIVER_CREDITS: u32 = 100_000;
/// Streams negotiated in each direction.
pub const MAX_STREAMS: usize = 16;
/// Gap reports before a packet is fast-retransmitted.
pub const FAST_RETRY_GAP: u8 = 3;

/// PayloadProtocolIdentifier is the Payload Protocol Identifier carried
/// in a DATA chunk. The WebRTC data-channel values are registered in
/// RFC 8831 (52, the empty-string marker, is reserved and never sent).
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PayloadProtocolIdentifier {
    /// Data-channel establishment protocol (control messages).
    Dcep = 50,
    /// UTF-8 string payload.
    String = 51,
    /// Binary payload.
    Binary = 53,
    #[default]
    Unknown = 0,
}

impl From<u32> for PayloadProtocolIdentifier {
    fn from(v: u32) -> Self {
        match v {
            50 => PayloadProtocolIdentifier::Dcep,
            51 => PayloadProtocolIdentifier::String,
            53 => PayloadProtocolIdentifier::Binary,
            _ => PayloadProtocolIdentifier::Unknown,
        }
    }
}

impl fmt::Display for PayloadProtocolIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PayloadProtocolIdentifier::Dcep => "DCEP",
            PayloadProtocolIdentifier::String => "string",
            PayloadProtocolIdentifier::Binary => "binary",
            PayloadProtocolIdentifier::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}
