pub mod chunk_abort;
pub mod chunk_cookie;
pub mod chunk_data;
pub mod chunk_error;
pub mod chunk_heartbeat;
pub mod chunk_init;
pub mod chunk_sack;
pub mod chunk_shutdown;

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use shared::error::{Error, Result};

use chunk_abort::ChunkAbort;
use chunk_cookie::{ChunkCookieAck, ChunkCookieEcho};
use chunk_data::ChunkData;
use chunk_error::ChunkError;
use chunk_heartbeat::{ChunkHeartbeat, ChunkHeartbeatAck};
use chunk_init::ChunkInit;
use chunk_sack::ChunkSack;
use chunk_shutdown::{ChunkShutdown, ChunkShutdownAck};

/// CHUNK_HEADER_SIZE is type(1) + flags(1) + length(2).
pub const CHUNK_HEADER_SIZE: usize = 4;

/// ChunkType identifies the chunk kinds this transport understands
/// (RFC 4960 section 3.2).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    Data = 0,
    Init = 1,
    InitAck = 2,
    Sack = 3,
    Heartbeat = 4,
    HeartbeatAck = 5,
    Abort = 6,
    Shutdown = 7,
    ShutdownAck = 8,
    Error = 9,
    CookieEcho = 10,
    CookieAck = 11,
}

impl ChunkType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => ChunkType::Data,
            1 => ChunkType::Init,
            2 => ChunkType::InitAck,
            3 => ChunkType::Sack,
            4 => ChunkType::Heartbeat,
            5 => ChunkType::HeartbeatAck,
            6 => ChunkType::Abort,
            7 => ChunkType::Shutdown,
            8 => ChunkType::ShutdownAck,
            9 => ChunkType::Error,
            10 => ChunkType::CookieEcho,
            11 => ChunkType::CookieAck,
            _ => return None,
        })
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkType::Data => "DATA",
            ChunkType::Init => "INIT",
            ChunkType::InitAck => "INIT-ACK",
            ChunkType::Sack => "SACK",
            ChunkType::Heartbeat => "HEARTBEAT",
            ChunkType::HeartbeatAck => "HEARTBEAT-ACK",
            ChunkType::Abort => "ABORT",
            ChunkType::Shutdown => "SHUTDOWN",
            ChunkType::ShutdownAck => "SHUTDOWN-ACK",
            ChunkType::Error => "ERROR",
            ChunkType::CookieEcho => "COOKIE-ECHO",
            ChunkType::CookieAck => "COOKIE-ACK",
        };
        write!(f, "{s}")
    }
}

/// pad4 rounds up to the next 4-byte boundary.
pub fn pad4(l: usize) -> usize {
    (l + 3) & !3
}

/// Chunk is one decoded SCTP chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Data(ChunkData),
    Init(ChunkInit),
    InitAck(ChunkInit),
    Sack(ChunkSack),
    Heartbeat(ChunkHeartbeat),
    HeartbeatAck(ChunkHeartbeatAck),
    Abort(ChunkAbort),
    Shutdown(ChunkShutdown),
    ShutdownAck(ChunkShutdownAck),
    Error(ChunkError),
    CookieEcho(ChunkCookieEcho),
    CookieAck(ChunkCookieAck),
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.chunk_type())
    }
}

impl Chunk {
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            Chunk::Data(_) => ChunkType::Data,
            Chunk::Init(_) => ChunkType::Init,
            Chunk::InitAck(_) => ChunkType::InitAck,
            Chunk::Sack(_) => ChunkType::Sack,
            Chunk::Heartbeat(_) => ChunkType::Heartbeat,
            Chunk::HeartbeatAck(_) => ChunkType::HeartbeatAck,
            Chunk::Abort(_) => ChunkType::Abort,
            Chunk::Shutdown(_) => ChunkType::Shutdown,
            Chunk::ShutdownAck(_) => ChunkType::ShutdownAck,
            Chunk::Error(_) => ChunkType::Error,
            Chunk::CookieEcho(_) => ChunkType::CookieEcho,
            Chunk::CookieAck(_) => ChunkType::CookieAck,
        }
    }

    fn flags(&self) -> u8 {
        match self {
            Chunk::Data(c) => c.flags(),
            _ => 0,
        }
    }

    fn value_length(&self) -> usize {
        match self {
            Chunk::Data(c) => c.value_length(),
            Chunk::Init(c) | Chunk::InitAck(c) => c.value_length(),
            Chunk::Sack(c) => c.value_length(),
            Chunk::Heartbeat(c) => c.value_length(),
            Chunk::HeartbeatAck(c) => c.value_length(),
            Chunk::Abort(c) => c.value_length(),
            Chunk::Shutdown(_) => 4,
            Chunk::ShutdownAck(_) => 0,
            Chunk::Error(c) => c.value_length(),
            Chunk::CookieEcho(c) => c.value_length(),
            Chunk::CookieAck(_) => 0,
        }
    }

    /// marshal_to appends the chunk, including padding, to `buf`.
    pub fn marshal_to(&self, buf: &mut BytesMut) -> usize {
        let value_length = self.value_length();
        buf.put_u8(self.chunk_type() as u8);
        buf.put_u8(self.flags());
        buf.put_u16((CHUNK_HEADER_SIZE + value_length) as u16);

        match self {
            Chunk::Data(c) => c.marshal_value(buf),
            Chunk::Init(c) | Chunk::InitAck(c) => c.marshal_value(buf),
            Chunk::Sack(c) => c.marshal_value(buf),
            Chunk::Heartbeat(c) => c.marshal_value(buf),
            Chunk::HeartbeatAck(c) => c.marshal_value(buf),
            Chunk::Abort(c) => c.marshal_value(buf),
            Chunk::Shutdown(c) => c.marshal_value(buf),
            Chunk::ShutdownAck(_) => {}
            Chunk::Error(c) => c.marshal_value(buf),
            Chunk::CookieEcho(c) => c.marshal_value(buf),
            Chunk::CookieAck(_) => {}
        }

        let padding = pad4(value_length) - value_length;
        for _ in 0..padding {
            buf.put_u8(0);
        }
        CHUNK_HEADER_SIZE + pad4(value_length)
    }

    /// unmarshal decodes one chunk, returning it and the padded on-wire
    /// size consumed, or `(None, size)` for an unknown chunk type that
    /// was skipped by length.
    pub fn unmarshal(buf: &[u8]) -> Result<(Option<Chunk>, usize)> {
        if buf.len() < CHUNK_HEADER_SIZE {
            return Err(Error::ErrChunkTruncated);
        }
        let typ = buf[0];
        let flags = buf[1];
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if length < CHUNK_HEADER_SIZE || length > buf.len() {
            return Err(Error::ErrChunkTruncated);
        }
        let value = &buf[CHUNK_HEADER_SIZE..length];
        let consumed = pad4(length).min(buf.len());

        let Some(typ) = ChunkType::from_u8(typ) else {
            // Unknown chunk; skip it by its declared length.
            return Ok((None, consumed));
        };

        let chunk = match typ {
            ChunkType::Data => Chunk::Data(ChunkData::unmarshal_value(flags, value)?),
            ChunkType::Init => Chunk::Init(ChunkInit::unmarshal_value(value)?),
            ChunkType::InitAck => Chunk::InitAck(ChunkInit::unmarshal_value(value)?),
            ChunkType::Sack => Chunk::Sack(ChunkSack::unmarshal_value(value)?),
            ChunkType::Heartbeat => Chunk::Heartbeat(ChunkHeartbeat {
                info: value.to_vec(),
            }),
            ChunkType::HeartbeatAck => Chunk::HeartbeatAck(ChunkHeartbeatAck {
                info: value.to_vec(),
            }),
            ChunkType::Abort => Chunk::Abort(ChunkAbort {
                causes: value.to_vec(),
            }),
            ChunkType::Shutdown => Chunk::Shutdown(ChunkShutdown::unmarshal_value(value)?),
            ChunkType::ShutdownAck => Chunk::ShutdownAck(ChunkShutdownAck {}),
            ChunkType::Error => Chunk::Error(ChunkError {
                causes: value.to_vec(),
            }),
            ChunkType::CookieEcho => Chunk::CookieEcho(ChunkCookieEcho {
                cookie: value.to_vec(),
            }),
            ChunkType::CookieAck => Chunk::CookieAck(ChunkCookieAck {}),
        };
        Ok((Some(chunk), consumed))
    }
}

pub(crate) fn read_u16(buf: &mut &[u8]) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(Error::ErrChunkTruncated);
    }
    Ok(buf.get_u16())
}

pub(crate) fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::ErrChunkTruncated);
    }
    Ok(buf.get_u32())
}
