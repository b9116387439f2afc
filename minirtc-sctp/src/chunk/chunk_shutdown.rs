use bytes::{BufMut, BytesMut};

use super::read_u32;
use shared::error::{Error, Result};

/// ChunkShutdown starts a graceful close (RFC 4960 section 3.3.8).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkShutdown {
    pub cumulative_tsn_ack: u32,
}

impl ChunkShutdown {
    pub(crate) fn marshal_value(&self, buf: &mut BytesMut) {
        buf.put_u32(self.cumulative_tsn_ack);
    }

    pub(crate) fn unmarshal_value(mut value: &[u8]) -> Result<Self> {
        if value.len() < 4 {
            return Err(Error::ErrChunkTruncated);
        }
        Ok(ChunkShutdown {
            cumulative_tsn_ack: read_u32(&mut value)?,
        })
    }
}

/// ChunkShutdownAck acknowledges a SHUTDOWN (RFC 4960 section 3.3.9).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkShutdownAck {}
