use bytes::{BufMut, BytesMut};

use super::{read_u16, read_u32};
use shared::error::{Error, Result};

const SACK_CHUNK_MIN_SIZE: usize = 12;

/// GapAckBlock is one gap report, with start/end offsets relative to
/// the cumulative TSN.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct GapAckBlock {
    pub start: u16,
    pub end: u16,
}

/// ChunkSack is a Selective Acknowledgement (RFC 4960 section 3.3.4).
#[derive(Default, Debug, Clone, PartialEq)]
pub struct ChunkSack {
    pub cumulative_tsn_ack: u32,
    pub advertised_receiver_window_credit: u32,
    pub gap_ack_blocks: Vec<GapAckBlock>,
    pub duplicate_tsns: Vec<u32>,
}

impl ChunkSack {
    pub(crate) fn value_length(&self) -> usize {
        SACK_CHUNK_MIN_SIZE + self.gap_ack_blocks.len() * 4 + self.duplicate_tsns.len() * 4
    }

    pub(crate) fn marshal_value(&self, buf: &mut BytesMut) {
        buf.put_u32(self.cumulative_tsn_ack);
        buf.put_u32(self.advertised_receiver_window_credit);
        buf.put_u16(self.gap_ack_blocks.len() as u16);
        buf.put_u16(self.duplicate_tsns.len() as u16);
        for b in &self.gap_ack_blocks {
            buf.put_u16(b.start);
            buf.put_u16(b.end);
        }
        for tsn in &self.duplicate_tsns {
            buf.put_u32(*tsn);
        }
    }

    pub(crate) fn unmarshal_value(mut value: &[u8]) -> Result<Self> {
        if value.len() < SACK_CHUNK_MIN_SIZE {
            return Err(Error::ErrChunkTruncated);
        }
        let cumulative_tsn_ack = read_u32(&mut value)?;
        let advertised_receiver_window_credit = read_u32(&mut value)?;
        let gap_count = read_u16(&mut value)? as usize;
        let dup_count = read_u16(&mut value)? as usize;
        if value.len() < gap_count * 4 + dup_count * 4 {
            return Err(Error::ErrChunkTruncated);
        }

        let mut gap_ack_blocks = Vec::with_capacity(gap_count);
        for _ in 0..gap_count {
            let start = read_u16(&mut value)?;
            let end = read_u16(&mut value)?;
            gap_ack_blocks.push(GapAckBlock { start, end });
        }
        let mut duplicate_tsns = Vec::with_capacity(dup_count);
        for _ in 0..dup_count {
            duplicate_tsns.push(read_u32(&mut value)?);
        }

        Ok(ChunkSack {
            cumulative_tsn_ack,
            advertised_receiver_window_credit,
            gap_ack_blocks,
            duplicate_tsns,
        })
    }
}
