use bytes::{BufMut, BytesMut};

use super::{read_u16, read_u32};
use crate::PayloadProtocolIdentifier;
use shared::error::{Error, Result};

/// DATA_CHUNK_HEADER_SIZE is tsn(4) + stream id(2) + stream seq(2) +
/// ppid(4).
pub const DATA_CHUNK_HEADER_SIZE: usize = 12;

const FLAG_UNORDERED: u8 = 4;
const FLAG_BEGINNING: u8 = 2;
const FLAG_ENDING: u8 = 1;

/// ChunkData is a payload DATA chunk (RFC 4960 section 3.3.1).
///
/// The B and E flags delimit fragments of one user message: B=1,E=1 is
/// an unfragmented message, B=1,E=0 the first fragment, B=0,E=0 a
/// middle fragment and B=0,E=1 the last.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct ChunkData {
    pub unordered: bool,
    pub beginning_fragment: bool,
    pub ending_fragment: bool,
    pub tsn: u32,
    pub stream_identifier: u16,
    pub stream_sequence_number: u16,
    pub payload_type: PayloadProtocolIdentifier,
    pub user_data: Vec<u8>,
}

impl ChunkData {
    pub(crate) fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.unordered {
            flags |= FLAG_UNORDERED;
        }
        if self.beginning_fragment {
            flags |= FLAG_BEGINNING;
        }
        if self.ending_fragment {
            flags |= FLAG_ENDING;
        }
        flags
    }

    pub(crate) fn value_length(&self) -> usize {
        DATA_CHUNK_HEADER_SIZE + self.user_data.len()
    }

    pub(crate) fn marshal_value(&self, buf: &mut BytesMut) {
        buf.put_u32(self.tsn);
        buf.put_u16(self.stream_identifier);
        buf.put_u16(self.stream_sequence_number);
        buf.put_u32(self.payload_type as u32);
        buf.put_slice(&self.user_data);
    }

    pub(crate) fn unmarshal_value(flags: u8, mut value: &[u8]) -> Result<Self> {
        if value.len() < DATA_CHUNK_HEADER_SIZE {
            return Err(Error::ErrChunkTruncated);
        }
        let tsn = read_u32(&mut value)?;
        let stream_identifier = read_u16(&mut value)?;
        let stream_sequence_number = read_u16(&mut value)?;
        let payload_type = PayloadProtocolIdentifier::from(read_u32(&mut value)?);
        Ok(ChunkData {
            unordered: flags & FLAG_UNORDERED != 0,
            beginning_fragment: flags & FLAG_BEGINNING != 0,
            ending_fragment: flags & FLAG_ENDING != 0,
            tsn,
            stream_identifier,
            stream_sequence_number,
            payload_type,
            user_data: value.to_vec(),
        })
    }
}
