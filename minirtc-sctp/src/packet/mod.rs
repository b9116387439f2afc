#[cfg(test)]
mod packet_test;

use bytes::{BufMut, BytesMut};
use crc::{CRC_32_ISCSI, Crc};
use std::fmt;

use crate::chunk::Chunk;
use shared::error::{Error, Result};

/// COMMON_HEADER_SIZE is source port(2) + destination port(2) +
/// verification tag(4) + checksum(4).
pub const COMMON_HEADER_SIZE: usize = 12;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Packet is one SCTP packet: the common header followed by chunks
/// (RFC 4960 section 3). The checksum is CRC32c computed over the
/// packet with the checksum field zeroed, stored little-endian per
/// RFC 3309 as amended by RFC 4960 appendix B.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Packet {
    pub source_port: u16,
    pub destination_port: u16,
    pub verification_tag: u32,
    pub chunks: Vec<Chunk>,
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sctp {}->{} tag={:08x} chunks=[",
            self.source_port, self.destination_port, self.verification_tag
        )?;
        for (i, c) in self.chunks.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "]")
    }
}

impl Packet {
    /// marshal serializes the packet and fills in the checksum.
    pub fn marshal(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(COMMON_HEADER_SIZE + 64);
        buf.put_u16(self.source_port);
        buf.put_u16(self.destination_port);
        buf.put_u32(self.verification_tag);
        buf.put_u32(0); // checksum placeholder

        for chunk in &self.chunks {
            chunk.marshal_to(&mut buf);
        }

        let checksum = CASTAGNOLI.checksum(&buf);
        buf[8..12].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// unmarshal parses and checksum-verifies one packet.
    pub fn unmarshal(raw: &[u8]) -> Result<Self> {
        if raw.len() < COMMON_HEADER_SIZE {
            return Err(Error::ErrPacketTooShort);
        }

        let their_checksum = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        let mut zeroed = raw.to_vec();
        zeroed[8..12].fill(0);
        if CASTAGNOLI.checksum(&zeroed) != their_checksum {
            return Err(Error::ErrChecksumMismatch);
        }

        let source_port = u16::from_be_bytes([raw[0], raw[1]]);
        let destination_port = u16::from_be_bytes([raw[2], raw[3]]);
        let verification_tag = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);

        let mut chunks = Vec::new();
        let mut offset = COMMON_HEADER_SIZE;
        while offset < raw.len() {
            let (chunk, consumed) = Chunk::unmarshal(&raw[offset..])?;
            if let Some(chunk) = chunk {
                chunks.push(chunk);
            }
            offset += consumed;
        }

        Ok(Packet {
            source_port,
            destination_port,
            verification_tag,
            chunks,
        })
    }
}
