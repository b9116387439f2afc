use bytes::Buf;

use shared::error::{Error, Result};
use shared::marshal::{Marshal, MarshalSize, Unmarshal};

const CHANNEL_TYPE_LEN: usize = 1;
const PRIORITY_LEN: usize = 2;
const RELIABILITY_PARAMETER_LEN: usize = 4;
const LABEL_LENGTH_LEN: usize = 2;
const PROTOCOL_LENGTH_LEN: usize = 2;
const OPEN_HEADER_LEN: usize = CHANNEL_TYPE_LEN
    + PRIORITY_LEN
    + RELIABILITY_PARAMETER_LEN
    + LABEL_LENGTH_LEN
    + PROTOCOL_LENGTH_LEN;

const CHANNEL_TYPE_RELIABLE: u8 = 0x00;

/// ChannelType from RFC 8832 section 8.2.2. Only the reliable,
/// in-order type is supported by this transport; the partial-reliability
/// types are rejected at parse time.
#[derive(Eq, PartialEq, Copy, Clone, Debug, Default)]
pub enum ChannelType {
    #[default]
    Reliable,
}

impl MarshalSize for ChannelType {
    fn marshal_size(&self) -> usize {
        CHANNEL_TYPE_LEN
    }
}

impl Marshal for ChannelType {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: CHANNEL_TYPE_LEN,
                actual: 0,
            });
        }
        buf[0] = CHANNEL_TYPE_RELIABLE;
        Ok(CHANNEL_TYPE_LEN)
    }
}

impl Unmarshal for ChannelType {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        if buf.remaining() < CHANNEL_TYPE_LEN {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: CHANNEL_TYPE_LEN,
                actual: buf.remaining(),
            });
        }
        match buf.get_u8() {
            CHANNEL_TYPE_RELIABLE => Ok(ChannelType::Reliable),
            other => Err(Error::InvalidChannelType(other)),
        }
    }
}

/// DataChannelOpen is the DATA_CHANNEL_OPEN message (RFC 8832 section
/// 8.2.2): channel type, priority, reliability parameter (ignored for
/// reliable channels), then the label and protocol strings.
#[derive(Eq, PartialEq, Clone, Debug, Default)]
pub struct DataChannelOpen {
    pub channel_type: ChannelType,
    pub priority: u16,
    pub reliability_parameter: u32,
    pub label: Vec<u8>,
    pub protocol: Vec<u8>,
}

impl MarshalSize for DataChannelOpen {
    fn marshal_size(&self) -> usize {
        OPEN_HEADER_LEN + self.label.len() + self.protocol.len()
    }
}

impl Marshal for DataChannelOpen {
    fn marshal_to(&self, buf: &mut [u8]) -> Result<usize> {
        let required = self.marshal_size();
        if buf.len() < required {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: required,
                actual: buf.len(),
            });
        }

        let n = self.channel_type.marshal_to(buf)?;
        let buf = &mut buf[n..];
        buf[0..2].copy_from_slice(&self.priority.to_be_bytes());
        buf[2..6].copy_from_slice(&self.reliability_parameter.to_be_bytes());
        buf[6..8].copy_from_slice(&(self.label.len() as u16).to_be_bytes());
        buf[8..10].copy_from_slice(&(self.protocol.len() as u16).to_be_bytes());
        let mut offset = 10;
        buf[offset..offset + self.label.len()].copy_from_slice(&self.label);
        offset += self.label.len();
        buf[offset..offset + self.protocol.len()].copy_from_slice(&self.protocol);

        Ok(required)
    }
}

impl Unmarshal for DataChannelOpen {
    fn unmarshal<B>(buf: &mut B) -> Result<Self>
    where
        B: Buf,
    {
        let required = OPEN_HEADER_LEN;
        if buf.remaining() < required {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: required,
                actual: buf.remaining(),
            });
        }

        let channel_type = ChannelType::unmarshal(buf)?;
        let priority = buf.get_u16();
        let reliability_parameter = buf.get_u32();
        let label_len = buf.get_u16() as usize;
        let protocol_len = buf.get_u16() as usize;

        if buf.remaining() < label_len + protocol_len {
            return Err(Error::UnexpectedEndOfBuffer {
                expected: label_len + protocol_len,
                actual: buf.remaining(),
            });
        }

        let mut label = vec![0; label_len];
        buf.copy_to_slice(&mut label);
        let mut protocol = vec![0; protocol_len];
        buf.copy_to_slice(&mut protocol);

        Ok(DataChannelOpen {
            channel_type,
            priority,
            reliability_parameter,
            label,
            protocol,
        })
    }
}
