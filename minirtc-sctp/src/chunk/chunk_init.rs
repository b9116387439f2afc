use bytes::{BufMut, BytesMut};

use super::{pad4, read_u16, read_u32};
use shared::error::{Error, Result};

const INIT_CHUNK_MIN_SIZE: usize = 16;

/// Variable parameter type for STATE-COOKIE (RFC 4960 section 3.3.3.1).
const PARAM_STATE_COOKIE: u16 = 7;

/// ChunkInit carries both INIT and INIT-ACK (RFC 4960 sections 3.3.2
/// and 3.3.3); an INIT-ACK additionally carries the state cookie.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct ChunkInit {
    pub initiate_tag: u32,
    pub advertised_receiver_window_credit: u32,
    pub num_outbound_streams: u16,
    pub num_inbound_streams: u16,
    pub initial_tsn: u32,
    /// Set for INIT-ACK; echoed verbatim in COOKIE-ECHO.
    pub state_cookie: Option<Vec<u8>>,
}

impl ChunkInit {
    pub(crate) fn value_length(&self) -> usize {
        let mut l = INIT_CHUNK_MIN_SIZE;
        if let Some(cookie) = &self.state_cookie {
            l += pad4(4 + cookie.len());
        }
        l
    }

    pub(crate) fn marshal_value(&self, buf: &mut BytesMut) {
        buf.put_u32(self.initiate_tag);
        buf.put_u32(self.advertised_receiver_window_credit);
        buf.put_u16(self.num_outbound_streams);
        buf.put_u16(self.num_inbound_streams);
        buf.put_u32(self.initial_tsn);
        if let Some(cookie) = &self.state_cookie {
            buf.put_u16(PARAM_STATE_COOKIE);
            buf.put_u16((4 + cookie.len()) as u16);
            buf.put_slice(cookie);
            let padding = pad4(4 + cookie.len()) - (4 + cookie.len());
            for _ in 0..padding {
                buf.put_u8(0);
            }
        }
    }

    pub(crate) fn unmarshal_value(mut value: &[u8]) -> Result<Self> {
        if value.len() < INIT_CHUNK_MIN_SIZE {
            return Err(Error::ErrChunkTruncated);
        }
        let initiate_tag = read_u32(&mut value)?;
        let advertised_receiver_window_credit = read_u32(&mut value)?;
        let num_outbound_streams = read_u16(&mut value)?;
        let num_inbound_streams = read_u16(&mut value)?;
        let initial_tsn = read_u32(&mut value)?;

        // Scan optional parameters for the state cookie; unknown
        // parameters are skipped by length.
        let mut state_cookie = None;
        let mut rest = value;
        while rest.len() >= 4 {
            let typ = u16::from_be_bytes([rest[0], rest[1]]);
            let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            if len < 4 || len > rest.len() {
                return Err(Error::ErrChunkTruncated);
            }
            if typ == PARAM_STATE_COOKIE {
                state_cookie = Some(rest[4..len].to_vec());
            }
            let consumed = pad4(len).min(rest.len());
            rest = &rest[consumed..];
        }

        Ok(ChunkInit {
            initiate_tag,
            advertised_receiver_window_credit,
            num_outbound_streams,
            num_inbound_streams,
            initial_tsn,
            state_cookie,
        })
    }
}
