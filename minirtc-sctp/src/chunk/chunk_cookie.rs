use bytes::{BufMut, BytesMut};

/// ChunkCookieEcho echoes the opaque state cookie from INIT-ACK
/// (RFC 4960 section 3.3.11).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ChunkCookieEcho {
    pub cookie: Vec<u8>,
}

impl ChunkCookieEcho {
    pub(crate) fn value_length(&self) -> usize {
        self.cookie.len()
    }

    pub(crate) fn marshal_value(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.cookie);
    }
}

/// ChunkCookieAck completes association setup (RFC 4960 section 3.3.12).
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkCookieAck {}
