use bytes::{BufMut, BytesMut};

/// ChunkError reports non-fatal protocol errors (RFC 4960 section
/// 3.3.10). Causes are opaque to this transport.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ChunkError {
    pub causes: Vec<u8>,
}

impl ChunkError {
    pub(crate) fn value_length(&self) -> usize {
        self.causes.len()
    }

    pub(crate) fn marshal_value(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.causes);
    }
}
