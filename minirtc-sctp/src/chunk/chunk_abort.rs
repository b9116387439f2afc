use bytes::{BufMut, BytesMut};

/// ChunkAbort closes an association immediately (RFC 4960 section
/// 3.3.7). Error causes are carried opaquely; they are logged, never
/// interpreted.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ChunkAbort {
    pub causes: Vec<u8>,
}

impl ChunkAbort {
    pub(crate) fn value_length(&self) -> usize {
        self.causes.len()
    }

    pub(crate) fn marshal_value(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.causes);
    }
}
