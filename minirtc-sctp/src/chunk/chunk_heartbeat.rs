use bytes::{BufMut, BytesMut};

/// Variable parameter type for HEARTBEAT-INFO.
const PARAM_HEARTBEAT_INFO: u16 = 1;

/// ChunkHeartbeat probes a path (RFC 4960 section 3.3.5). The opaque
/// info (here: a HEARTBEAT-INFO parameter wrapping the sender's clock)
/// is echoed back verbatim in the ACK.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeartbeat {
    pub info: Vec<u8>,
}

impl ChunkHeartbeat {
    /// with_timestamp wraps `millis` in a HEARTBEAT-INFO parameter.
    pub fn with_timestamp(millis: u64) -> Self {
        let mut info = Vec::with_capacity(12);
        info.extend_from_slice(&PARAM_HEARTBEAT_INFO.to_be_bytes());
        info.extend_from_slice(&12u16.to_be_bytes());
        info.extend_from_slice(&millis.to_be_bytes());
        ChunkHeartbeat { info }
    }

    pub(crate) fn value_length(&self) -> usize {
        self.info.len()
    }

    pub(crate) fn marshal_value(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.info);
    }
}

/// ChunkHeartbeatAck echoes the heartbeat info (RFC 4960 section 3.3.6).
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeartbeatAck {
    pub info: Vec<u8>,
}

impl ChunkHeartbeatAck {
    pub(crate) fn value_length(&self) -> usize {
        self.info.len()
    }

    pub(crate) fn marshal_value(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.info);
    }
}
