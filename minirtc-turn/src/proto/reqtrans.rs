use std::fmt;

use crate::proto::Protocol;
use shared::error::{Error, Result};
use stun::attributes::*;
use stun::message::*;

const REQUESTED_TRANSPORT_SIZE: usize = 4;

/// RequestedTransport represents REQUESTED-TRANSPORT attribute.
///
/// This attribute is used by the client to request a specific transport
/// protocol for the allocated transport address.
///
/// RFC 5766 Section 14.7
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct RequestedTransport {
    pub protocol: Protocol,
}

impl fmt::Display for RequestedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol: {}", self.protocol)
    }
}

impl Setter for RequestedTransport {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        // Protocol number followed by three RFFU bytes.
        let v = [self.protocol.0, 0, 0, 0];
        m.add(ATTR_REQUESTED_TRANSPORT, &v);
        Ok(())
    }
}

impl Getter for RequestedTransport {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_REQUESTED_TRANSPORT)?;
        if v.len() != REQUESTED_TRANSPORT_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        self.protocol = Protocol(v[0]);
        Ok(())
    }
}
