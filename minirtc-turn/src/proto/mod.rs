pub mod chandata;
pub mod channum;
pub mod data;
pub mod lifetime;
pub mod peeraddr;
pub mod relayaddr;
pub mod reqtrans;

use std::fmt;

/// Protocol is the IANA protocol number carried by REQUESTED-TRANSPORT.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub struct Protocol(pub u8);

/// PROTO_TCP is the IANA assigned protocol number for TCP.
pub const PROTO_TCP: Protocol = Protocol(6);
/// PROTO_UDP is the IANA assigned protocol number for UDP.
pub const PROTO_UDP: Protocol = Protocol(17);

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            PROTO_UDP => "UDP",
            PROTO_TCP => "TCP",
            _ => return write!(f, "{}", self.0),
        };
        write!(f, "{s}")
    }
}
