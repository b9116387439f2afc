use std::fmt;

use crate::message::Message;

/// Attributes is a list of attributes in parse order.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Attributes(pub Vec<RawAttribute>);

impl Attributes {
    /// get returns the first attribute of the given type, if any.
    pub fn get(&self, t: AttrType) -> Option<&RawAttribute> {
        self.0.iter().find(|a| a.typ == t)
    }
}

/// AttrType is an attribute type.
#[derive(PartialEq, Eq, Default, Copy, Clone, Debug)]
pub struct AttrType(pub u16);

impl AttrType {
    /// value returns the uint16 representation of the attribute type.
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Attributes with type values in the comprehension-optional range
    /// (0x8000-0xFFFF) can be safely ignored when not understood.
    pub fn optional(&self) -> bool {
        self.0 >= 0x8000
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            ATTR_MAPPED_ADDRESS => "MAPPED-ADDRESS",
            ATTR_CHANGE_REQUEST => "CHANGE-REQUEST",
            ATTR_USERNAME => "USERNAME",
            ATTR_MESSAGE_INTEGRITY => "MESSAGE-INTEGRITY",
            ATTR_ERROR_CODE => "ERROR-CODE",
            ATTR_UNKNOWN_ATTRIBUTES => "UNKNOWN-ATTRIBUTES",
            ATTR_CHANNEL_NUMBER => "CHANNEL-NUMBER",
            ATTR_LIFETIME => "LIFETIME",
            ATTR_XOR_PEER_ADDRESS => "XOR-PEER-ADDRESS",
            ATTR_DATA => "DATA",
            ATTR_REALM => "REALM",
            ATTR_NONCE => "NONCE",
            ATTR_XOR_RELAYED_ADDRESS => "XOR-RELAYED-ADDRESS",
            ATTR_REQUESTED_TRANSPORT => "REQUESTED-TRANSPORT",
            ATTR_XOR_MAPPED_ADDRESS => "XOR-MAPPED-ADDRESS",
            ATTR_PRIORITY => "PRIORITY",
            ATTR_USE_CANDIDATE => "USE-CANDIDATE",
            ATTR_SOFTWARE => "SOFTWARE",
            ATTR_ALTERNATE_SERVER => "ALTERNATE-SERVER",
            ATTR_FINGERPRINT => "FINGERPRINT",
            ATTR_ICE_CONTROLLED => "ICE-CONTROLLED",
            ATTR_ICE_CONTROLLING => "ICE-CONTROLLING",
            ATTR_RESPONSE_ORIGIN => "RESPONSE-ORIGIN",
            ATTR_OTHER_ADDRESS => "OTHER-ADDRESS",
            _ => return write!(f, "0x{:x}", self.0),
        };
        write!(f, "{s}")
    }
}

// Attributes from RFC 5389, RFC 5766 (TURN), RFC 5245 (ICE) and
// RFC 5780 (NAT behavior discovery).
pub const ATTR_MAPPED_ADDRESS: AttrType = AttrType(0x0001);
pub const ATTR_CHANGE_REQUEST: AttrType = AttrType(0x0003);
pub const ATTR_USERNAME: AttrType = AttrType(0x0006);
pub const ATTR_MESSAGE_INTEGRITY: AttrType = AttrType(0x0008);
pub const ATTR_ERROR_CODE: AttrType = AttrType(0x0009);
pub const ATTR_UNKNOWN_ATTRIBUTES: AttrType = AttrType(0x000A);
pub const ATTR_CHANNEL_NUMBER: AttrType = AttrType(0x000C);
pub const ATTR_LIFETIME: AttrType = AttrType(0x000D);
pub const ATTR_XOR_PEER_ADDRESS: AttrType = AttrType(0x0012);
pub const ATTR_DATA: AttrType = AttrType(0x0013);
pub const ATTR_REALM: AttrType = AttrType(0x0014);
pub const ATTR_NONCE: AttrType = AttrType(0x0015);
pub const ATTR_XOR_RELAYED_ADDRESS: AttrType = AttrType(0x0016);
pub const ATTR_REQUESTED_TRANSPORT: AttrType = AttrType(0x0019);
pub const ATTR_XOR_MAPPED_ADDRESS: AttrType = AttrType(0x0020);
pub const ATTR_PRIORITY: AttrType = AttrType(0x0024);
pub const ATTR_USE_CANDIDATE: AttrType = AttrType(0x0025);
pub const ATTR_RESPONSE_PORT: AttrType = AttrType(0x0027);
pub const ATTR_SOFTWARE: AttrType = AttrType(0x8022);
pub const ATTR_ALTERNATE_SERVER: AttrType = AttrType(0x8023);
pub const ATTR_FINGERPRINT: AttrType = AttrType(0x8028);
pub const ATTR_ICE_CONTROLLED: AttrType = AttrType(0x8029);
pub const ATTR_ICE_CONTROLLING: AttrType = AttrType(0x802A);
pub const ATTR_RESPONSE_ORIGIN: AttrType = AttrType(0x802b);
pub const ATTR_OTHER_ADDRESS: AttrType = AttrType(0x802C);

/// RawAttribute is a type-length-value attribute as it sits in the
/// message buffer. `pos` is the byte offset of the attribute header
/// within [`Message::raw`], used by integrity and fingerprint checks
/// to hash the message up to (but excluding) themselves.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub typ: AttrType,
    pub length: u16,
    pub value: Vec<u8>,
    pub pos: usize,
}

impl fmt::Display for RawAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.typ, self.value)
    }
}

impl crate::message::Setter for RawAttribute {
    fn add_to(&self, m: &mut Message) -> shared::error::Result<()> {
        m.add(self.typ, &self.value);
        Ok(())
    }
}
