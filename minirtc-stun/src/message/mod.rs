#[cfg(test)]
mod message_test;

use rand::Rng;
use std::fmt;

use crate::attributes::*;
use shared::error::{Error, Result};

/// MAGIC_COOKIE is fixed value that aids in distinguishing STUN packets
/// from packets of other protocols when STUN is multiplexed with those
/// other protocols on the same port.
///
/// Defined in "STUN Message Structure", section 6.
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

pub const MESSAGE_HEADER_SIZE: usize = 20;
pub const TRANSACTION_ID_SIZE: usize = 12;
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;

const DEFAULT_RAW_CAPACITY: usize = 120;

/// Setter sets an attribute on a [`Message`].
pub trait Setter {
    fn add_to(&self, m: &mut Message) -> Result<()>;
}

/// Getter parses an attribute from a [`Message`].
pub trait Getter {
    fn get_from(&mut self, m: &Message) -> Result<()>;
}

/// is_message returns true if the buffer looks like a STUN message:
/// at least a header, the magic cookie in place, and a length field
/// consistent with the buffer size.
pub fn is_message(b: &[u8]) -> bool {
    b.len() >= MESSAGE_HEADER_SIZE
        && u32::from_be_bytes([b[4], b[5], b[6], b[7]]) == MAGIC_COOKIE
        && u16::from_be_bytes([b[2], b[3]]) as usize + MESSAGE_HEADER_SIZE == b.len()
}

/// Pads to the next multiple of 4, per RFC 5389 section 15.
pub fn nearest_padded_value_length(l: usize) -> usize {
    let mut n = 4 * (l / 4);
    if n < l {
        n += 4;
    }
    n
}

/// TransactionId is a 96-bit identifier, used to uniquely identify
/// STUN transactions.
#[derive(Default, PartialEq, Eq, Hash, Copy, Clone, Debug, PartialOrd, Ord)]
pub struct TransactionId(pub [u8; TRANSACTION_ID_SIZE]);

impl TransactionId {
    /// new returns new random transaction ID.
    pub fn new() -> Self {
        let mut b = TransactionId([0u8; TRANSACTION_ID_SIZE]);
        rand::rng().fill(&mut b.0[..]);
        b
    }
}

impl Setter for TransactionId {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.transaction_id = *self;
        m.write_transaction_id();
        Ok(())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// MessageClass is an 8-bit representation of the 2-bit STUN class.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub struct MessageClass(pub u8);

/// Request class.
pub const CLASS_REQUEST: MessageClass = MessageClass(0x00);
/// Indication class.
pub const CLASS_INDICATION: MessageClass = MessageClass(0x01);
/// Success response class.
pub const CLASS_SUCCESS_RESPONSE: MessageClass = MessageClass(0x02);
/// Error response class.
pub const CLASS_ERROR_RESPONSE: MessageClass = MessageClass(0x03);

impl fmt::Display for MessageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CLASS_REQUEST => "request",
            CLASS_INDICATION => "indication",
            CLASS_SUCCESS_RESPONSE => "success response",
            CLASS_ERROR_RESPONSE => "error response",
            _ => "unknown message class",
        };
        write!(f, "{s}")
    }
}

/// Method is a 12-bit representation of the STUN method.
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub struct Method(pub u16);

pub const METHOD_BINDING: Method = Method(0x001);
pub const METHOD_ALLOCATE: Method = Method(0x003);
pub const METHOD_REFRESH: Method = Method(0x004);
pub const METHOD_SEND: Method = Method(0x006);
pub const METHOD_DATA: Method = Method(0x007);
pub const METHOD_CREATE_PERMISSION: Method = Method(0x008);
pub const METHOD_CHANNEL_BIND: Method = Method(0x009);

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            METHOD_BINDING => "Binding",
            METHOD_ALLOCATE => "Allocate",
            METHOD_REFRESH => "Refresh",
            METHOD_SEND => "Send",
            METHOD_DATA => "Data",
            METHOD_CREATE_PERMISSION => "CreatePermission",
            METHOD_CHANNEL_BIND => "ChannelBind",
            _ => return write!(f, "0x{:x}", self.0),
        };
        write!(f, "{s}")
    }
}

// Message type bit layout, RFC 5389 section 6:
//
//  0                 1
//  2  3  4 5 6 7 8 9 0 1 2 3 4 5
// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
// |M |M |M|M|M|C|M|M|M|C|M|M|M|M|
// |11|10|9|8|7|1|6|5|4|0|3|2|1|0|
// +--+--+-+-+-+-+-+-+-+-+-+-+-+-+
const METHOD_ABITS: u16 = 0xf; // 0b0000000000001111
const METHOD_BBITS: u16 = 0x70; // 0b0000000001110000
const METHOD_DBITS: u16 = 0xf80; // 0b0000111110000000

const METHOD_BSHIFT: u16 = 1;
const METHOD_DSHIFT: u16 = 2;

const FIRST_BIT: u16 = 0x1;
const SECOND_BIT: u16 = 0x2;

const C0BIT: u16 = FIRST_BIT;
const C1BIT: u16 = SECOND_BIT;

const CLASS_C0SHIFT: u16 = 4;
const CLASS_C1SHIFT: u16 = 7;

/// MessageType is a combination of [`MessageClass`] and [`Method`].
#[derive(Default, PartialEq, Eq, Copy, Clone, Debug)]
pub struct MessageType {
    /// e.g. binding
    pub method: Method,
    /// e.g. request
    pub class: MessageClass,
}

/// Binding request message type.
pub const BINDING_REQUEST: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_REQUEST,
};
/// Binding success response message type.
pub const BINDING_SUCCESS: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_SUCCESS_RESPONSE,
};
/// Binding error response message type.
pub const BINDING_ERROR: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_ERROR_RESPONSE,
};
/// Binding indication message type.
pub const BINDING_INDICATION: MessageType = MessageType {
    method: METHOD_BINDING,
    class: CLASS_INDICATION,
};

impl MessageType {
    pub fn new(method: Method, class: MessageClass) -> Self {
        MessageType { method, class }
    }

    /// value returns the bit-packed representation of the message type.
    pub fn value(&self) -> u16 {
        let method = self.method.0;
        let a = method & METHOD_ABITS;
        let b = (method & METHOD_BBITS) << METHOD_BSHIFT;
        let d = (method & METHOD_DBITS) << METHOD_DSHIFT;

        let c = self.class.0 as u16;
        let c0 = (c & C0BIT) << CLASS_C0SHIFT;
        let c1 = (c & C1BIT) << CLASS_C1SHIFT;

        a + b + d + c0 + c1
    }

    /// read_value decodes the bit-packed message type.
    pub fn read_value(&mut self, value: u16) {
        let c0 = (value >> CLASS_C0SHIFT) & C0BIT;
        let c1 = (value >> CLASS_C1SHIFT) & C1BIT;
        self.class = MessageClass((c0 + c1) as u8);

        let a = value & METHOD_ABITS;
        let b = (value >> METHOD_BSHIFT) & METHOD_BBITS;
        let d = (value >> METHOD_DSHIFT) & METHOD_DBITS;
        self.method = Method(a + b + d);
    }
}

impl Setter for MessageType {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.set_type(*self);
        Ok(())
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.class)
    }
}

/// Message represents a single STUN packet. It uses an aggressive
/// internal buffer (`raw`) that is kept in sync with the parsed fields,
/// so adding an attribute appends directly to the wire image.
#[derive(Default, Clone)]
pub struct Message {
    pub typ: MessageType,
    pub length: u32,
    pub transaction_id: TransactionId,
    pub attributes: Attributes,
    pub raw: Vec<u8>,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} l={} attrs={} id={}",
            self.typ,
            self.length,
            self.attributes.0.len(),
            self.transaction_id
        )
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Message {
    /// new returns an empty message with a zeroed header in place.
    pub fn new() -> Self {
        let mut raw = Vec::with_capacity(DEFAULT_RAW_CAPACITY);
        raw.resize(MESSAGE_HEADER_SIZE, 0);
        Message {
            raw,
            ..Default::default()
        }
    }

    /// reset rewinds the message to an empty state, keeping the buffer.
    pub fn reset(&mut self) {
        self.raw.clear();
        self.raw.resize(MESSAGE_HEADER_SIZE, 0);
        self.length = 0;
        self.attributes = Attributes::default();
        self.typ = MessageType::default();
        self.transaction_id = TransactionId::default();
    }

    /// build resets the message and applies the setters in order.
    pub fn build(&mut self, setters: &[Box<dyn Setter>]) -> Result<()> {
        self.reset();
        self.write_header();
        for s in setters {
            s.add_to(self)?;
        }
        Ok(())
    }

    /// new_transaction_id sets a new random transaction ID.
    pub fn new_transaction_id(&mut self) -> Result<()> {
        TransactionId::new().add_to(self)
    }

    /// set_type sets the message type and patches the header.
    pub fn set_type(&mut self, t: MessageType) {
        self.typ = t;
        self.write_type();
    }

    /// write_header writes the whole header into `raw`.
    pub fn write_header(&mut self) {
        if self.raw.len() < MESSAGE_HEADER_SIZE {
            self.raw.resize(MESSAGE_HEADER_SIZE, 0);
        }
        self.write_type();
        self.write_length();
        self.raw[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        self.write_transaction_id();
    }

    pub fn write_type(&mut self) {
        let value = self.typ.value();
        self.raw[0..2].copy_from_slice(&value.to_be_bytes());
    }

    pub fn write_length(&mut self) {
        let length = self.length as u16;
        self.raw[2..4].copy_from_slice(&length.to_be_bytes());
    }

    pub fn write_transaction_id(&mut self) {
        self.raw[8..MESSAGE_HEADER_SIZE].copy_from_slice(&self.transaction_id.0);
    }

    /// add appends a new attribute to the message, padding the value to
    /// a 4-byte boundary with zeroes per RFC 5389 section 15.
    pub fn add(&mut self, t: AttrType, v: &[u8]) {
        let first = self.raw.len();
        self.raw.extend_from_slice(&t.value().to_be_bytes());
        self.raw
            .extend_from_slice(&(v.len() as u16).to_be_bytes());
        self.raw.extend_from_slice(v);

        let padded = nearest_padded_value_length(v.len());
        self.raw.resize(first + ATTRIBUTE_HEADER_SIZE + padded, 0);

        self.length += (ATTRIBUTE_HEADER_SIZE + padded) as u32;
        self.write_length();

        self.attributes.0.push(RawAttribute {
            typ: t,
            length: v.len() as u16,
            value: v.to_vec(),
            pos: first,
        });
    }

    /// get returns the (unpadded) value of the first attribute of type `t`.
    pub fn get(&self, t: AttrType) -> Result<Vec<u8>> {
        match self.attributes.get(t) {
            Some(a) => Ok(a.value.clone()),
            None => Err(Error::ErrAttributeNotFound),
        }
    }

    pub fn contains(&self, t: AttrType) -> bool {
        self.attributes.get(t).is_some()
    }

    /// decode parses `raw` into the message fields and attribute list.
    pub fn decode(&mut self) -> Result<()> {
        let buf = &self.raw;
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(Error::ErrUnexpectedEof);
        }

        let t = u16::from_be_bytes([buf[0], buf[1]]);
        let size = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let cookie = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if cookie != MAGIC_COOKIE {
            return Err(Error::ErrInvalidMagicCookie);
        }
        if size + MESSAGE_HEADER_SIZE != buf.len() {
            return Err(Error::ErrUnexpectedEof);
        }

        self.typ.read_value(t);
        self.length = size as u32;
        self.transaction_id
            .0
            .copy_from_slice(&buf[8..MESSAGE_HEADER_SIZE]);

        self.attributes = Attributes::default();
        let mut offset = MESSAGE_HEADER_SIZE;
        let end = MESSAGE_HEADER_SIZE + size;
        while offset < end {
            if end - offset < ATTRIBUTE_HEADER_SIZE {
                return Err(Error::ErrAttributeSizeInvalid);
            }
            let typ = AttrType(u16::from_be_bytes([buf[offset], buf[offset + 1]]));
            let length = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            let value_start = offset + ATTRIBUTE_HEADER_SIZE;
            if value_start + length > end {
                return Err(Error::ErrAttributeSizeInvalid);
            }

            self.attributes.0.push(RawAttribute {
                typ,
                length: length as u16,
                value: buf[value_start..value_start + length].to_vec(),
                pos: offset,
            });
            offset = value_start + nearest_padded_value_length(length);
        }

        Ok(())
    }
}

impl Setter for Message {
    /// add_to copies the transaction ID of this message into `m`,
    /// binding a response to its request.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.transaction_id = self.transaction_id;
        m.write_transaction_id();
        Ok(())
    }
}
