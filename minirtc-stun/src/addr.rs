use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use crate::attributes::*;
use crate::message::*;
use shared::error::{Error, Result};

pub const FAMILY_IPV4: u16 = 0x01;
pub const FAMILY_IPV6: u16 = 0x02;
pub const IPV4LEN: usize = 4;
pub const IPV6LEN: usize = 16;

/// MappedAddress represents MAPPED-ADDRESS attribute.
///
/// This attribute is used only by servers for achieving backwards
/// compatibility with RFC 3489 clients.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct MappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for MappedAddress {
    fn default() -> Self {
        MappedAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl fmt::Display for MappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

impl Getter for MappedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.get_from_as(m, ATTR_MAPPED_ADDRESS)
    }
}

impl Setter for MappedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.add_to_as(m, ATTR_MAPPED_ADDRESS)
    }
}

impl MappedAddress {
    /// get_from_as decodes an address attribute of type `t` from the message.
    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() <= 4 {
            return Err(Error::ErrUnexpectedEof);
        }

        let family = u16::from_be_bytes([v[0], v[1]]);
        if family != FAMILY_IPV6 && family != FAMILY_IPV4 {
            return Err(Error::ErrUnsupportedAddressFamily);
        }
        self.port = u16::from_be_bytes([v[2], v[3]]);

        if family == FAMILY_IPV6 {
            if v.len() < 4 + IPV6LEN {
                return Err(Error::ErrUnexpectedEof);
            }
            let mut ip = [0; IPV6LEN];
            ip.copy_from_slice(&v[4..4 + IPV6LEN]);
            self.ip = IpAddr::from(ip);
        } else {
            if v.len() < 4 + IPV4LEN {
                return Err(Error::ErrUnexpectedEof);
            }
            let mut ip = [0; IPV4LEN];
            ip.copy_from_slice(&v[4..4 + IPV4LEN]);
            self.ip = IpAddr::from(ip);
        }

        Ok(())
    }

    /// add_to_as encodes this address as an attribute of type `t`.
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<()> {
        let (family, ip_bytes) = match self.ip {
            IpAddr::V4(ip) => (FAMILY_IPV4, ip.octets().to_vec()),
            IpAddr::V6(ip) => (FAMILY_IPV6, ip.octets().to_vec()),
        };

        let mut value = Vec::with_capacity(4 + ip_bytes.len());
        value.extend_from_slice(&family.to_be_bytes());
        value.extend_from_slice(&self.port.to_be_bytes());
        value.extend_from_slice(&ip_bytes);
        m.add(t, &value);
        Ok(())
    }
}

/// ResponseOrigin represents RESPONSE-ORIGIN attribute (RFC 5780).
#[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
pub struct ResponseOrigin(pub MappedAddress);

impl Getter for ResponseOrigin {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.0.get_from_as(m, ATTR_RESPONSE_ORIGIN)
    }
}

impl Setter for ResponseOrigin {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.0.add_to_as(m, ATTR_RESPONSE_ORIGIN)
    }
}

/// OtherAddress represents OTHER-ADDRESS attribute (RFC 5780): the
/// alternate address and port a NAT-behavior-discovery server can
/// answer from.
#[derive(Default, PartialEq, Eq, Debug, Clone, Copy)]
pub struct OtherAddress(pub MappedAddress);

impl Getter for OtherAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.0.get_from_as(m, ATTR_OTHER_ADDRESS)
    }
}

impl Setter for OtherAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.0.add_to_as(m, ATTR_OTHER_ADDRESS)
    }
}
