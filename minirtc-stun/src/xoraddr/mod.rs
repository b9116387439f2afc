#[cfg(test)]
mod xoraddr_test;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use crate::addr::*;
use crate::attributes::*;
use crate::message::*;
use shared::error::{Error, Result};

fn safe_xor_bytes(dst: &mut [u8], a: &[u8], b: &[u8]) -> usize {
    let mut n = a.len();
    if b.len() < n {
        n = b.len();
    }
    if dst.len() < n {
        n = dst.len();
    }
    for i in 0..n {
        dst[i] = a[i] ^ b[i];
    }
    n
}

/// XorMappedAddress implements XOR-MAPPED-ADDRESS attribute.
///
/// RFC 5389 Section 15.2
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct XorMappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for XorMappedAddress {
    fn default() -> Self {
        XorMappedAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl fmt::Display for XorMappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

impl XorMappedAddress {
    /// add_to_as encodes this address, xored per RFC 5389 section 15.2,
    /// as an attribute of type `t`.
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<()> {
        let (family, ip_len, ip) = match self.ip {
            IpAddr::V4(ip) => (FAMILY_IPV4, IPV4LEN, ip.octets().to_vec()),
            IpAddr::V6(ip) => (FAMILY_IPV6, IPV6LEN, ip.octets().to_vec()),
        };

        let mut xor_value = vec![0; 4 + TRANSACTION_ID_SIZE];
        xor_value[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        xor_value[4..].copy_from_slice(&m.transaction_id.0);

        let mut value = vec![0; 4 + ip_len];
        value[0..2].copy_from_slice(&family.to_be_bytes());
        let xor_port = self.port ^ (MAGIC_COOKIE >> 16) as u16;
        value[2..4].copy_from_slice(&xor_port.to_be_bytes());
        let mut xored = vec![0; ip_len];
        safe_xor_bytes(&mut xored, &ip, &xor_value);
        value[4..].copy_from_slice(&xored);

        m.add(t, &value);
        Ok(())
    }

    /// get_from_as decodes an xored address attribute of type `t`.
    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() <= 4 {
            return Err(Error::ErrUnexpectedEof);
        }

        let family = u16::from_be_bytes([v[0], v[1]]);
        if family != FAMILY_IPV6 && family != FAMILY_IPV4 {
            return Err(Error::ErrUnsupportedAddressFamily);
        }
        self.port = u16::from_be_bytes([v[2], v[3]]) ^ (MAGIC_COOKIE >> 16) as u16;

        let mut xor_value = vec![0; 4 + TRANSACTION_ID_SIZE];
        xor_value[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        xor_value[4..].copy_from_slice(&m.transaction_id.0);

        if family == FAMILY_IPV6 {
            if v.len() < 4 + IPV6LEN {
                return Err(Error::ErrUnexpectedEof);
            }
            let mut ip = [0; IPV6LEN];
            safe_xor_bytes(&mut ip, &v[4..], &xor_value);
            self.ip = IpAddr::from(ip);
        } else {
            if v.len() < 4 + IPV4LEN {
                return Err(Error::ErrUnexpectedEof);
            }
            let mut ip = [0; IPV4LEN];
            safe_xor_bytes(&mut ip, &v[4..], &xor_value);
            self.ip = IpAddr::from(ip);
        }

        Ok(())
    }
}

impl Setter for XorMappedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.add_to_as(m, ATTR_XOR_MAPPED_ADDRESS)
    }
}

impl Getter for XorMappedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.get_from_as(m, ATTR_XOR_MAPPED_ADDRESS)
    }
}
