#[cfg(test)]
mod integrity_test;

use md5::{Digest, Md5};
use ring::hmac;
use std::fmt;
use subtle::ConstantTimeEq;

use crate::attributes::*;
use crate::message::*;
use shared::error::{Error, Result};

/// MESSAGE_INTEGRITY_SIZE is the length of a HMAC-SHA1 digest.
pub const MESSAGE_INTEGRITY_SIZE: usize = 20;

/// MessageIntegrity represents MESSAGE-INTEGRITY attribute.
///
/// The value is the HMAC-SHA1 key. `add_to` and `check` patch the
/// message length field to cover the attribute itself before hashing,
/// per RFC 5389 section 15.4.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct MessageIntegrity(pub Vec<u8>);

impl fmt::Debug for MessageIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KEY: 0x{:x?}", self.0)
    }
}

fn hmac_sha1(key: &[u8], message: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
    hmac::sign(&key, message).as_ref().to_vec()
}

impl MessageIntegrity {
    /// new_long_term_integrity returns a new MessageIntegrity with a
    /// long-term credential key, MD5(username ":" realm ":" password).
    pub fn new_long_term_integrity(username: &str, realm: &str, password: &str) -> Self {
        let s = format!("{username}:{realm}:{password}");
        let mut h = Md5::new();
        h.update(s.as_bytes());
        MessageIntegrity(h.finalize().to_vec())
    }

    /// new_short_term_integrity returns a new MessageIntegrity with a
    /// short-term credential key (the raw password bytes).
    pub fn new_short_term_integrity(password: String) -> Self {
        MessageIntegrity(password.into_bytes())
    }

    /// check verifies the MESSAGE-INTEGRITY attribute of `m` against
    /// this key, in constant time.
    pub fn check(&self, m: &Message) -> Result<()> {
        let attr = m
            .attributes
            .get(ATTR_MESSAGE_INTEGRITY)
            .ok_or(Error::ErrAttributeNotFound)?;
        if attr.value.len() != MESSAGE_INTEGRITY_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }

        // Hash the message up to the attribute, with the length field
        // set as if the integrity attribute were the last one.
        let mut b = m.raw[..attr.pos].to_vec();
        let patched_len =
            (attr.pos + ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE - MESSAGE_HEADER_SIZE)
                as u16;
        b[2..4].copy_from_slice(&patched_len.to_be_bytes());

        let expected = hmac_sha1(&self.0, &b);
        if expected.ct_eq(&attr.value).into() {
            Ok(())
        } else {
            Err(Error::ErrIntegrityMismatch)
        }
    }
}

impl Setter for MessageIntegrity {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let prev = m.raw.len();

        // Patch the length so the digest covers this attribute too.
        m.length += (ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE) as u32;
        m.write_length();
        let tag = hmac_sha1(&self.0, &m.raw[..prev]);
        m.length -= (ATTRIBUTE_HEADER_SIZE + MESSAGE_INTEGRITY_SIZE) as u32;

        m.add(ATTR_MESSAGE_INTEGRITY, &tag);
        Ok(())
    }
}
