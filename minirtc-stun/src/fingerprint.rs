use crc::{CRC_32_ISO_HDLC, Crc};

use crate::attributes::*;
use crate::message::*;
use shared::error::{Error, Result};

/// FINGERPRINT_XOR_VALUE is the "STUN" magic the CRC-32 is xored with,
/// RFC 5389 section 15.5.
pub const FINGERPRINT_XOR_VALUE: u32 = 0x5354_554e;
pub const FINGERPRINT_SIZE: usize = 4;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// fingerprint_value computes the FINGERPRINT value of the buffer.
pub fn fingerprint_value(b: &[u8]) -> u32 {
    CRC32.checksum(b) ^ FINGERPRINT_XOR_VALUE
}

/// FingerprintAttr represents FINGERPRINT attribute. Use the
/// [`FINGERPRINT`] singleton with [`Message::build`].
#[derive(Default, Debug, Clone, Copy)]
pub struct FingerprintAttr;

/// FINGERPRINT is the shared FingerprintAttr instance.
pub const FINGERPRINT: FingerprintAttr = FingerprintAttr;

impl FingerprintAttr {
    /// check verifies the FINGERPRINT attribute of `m`.
    pub fn check(&self, m: &Message) -> Result<()> {
        let attr = m
            .attributes
            .get(ATTR_FINGERPRINT)
            .ok_or(Error::ErrAttributeNotFound)?;
        if attr.value.len() != FINGERPRINT_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        let got = u32::from_be_bytes([
            attr.value[0],
            attr.value[1],
            attr.value[2],
            attr.value[3],
        ]);

        let mut b = m.raw[..attr.pos].to_vec();
        let patched_len =
            (attr.pos + ATTRIBUTE_HEADER_SIZE + FINGERPRINT_SIZE - MESSAGE_HEADER_SIZE) as u16;
        b[2..4].copy_from_slice(&patched_len.to_be_bytes());

        if fingerprint_value(&b) == got {
            Ok(())
        } else {
            Err(Error::ErrFingerprintMismatch)
        }
    }
}

impl Setter for FingerprintAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let prev = m.raw.len();

        m.length += (ATTRIBUTE_HEADER_SIZE + FINGERPRINT_SIZE) as u32;
        m.write_length();
        let value = fingerprint_value(&m.raw[..prev]);
        m.length -= (ATTRIBUTE_HEADER_SIZE + FINGERPRINT_SIZE) as u32;

        m.add(ATTR_FINGERPRINT, &value.to_be_bytes());
        Ok(())
    }
}
