use std::fmt;

use crate::attributes::*;
use crate::message::*;
use shared::error::{Error, Result};

/// ErrorCodeAttribute represents ERROR-CODE attribute.
///
/// RFC 5389 Section 15.6
#[derive(Default, PartialEq, Eq, Debug, Clone)]
pub struct ErrorCodeAttribute {
    pub code: ErrorCode,
    pub reason: Vec<u8>,
}

impl fmt::Display for ErrorCodeAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = String::from_utf8_lossy(&self.reason);
        write!(f, "{}: {}", self.code.0, reason)
    }
}

const ERROR_CODE_CLASS_BYTE: usize = 2;
const ERROR_CODE_NUMBER_BYTE: usize = 3;
const ERROR_CODE_REASON_START: usize = 4;
const ERROR_CODE_MODULO: u16 = 100;

impl Setter for ErrorCodeAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut value: Vec<u8> = Vec::with_capacity(ERROR_CODE_REASON_START + self.reason.len());
        value.extend_from_slice(&[0, 0]);
        value.push((self.code.0 / ERROR_CODE_MODULO) as u8);
        value.push((self.code.0 % ERROR_CODE_MODULO) as u8);
        value.extend_from_slice(&self.reason);
        m.add(ATTR_ERROR_CODE, &value);
        Ok(())
    }
}

impl Getter for ErrorCodeAttribute {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ERROR_CODE)?;
        if v.len() < ERROR_CODE_REASON_START {
            return Err(Error::ErrUnexpectedEof);
        }

        let class = v[ERROR_CODE_CLASS_BYTE] as u16;
        let number = v[ERROR_CODE_NUMBER_BYTE] as u16;
        self.code = ErrorCode(class * ERROR_CODE_MODULO + number);
        self.reason = v[ERROR_CODE_REASON_START..].to_vec();
        Ok(())
    }
}

/// ErrorCode is a code for the ERROR-CODE attribute.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    /// default_reason returns the canonical reason phrase for the code,
    /// if one is defined.
    pub fn default_reason(&self) -> Option<&'static str> {
        match self.0 {
            300 => Some("Try Alternate"),
            400 => Some("Bad Request"),
            401 => Some("Unauthorized"),
            420 => Some("Unknown Attribute"),
            437 => Some("Allocation Mismatch"),
            438 => Some("Stale Nonce"),
            441 => Some("Wrong Credentials"),
            442 => Some("Unsupported Transport Protocol"),
            486 => Some("Allocation Quota Reached"),
            487 => Some("Role Conflict"),
            500 => Some("Server Error"),
            508 => Some("Insufficient Capacity"),
            _ => None,
        }
    }
}

impl Setter for ErrorCode {
    /// add_to adds an ERROR-CODE with the canonical reason phrase.
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let reason = self
            .default_reason()
            .ok_or(Error::ErrAttributeNotFound)?;
        let attr = ErrorCodeAttribute {
            code: *self,
            reason: reason.as_bytes().to_vec(),
        };
        attr.add_to(m)
    }
}

pub const CODE_TRY_ALTERNATE: ErrorCode = ErrorCode(300);
pub const CODE_BAD_REQUEST: ErrorCode = ErrorCode(400);
pub const CODE_UNAUTHORIZED: ErrorCode = ErrorCode(401);
pub const CODE_UNKNOWN_ATTRIBUTE: ErrorCode = ErrorCode(420);
pub const CODE_ALLOC_MISMATCH: ErrorCode = ErrorCode(437);
pub const CODE_STALE_NONCE: ErrorCode = ErrorCode(438);
pub const CODE_WRONG_CREDENTIALS: ErrorCode = ErrorCode(441);
pub const CODE_UNSUPPORTED_TRANS_PROTO: ErrorCode = ErrorCode(442);
pub const CODE_ALLOC_QUOTA_REACHED: ErrorCode = ErrorCode(486);
pub const CODE_ROLE_CONFLICT: ErrorCode = ErrorCode(487);
pub const CODE_SERVER_ERROR: ErrorCode = ErrorCode(500);
pub const CODE_INSUFFICIENT_CAPACITY: ErrorCode = ErrorCode(508);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() -> Result<()> {
        let mut m = Message::new();
        m.write_header();
        CODE_ROLE_CONFLICT.add_to(&mut m)?;

        let mut decoded = Message::new();
        decoded.raw = m.raw.clone();
        decoded.decode()?;

        let mut got = ErrorCodeAttribute::default();
        got.get_from(&decoded)?;
        assert_eq!(got.code, CODE_ROLE_CONFLICT);
        assert_eq!(got.reason, b"Role Conflict".to_vec());
        Ok(())
    }
}
