use std::fmt;
use std::time::Duration;

use shared::error::{Error, Result};
use stun::attributes::*;
use stun::message::*;

const LIFETIME_SIZE: usize = 4;

/// Lifetime represents LIFETIME attribute: the duration for which the
/// server will maintain an allocation, in seconds.
///
/// RFC 5766 Section 14.2
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct Lifetime(pub Duration);

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0.as_secs())
    }
}

impl Setter for Lifetime {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let v = (self.0.as_secs() as u32).to_be_bytes();
        m.add(ATTR_LIFETIME, &v);
        Ok(())
    }
}

impl Getter for Lifetime {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_LIFETIME)?;
        if v.len() != LIFETIME_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        let seconds = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        self.0 = Duration::from_secs(seconds as u64);
        Ok(())
    }
}
