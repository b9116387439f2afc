use shared::error::{Error, Result};
use stun::attributes::*;
use stun::message::*;

/// TIE_BREAKER_SIZE is the length of the role tie-breaker value.
pub const TIE_BREAKER_SIZE: usize = 8;

/// AttrControlling represents ICE-CONTROLLING: the agent believes it
/// holds the controlling role; the value is its tie-breaker, compared
/// as a big-endian unsigned 64-bit integer on role conflict.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct AttrControlling(pub u64);

impl Setter for AttrControlling {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_ICE_CONTROLLING, &self.0.to_be_bytes());
        Ok(())
    }
}

impl Getter for AttrControlling {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ICE_CONTROLLING)?;
        if v.len() != TIE_BREAKER_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        self.0 = u64::from_be_bytes([v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7]]);
        Ok(())
    }
}

/// AttrControlled represents ICE-CONTROLLED.
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct AttrControlled(pub u64);

impl Setter for AttrControlled {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_ICE_CONTROLLED, &self.0.to_be_bytes());
        Ok(())
    }
}

impl Getter for AttrControlled {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_ICE_CONTROLLED)?;
        if v.len() != TIE_BREAKER_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        self.0 = u64::from_be_bytes([v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7]]);
        Ok(())
    }
}
