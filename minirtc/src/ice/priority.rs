use shared::error::{Error, Result};
use stun::attributes::*;
use stun::message::*;

const PRIORITY_SIZE: usize = 4;

/// PriorityAttr represents PRIORITY, the candidate priority a
/// connectivity check is made for (RFC 5245 section 19.1).
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct PriorityAttr(pub u32);

impl Setter for PriorityAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_PRIORITY, &self.0.to_be_bytes());
        Ok(())
    }
}

impl Getter for PriorityAttr {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_PRIORITY)?;
        if v.len() != PRIORITY_SIZE {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        self.0 = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
        Ok(())
    }
}
