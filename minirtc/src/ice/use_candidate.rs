use shared::error::Result;
use stun::attributes::*;
use stun::message::*;

/// UseCandidateAttr represents USE-CANDIDATE, the flagless attribute
/// the controlling agent sets to nominate a pair (RFC 5245 section
/// 7.1.1.1).
#[derive(Default, PartialEq, Eq, Debug, Copy, Clone)]
pub struct UseCandidateAttr;

impl UseCandidateAttr {
    pub fn new() -> Self {
        UseCandidateAttr
    }

    /// is_set reports whether the message carries USE-CANDIDATE.
    pub fn is_set(m: &Message) -> bool {
        m.contains(ATTR_USE_CANDIDATE)
    }
}

impl Setter for UseCandidateAttr {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_USE_CANDIDATE, &[]);
        Ok(())
    }
}
