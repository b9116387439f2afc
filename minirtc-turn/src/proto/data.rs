use shared::error::Result;
use stun::attributes::*;
use stun::message::*;

/// Data represents DATA attribute.
///
/// The DATA attribute is present in all Send and Data indications. The
/// value is the application data that would immediately follow the UDP
/// header if the data had been sent directly between client and peer.
///
/// RFC 5766 Section 14.4
#[derive(Default, Debug, PartialEq, Eq)]
pub struct Data(pub Vec<u8>);

impl Setter for Data {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_DATA, &self.0);
        Ok(())
    }
}

impl Getter for Data {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.0 = m.get(ATTR_DATA)?;
        Ok(())
    }
}
