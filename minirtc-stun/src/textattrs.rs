use std::fmt;

use crate::attributes::*;
use crate::message::*;
use shared::error::Result;

const MAX_USERNAME_B: usize = 513;
const MAX_REALM_B: usize = 763;
const MAX_SOFTWARE_B: usize = 763;
const MAX_NONCE_B: usize = 763;

/// Username represents USERNAME attribute.
pub type Username = TextAttribute;
/// Realm represents REALM attribute.
pub type Realm = TextAttribute;
/// Nonce represents NONCE attribute.
pub type Nonce = TextAttribute;
/// Software represents SOFTWARE attribute.
pub type Software = TextAttribute;

/// TextAttribute is a helper for adding and reading text attributes.
#[derive(Default, Clone, PartialEq, Eq, Debug)]
pub struct TextAttribute {
    pub attr: AttrType,
    pub text: String,
}

impl fmt::Display for TextAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}

impl TextAttribute {
    pub fn new(attr: AttrType, text: String) -> Self {
        TextAttribute { attr, text }
    }

    /// get_from_as reads an attribute of type `t` as a UTF-8 string.
    pub fn get_from_as(m: &Message, t: AttrType) -> Result<TextAttribute> {
        let v = m.get(t)?;
        let text = String::from_utf8(v)?;
        Ok(TextAttribute { attr: t, text })
    }
}

impl Setter for TextAttribute {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(self.attr, self.text.as_bytes());
        Ok(())
    }
}

impl Getter for TextAttribute {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let attr = self.attr;
        *self = TextAttribute::get_from_as(m, attr)?;
        Ok(())
    }
}
