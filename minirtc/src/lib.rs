#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod dtls;
pub mod endpoint;
pub mod ice;
pub mod offer;
pub mod session;

pub use dtls::{DtlsEngine, DtlsEvent, DtlsRole};
pub use endpoint::{Endpoint, EndpointConfig, Event};
pub use offer::{Offer, OfferBlock};

/// Capacity of the offer and session tables. The low bit of a
/// transaction-id byte distinguishes offer slots from session slots,
/// so this must stay below 128.
pub const MAX_SLOTS: usize = 10;
const _: () = assert!(MAX_SLOTS < 128);

/// Offers without a bound DTLS session expire after this long.
pub const MAX_OFFER_AGE_SECS: u64 = 60;
