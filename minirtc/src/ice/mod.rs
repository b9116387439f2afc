#[cfg(test)]
mod ice_test;

pub mod control;
pub mod nat;
pub mod priority;
pub mod use_candidate;

use ring::digest;
use std::net::SocketAddr;

use control::{AttrControlled, AttrControlling};
use priority::PriorityAttr;
use shared::error::Result;
use stun::attributes::ATTR_USERNAME;
use stun::error_code::CODE_ROLE_CONFLICT;
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::Username;
use stun::xoraddr::XorMappedAddress;
use use_candidate::UseCandidateAttr;

/// compute_integrity_key derives the ICE short-term password for a
/// local username: the first 16 bytes of SHA-256(username ‖ secret),
/// hex-encoded to 32 ASCII characters. The endpoint never stores
/// per-offer passwords; any inbound USERNAME can be re-keyed from the
/// endpoint secret alone.
pub fn compute_integrity_key(username: &[u8], secret: &[u8; 32]) -> String {
    let mut buf = Vec::with_capacity(username.len() + secret.len());
    buf.extend_from_slice(username);
    buf.extend_from_slice(secret);
    let hash = digest::digest(&digest::SHA256, &buf);
    hash.as_ref()[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Tie-breaker role of the local agent for one check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Controlling(u64),
    Controlled(u64),
}

/// verify_request checks MESSAGE-INTEGRITY under `key` and, when
/// present, FINGERPRINT.
pub fn verify_request(m: &Message, key: &str) -> Result<()> {
    MessageIntegrity::new_short_term_integrity(key.to_owned()).check(m)?;
    if m.contains(stun::attributes::ATTR_FINGERPRINT) {
        FINGERPRINT.check(m)?;
    }
    Ok(())
}

/// binding_request builds an authenticated connectivity check.
pub fn binding_request(
    transaction_id: TransactionId,
    username: String,
    remote_pwd: &str,
    role: Role,
    priority: u32,
    use_candidate: bool,
) -> Result<Message> {
    let mut setters: Vec<Box<dyn Setter>> = vec![
        Box::new(transaction_id),
        Box::new(BINDING_REQUEST),
        Box::new(Username::new(ATTR_USERNAME, username)),
        Box::new(PriorityAttr(priority)),
    ];
    match role {
        Role::Controlling(tb) => setters.push(Box::new(AttrControlling(tb))),
        Role::Controlled(tb) => setters.push(Box::new(AttrControlled(tb))),
    }
    if use_candidate {
        setters.push(Box::new(UseCandidateAttr::new()));
    }
    setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
        remote_pwd.to_owned(),
    )));
    setters.push(Box::new(FINGERPRINT));

    let mut msg = Message::new();
    msg.build(&setters)?;
    Ok(msg)
}

/// binding_success_response answers an authenticated binding request
/// with the sender's reflexive address.
pub fn binding_success_response(
    transaction_id: TransactionId,
    src: SocketAddr,
    key: &str,
) -> Result<Message> {
    let mut msg = Message::new();
    msg.build(&[
        Box::new(transaction_id),
        Box::new(BINDING_SUCCESS),
        Box::new(XorMappedAddress {
            ip: src.ip(),
            port: src.port(),
        }),
        Box::new(MessageIntegrity::new_short_term_integrity(key.to_owned())),
        Box::new(FINGERPRINT),
    ])?;
    Ok(msg)
}

/// role_conflict_response answers a check that lost the tie-breaker
/// comparison with 487 Role Conflict.
pub fn role_conflict_response(
    transaction_id: TransactionId,
    src: SocketAddr,
    key: &str,
) -> Result<Message> {
    let mut msg = Message::new();
    msg.build(&[
        Box::new(transaction_id),
        Box::new(BINDING_ERROR),
        Box::new(XorMappedAddress {
            ip: src.ip(),
            port: src.port(),
        }),
        Box::new(CODE_ROLE_CONFLICT),
        Box::new(MessageIntegrity::new_short_term_integrity(key.to_owned())),
        Box::new(FINGERPRINT),
    ])?;
    Ok(msg)
}
