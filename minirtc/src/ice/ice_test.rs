use super::*;
use crate::ice::control::AttrControlling;
use stun::error_code::{CODE_ROLE_CONFLICT, ErrorCodeAttribute};
use stun::message::Getter;

#[test]
fn test_integrity_key_is_deterministic_hex() {
    let secret = [0x42u8; 32];
    let key = compute_integrity_key(b"Aabcdef0", &secret);
    assert_eq!(key.len(), 32);
    assert!(key.bytes().all(|b| b.is_ascii_hexdigit()));
    assert_eq!(key, compute_integrity_key(b"Aabcdef0", &secret));

    // Different usernames and secrets both perturb the key.
    assert_ne!(key, compute_integrity_key(b"Babcdef0", &secret));
    assert_ne!(key, compute_integrity_key(b"Aabcdef0", &[0x43u8; 32]));
}

#[test]
fn test_binding_request_verifies_under_remote_password() -> Result<()> {
    let pwd = "0123456789abcdef0123456789abcdef";
    let msg = binding_request(
        TransactionId::new(),
        "remoteUfrag:Alocal00".to_owned(),
        pwd,
        Role::Controlling(7),
        42,
        true,
    )?;

    // Decode as the receiver would and verify everything.
    let mut parsed = Message::new();
    parsed.raw = msg.raw.clone();
    parsed.decode()?;
    verify_request(&parsed, pwd)?;

    assert_eq!(
        parsed.get(ATTR_USERNAME)?,
        b"remoteUfrag:Alocal00".to_vec()
    );
    let mut controlling = AttrControlling::default();
    controlling.get_from(&parsed)?;
    assert_eq!(controlling.0, 7);
    assert!(UseCandidateAttr::is_set(&parsed));

    let mut priority = PriorityAttr::default();
    priority.get_from(&parsed)?;
    assert_eq!(priority.0, 42);
    Ok(())
}

#[test]
fn test_binding_request_rejected_with_wrong_key() -> Result<()> {
    let msg = binding_request(
        TransactionId::new(),
        "a:b".to_owned(),
        "right-password",
        Role::Controlled(1),
        0,
        false,
    )?;
    assert!(verify_request(&msg, "wrong-password").is_err());
    Ok(())
}

#[test]
fn test_binding_success_response_echoes_source() -> Result<()> {
    let tid = TransactionId::new();
    let src: std::net::SocketAddr = "192.0.2.7:1234".parse().unwrap();
    let resp = binding_success_response(tid, src, "key")?;

    assert_eq!(resp.typ, BINDING_SUCCESS);
    assert_eq!(resp.transaction_id, tid);
    let mut mapped = XorMappedAddress::default();
    mapped.get_from(&resp)?;
    assert_eq!(mapped.ip, src.ip());
    assert_eq!(mapped.port, src.port());
    verify_request(&resp, "key")?;
    Ok(())
}

#[test]
fn test_role_conflict_response_is_487() -> Result<()> {
    let src: std::net::SocketAddr = "192.0.2.7:1234".parse().unwrap();
    let resp = role_conflict_response(TransactionId::new(), src, "key")?;

    assert_eq!(resp.typ, BINDING_ERROR);
    let mut code = ErrorCodeAttribute::default();
    code.get_from(&resp)?;
    assert_eq!(code.code, CODE_ROLE_CONFLICT);
    assert_eq!(code.reason, b"Role Conflict".to_vec());
    // Integrity and fingerprint are both present and valid.
    verify_request(&resp, "key")?;
    stun::fingerprint::FINGERPRINT.check(&resp)?;
    Ok(())
}
