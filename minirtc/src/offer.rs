use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use crate::MAX_OFFER_AGE_SECS;
use crate::dtls::DtlsRole;
use crate::ice::compute_integrity_key;
use shared::error::{Error, Result};

/// Signaling block format version.
const BLOCK_VERSION: u16 = 1;
/// Flags bit 0: the block's generator takes the DTLS server role.
const FLAG_DTLS_SERVER: u32 = 0x1;
/// At most this many host candidates travel in a block.
pub const MAX_CANDIDATES: usize = 8;

/// slot_to_char encodes a slot index as the printable first byte of the
/// local ICE username.
pub fn slot_to_char(slot: usize) -> u8 {
    b'A' + slot as u8
}

/// char_to_slot inverts [`slot_to_char`].
pub fn char_to_slot(c: u8) -> Option<usize> {
    if (b'A'..b'A' + crate::MAX_SLOTS as u8).contains(&c) {
        Some((c - b'A') as usize)
    } else {
        None
    }
}

/// Candidate is one IPv4 host (or relayed) candidate with its
/// reachability flag; reachable means at least one authenticated
/// binding request arrived from it during the pre-DTLS window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub addr: SocketAddr,
    pub reachable: bool,
}

/// One scheduled connectivity check on the controlling side.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScheduledCheck {
    pub(crate) candidate_index: usize,
    pub(crate) at: Instant,
    pub(crate) sent: bool,
}

/// Offer is one slot of the endpoint's offer table: the ICE credential
/// pair, the pinned peer DTLS fingerprint, and the candidate list for
/// one prospective session.
#[derive(Debug, Clone)]
pub struct Offer {
    /// Peer's ICE ufrag, empty until the remote block is set.
    pub remote_username: String,
    /// Peer's ICE password.
    pub remote_password: String,
    /// 8 ASCII bytes; byte 0 encodes the slot.
    pub local_username: [u8; 8],
    /// 32 hex chars derived from the endpoint secret; never stored
    /// anywhere else.
    pub local_password: String,
    /// SHA-256 of the peer's DTLS certificate, pinned at offer time.
    pub remote_fingerprint: [u8; 32],
    pub candidates: Vec<Candidate>,
    /// Relayed candidate advertised through TURN, if any.
    pub relay_candidate: Option<SocketAddr>,
    pub peer_is_controlling: bool,
    /// Our DTLS role for the prospective session.
    pub dtls_role: DtlsRole,
    pub tie_breaker: u64,
    pub created_at: Instant,
    /// Whether this side generated the offer (and so initiates SCTP).
    pub created_locally: bool,
    /// Session slot once a DTLS session has bound to this offer.
    pub session_slot: Option<usize>,

    // Connectivity-check state (controlling side only).
    pub(crate) checks: Vec<ScheduledCheck>,
    pub(crate) responded: Vec<bool>,
    pub(crate) election_deadline: Option<Instant>,
    pub(crate) nominated: Option<usize>,
    pub(crate) next_keepalive: Option<Instant>,
    pub(crate) requery_count: u8,
}

impl Offer {
    /// new creates the slot-local half of an offer: username with the
    /// slot byte up front, password derived from the endpoint secret.
    pub fn new(slot: usize, secret: &[u8; 32], dtls_role: DtlsRole, now: Instant) -> Self {
        let mut rng = rand::rng();

        let mut local_username = [0u8; 8];
        local_username[0] = slot_to_char(slot);
        let r: [u8; 4] = rng.random();
        let hex = format!("{:02x}{:02x}{:02x}{:02x}", r[0], r[1], r[2], r[3]);
        local_username[1..8].copy_from_slice(&hex.as_bytes()[..7]);

        let local_password = compute_integrity_key(&local_username, secret);

        Offer {
            remote_username: String::new(),
            remote_password: String::new(),
            local_username,
            local_password,
            remote_fingerprint: [0; 32],
            candidates: Vec::new(),
            relay_candidate: None,
            peer_is_controlling: dtls_role == DtlsRole::Server,
            dtls_role,
            tie_breaker: rng.random(),
            created_at: now,
            created_locally: dtls_role == DtlsRole::Client,
            session_slot: None,
            checks: Vec::new(),
            responded: Vec::new(),
            election_deadline: None,
            nominated: None,
            next_keepalive: None,
            requery_count: 0,
        }
    }

    pub fn local_username_str(&self) -> &str {
        std::str::from_utf8(&self.local_username).unwrap_or("")
    }

    /// is_expired reports whether the offer aged out without a session.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.session_slot.is_none()
            && now.duration_since(self.created_at) >= Duration::from_secs(MAX_OFFER_AGE_SECS)
    }

    /// mark_reachable flips (or learns) the candidate at `src`.
    /// Returns the candidate index.
    pub fn mark_reachable(&mut self, src: SocketAddr) -> Option<usize> {
        if let Some(i) = self.candidates.iter().position(|c| c.addr == src) {
            self.candidates[i].reachable = true;
            return Some(i);
        }
        if self.candidates.len() < MAX_CANDIDATES {
            self.candidates.push(Candidate {
                addr: src,
                reachable: true,
            });
            self.responded.push(false);
            return Some(self.candidates.len() - 1);
        }
        None
    }

    /// is_reachable_candidate reports whether `src` may carry DTLS for
    /// this offer.
    pub fn is_reachable_candidate(&self, src: SocketAddr) -> bool {
        self.candidates
            .iter()
            .any(|c| c.reachable && c.addr == src)
    }
}

/// OfferBlock is the opaque binary block ferried by the external SDP
/// layer: credentials, fingerprint and candidates in a fixed layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferBlock {
    pub generator_is_dtls_server: bool,
    pub username: Vec<u8>,
    pub password: Vec<u8>,
    pub fingerprint: [u8; 32],
    pub candidates: Vec<SocketAddr>,
    pub relay_candidate: Option<SocketAddr>,
}

impl OfferBlock {
    /// marshal lays the block out per the external-interface format:
    /// version, flags, length-prefixed username/password/fingerprint,
    /// candidate count plus 6 bytes per IPv4 candidate, and optionally
    /// a length-prefixed relayed candidate.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            2 + 4 + 1 + self.username.len() + 1 + self.password.len() + 1 + 32 + 1
                + 6 * self.candidates.len()
                + 7,
        );
        out.extend_from_slice(&BLOCK_VERSION.to_be_bytes());
        let mut flags = 0u32;
        if self.generator_is_dtls_server {
            flags |= FLAG_DTLS_SERVER;
        }
        out.extend_from_slice(&flags.to_be_bytes());
        out.push(self.username.len() as u8);
        out.extend_from_slice(&self.username);
        out.push(self.password.len() as u8);
        out.extend_from_slice(&self.password);
        out.push(32);
        out.extend_from_slice(&self.fingerprint);

        let v4: Vec<(Ipv4Addr, u16)> = self
            .candidates
            .iter()
            .filter_map(|c| match c.ip() {
                IpAddr::V4(ip) => Some((ip, c.port())),
                IpAddr::V6(_) => None,
            })
            .collect();
        out.push(v4.len() as u8);
        for (ip, port) in v4 {
            out.extend_from_slice(&ip.octets());
            out.extend_from_slice(&port.to_be_bytes());
        }

        if let Some(relay) = self.relay_candidate {
            if let IpAddr::V4(ip) = relay.ip() {
                out.push(6);
                out.extend_from_slice(&ip.octets());
                out.extend_from_slice(&relay.port().to_be_bytes());
            }
        }
        out
    }

    pub fn unmarshal(buf: &[u8]) -> Result<Self> {
        let mut r = Reader { buf, pos: 0 };

        let version = u16::from_be_bytes(r.take_n::<2>()?);
        if version != BLOCK_VERSION {
            return Err(Error::ErrOfferBlockVersion);
        }
        let flags = u32::from_be_bytes(r.take_n::<4>()?);

        let ulen = r.take_u8()? as usize;
        let username = r.take(ulen)?.to_vec();
        let plen = r.take_u8()? as usize;
        let password = r.take(plen)?.to_vec();
        let flen = r.take_u8()? as usize;
        if flen != 32 {
            return Err(Error::ErrOfferBlockTruncated);
        }
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(r.take(32)?);

        let count = r.take_u8()? as usize;
        if count > MAX_CANDIDATES {
            return Err(Error::ErrTooManyCandidates);
        }
        let mut candidates = Vec::with_capacity(count);
        for _ in 0..count {
            let ip: [u8; 4] = r.take_n::<4>()?;
            let port = u16::from_be_bytes(r.take_n::<2>()?);
            candidates.push(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port));
        }

        let relay_candidate = if r.remaining() > 0 {
            let len = r.take_u8()? as usize;
            if len != 6 {
                return Err(Error::ErrOfferBlockTruncated);
            }
            let ip: [u8; 4] = r.take_n::<4>()?;
            let port = u16::from_be_bytes(r.take_n::<2>()?);
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), port))
        } else {
            None
        };

        Ok(OfferBlock {
            generator_is_dtls_server: flags & FLAG_DTLS_SERVER != 0,
            username,
            password,
            fingerprint,
            candidates,
            relay_candidate,
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::ErrOfferBlockTruncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_n<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_char_roundtrip() {
        for slot in 0..crate::MAX_SLOTS {
            assert_eq!(char_to_slot(slot_to_char(slot)), Some(slot));
        }
        assert_eq!(char_to_slot(b'A' + crate::MAX_SLOTS as u8), None);
        assert_eq!(char_to_slot(b'0'), None);
    }

    #[test]
    fn test_offer_username_and_key_shape() {
        let secret = [7u8; 32];
        let now = Instant::now();
        let offer = Offer::new(3, &secret, DtlsRole::Server, now);

        assert_eq!(offer.local_username[0], slot_to_char(3));
        assert!(offer.local_username.iter().all(|b| b.is_ascii()));
        assert_eq!(offer.local_password.len(), 32);
        assert!(offer.local_password.bytes().all(|b| b.is_ascii_hexdigit()));
        // Re-derivable from the username and secret alone.
        assert_eq!(
            offer.local_password,
            compute_integrity_key(&offer.local_username, &secret)
        );
    }

    #[test]
    fn test_offer_expiry() {
        let secret = [0u8; 32];
        let now = Instant::now();
        let mut offer = Offer::new(0, &secret, DtlsRole::Server, now);
        assert!(!offer.is_expired(now));
        assert!(offer.is_expired(now + Duration::from_secs(61)));

        offer.session_slot = Some(0);
        assert!(!offer.is_expired(now + Duration::from_secs(61)));
    }

    #[test]
    fn test_offer_block_roundtrip() {
        let block = OfferBlock {
            generator_is_dtls_server: true,
            username: b"Aabcdef0".to_vec(),
            password: b"0123456789abcdef0123456789abcdef".to_vec(),
            fingerprint: [0xab; 32],
            candidates: vec![
                "192.168.1.10:50000".parse().unwrap(),
                "10.0.0.3:41234".parse().unwrap(),
            ],
            relay_candidate: Some("203.0.113.9:49152".parse().unwrap()),
        };

        let raw = block.marshal();
        assert_eq!(&raw[0..2], &[0, 1]); // version
        let decoded = OfferBlock::unmarshal(&raw).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_offer_block_no_relay() {
        let block = OfferBlock {
            generator_is_dtls_server: false,
            username: b"Bzzzzzzz".to_vec(),
            password: b"ffffffffffffffffffffffffffffffff".to_vec(),
            fingerprint: [1; 32],
            candidates: vec!["127.0.0.1:9999".parse().unwrap()],
            relay_candidate: None,
        };
        let decoded = OfferBlock::unmarshal(&block.marshal()).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn test_offer_block_rejects_bad_version() {
        let block = OfferBlock {
            generator_is_dtls_server: false,
            username: vec![],
            password: vec![],
            fingerprint: [0; 32],
            candidates: vec![],
            relay_candidate: None,
        };
        let mut raw = block.marshal();
        raw[1] = 9;
        assert_eq!(
            OfferBlock::unmarshal(&raw),
            Err(Error::ErrOfferBlockVersion)
        );
    }

    #[test]
    fn test_offer_block_truncated() {
        let block = OfferBlock {
            generator_is_dtls_server: false,
            username: b"Aabcdef0".to_vec(),
            password: b"0123456789abcdef0123456789abcdef".to_vec(),
            fingerprint: [0; 32],
            candidates: vec!["192.0.2.1:1000".parse().unwrap()],
            relay_candidate: None,
        };
        let raw = block.marshal();
        for cut in 1..raw.len() {
            assert!(
                OfferBlock::unmarshal(&raw[..cut]).is_err(),
                "cut at {cut} should fail"
            );
        }
    }

    #[test]
    fn test_mark_reachable_learns_new_candidate() {
        let secret = [0u8; 32];
        let mut offer = Offer::new(0, &secret, DtlsRole::Server, Instant::now());
        let src: SocketAddr = "192.0.2.5:1234".parse().unwrap();

        assert!(!offer.is_reachable_candidate(src));
        assert_eq!(offer.mark_reachable(src), Some(0));
        assert!(offer.is_reachable_candidate(src));

        // A full table stops learning.
        for i in 0..MAX_CANDIDATES {
            let addr: SocketAddr = format!("192.0.2.{}:1000", 10 + i).parse().unwrap();
            offer.mark_reachable(addr);
        }
        assert_eq!(
            offer.mark_reachable("198.51.100.1:1".parse().unwrap()),
            None
        );
    }
}
