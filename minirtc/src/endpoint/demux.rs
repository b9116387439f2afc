use stun::message::{Message, is_message};

/// Classification of one inbound datagram.
pub(crate) enum Classified {
    /// A well-formed STUN message (cookie and length verified).
    Stun(Box<Message>),
    /// First byte in the DTLS record range [20..63] (RFC 7983).
    Dtls,
    /// Anything else is dropped silently.
    Drop,
}

fn match_range(lower: u8, upper: u8, buf: &[u8]) -> bool {
    if buf.is_empty() {
        return false;
    }
    let b = buf[0];
    b >= lower && b <= upper
}

/// match_dtls is a MatchFunc that accepts packets with the first byte
/// in [20..63] as defined in RFC 7983.
pub(crate) fn match_dtls(buf: &[u8]) -> bool {
    match_range(20, 63, buf)
}

/// classify routes one datagram: STUN wins when the message actually
/// parses; otherwise the DTLS byte range decides; everything else is
/// dropped.
pub(crate) fn classify(buf: &[u8]) -> Classified {
    if is_message(buf) {
        let mut msg = Message::new();
        msg.raw = buf.to_vec();
        if msg.decode().is_ok() {
            return Classified::Stun(Box::new(msg));
        }
    }
    if match_dtls(buf) {
        return Classified::Dtls;
    }
    Classified::Drop
}

#[cfg(test)]
mod tests {
    use super::*;
    use stun::message::{BINDING_REQUEST, TransactionId};

    #[test]
    fn test_classify_stun() {
        let mut m = Message::new();
        m.build(&[Box::new(TransactionId::new()), Box::new(BINDING_REQUEST)])
            .unwrap();
        assert!(matches!(classify(&m.raw), Classified::Stun(_)));
    }

    #[test]
    fn test_classify_dtls_range() {
        // A DTLS 1.2 handshake record starts with content type 22.
        assert!(matches!(
            classify(&[22, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]),
            Classified::Dtls
        ));
        assert!(matches!(classify(&[20, 0, 0]), Classified::Dtls));
        assert!(matches!(classify(&[63, 0, 0]), Classified::Dtls));
    }

    #[test]
    fn test_classify_drop() {
        assert!(matches!(classify(&[]), Classified::Drop));
        assert!(matches!(classify(&[128, 1, 2]), Classified::Drop));
        assert!(matches!(classify(&[64, 0]), Classified::Drop));
        // STUN-range first byte but no magic cookie: dropped, not STUN.
        assert!(matches!(classify(&[0, 1, 0, 0, 9, 9, 9, 9]), Classified::Drop));
    }
}
