use shared::error::Result;

/// DtlsRole selects which side of the handshake a session drives. The
/// role always comes from the offer's role flag, never inferred from
/// connection state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DtlsRole {
    /// Sends ClientHello; this side is ICE-CONTROLLING.
    Client,
    /// Awaits ClientHello; this side is ICE-CONTROLLED.
    Server,
}

/// DtlsEvent is produced by the record engine as the handshake and
/// session progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtlsEvent {
    /// The handshake finished; the peer certificate's SHA-256
    /// fingerprint is reported for pinning against the offer.
    HandshakeComplete { peer_fingerprint: [u8; 32] },
    /// The peer sent close_notify.
    CloseNotify,
    /// The handshake failed or the session hit a fatal alert.
    Fatal(String),
}

/// DtlsEngine is the seam to the external DTLS record implementation:
/// record-layer encrypt/decrypt plus a handshake driver. The endpoint
/// feeds it wire records and plaintext and polls the opposite
/// directions; it never looks inside records.
pub trait DtlsEngine {
    /// start_handshake begins the handshake in the given role. For the
    /// client role this produces the first flight immediately.
    fn start_handshake(&mut self, role: DtlsRole) -> Result<()>;

    /// handle_record feeds one inbound record from the wire.
    fn handle_record(&mut self, record: &[u8]) -> Result<()>;

    /// write_application_data encrypts one outbound payload.
    fn write_application_data(&mut self, data: &[u8]) -> Result<()>;

    /// poll_record drains outbound records bound for the wire.
    fn poll_record(&mut self) -> Option<Vec<u8>>;

    /// poll_application_data drains decrypted inbound payloads.
    fn poll_application_data(&mut self) -> Option<Vec<u8>>;

    /// poll_event drains handshake/teardown events.
    fn poll_event(&mut self) -> Option<DtlsEvent>;

    /// close_notify queues a best-effort close_notify record.
    fn close_notify(&mut self);
}
