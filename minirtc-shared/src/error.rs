#![allow(dead_code)]

use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    // STUN wire errors
    #[error("attribute not found")]
    ErrAttributeNotFound,
    #[error("buffer length invalid")]
    ErrUnexpectedEof,
    #[error("attribute size invalid")]
    ErrAttributeSizeInvalid,
    #[error("not a STUN message")]
    ErrInvalidMagicCookie,
    #[error("unexpected STUN message type")]
    ErrUnexpectedMessageType,
    #[error("transaction not found")]
    ErrTransactionNotFound,
    #[error("integrity check failed")]
    ErrIntegrityMismatch,
    #[error("fingerprint check failed")]
    ErrFingerprintMismatch,
    #[error("fingerprint is not the last attribute before integrity")]
    ErrFingerprintBeforeIntegrity,
    #[error("unsupported address family")]
    ErrUnsupportedAddressFamily,
    #[error("STUN error response: {0} {1}")]
    ErrStunErrorResponse(u16, String),

    // TURN errors
    #[error("channel number out of TURN range")]
    ErrInvalidChannelNumber,
    #[error("channel-data frame truncated")]
    ErrShortChannelData,
    #[error("TURN allocate authentication exhausted")]
    ErrAllocateAuthExhausted,
    #[error("TURN allocation missing relayed address")]
    ErrNoRelayedAddress,
    #[error("TURN client is not connected")]
    ErrTurnNotConnected,
    #[error("no permission for peer")]
    ErrNoPermission,

    // SCTP errors
    #[error("SCTP packet shorter than common header")]
    ErrPacketTooShort,
    #[error("SCTP checksum mismatch")]
    ErrChecksumMismatch,
    #[error("chunk truncated")]
    ErrChunkTruncated,
    #[error("chunk type unexpected in this state")]
    ErrChunkTypeUnexpected,
    #[error("verification tag mismatch")]
    ErrVerificationTagMismatch,
    #[error("stream identifier out of range")]
    ErrStreamOutOfRange,
    #[error("association is not established")]
    ErrAssociationNotEstablished,
    #[error("association closed")]
    ErrAssociationClosed,
    #[error("payload exceeds maximum message size")]
    ErrPayloadTooLarge,
    #[error("INIT parameter missing")]
    ErrInitParameterMissing,
    #[error("state cookie missing")]
    ErrCookieMissing,

    // Data channel errors
    #[error("invalid DCEP message type: {0}")]
    InvalidMessageType(u8),
    #[error("invalid DCEP channel type: {0}")]
    InvalidChannelType(u8),
    #[error("invalid payload protocol identifier: {0}")]
    InvalidPayloadProtocolIdentifier(u32),
    #[error("unexpected end of buffer: (expected: {expected}, actual: {actual})")]
    UnexpectedEndOfBuffer { expected: usize, actual: usize },
    #[error("no free stream identifier")]
    ErrStreamIdsExhausted,
    #[error("data channel already open on stream")]
    ErrStreamAlreadyOpen,

    // Endpoint errors
    #[error("all offer slots are in use")]
    ErrSlotsExhausted,
    #[error("offer slot is vacant")]
    ErrUnknownSlot,
    #[error("offer has expired")]
    ErrOfferExpired,
    #[error("offer block version unsupported")]
    ErrOfferBlockVersion,
    #[error("offer block truncated")]
    ErrOfferBlockTruncated,
    #[error("too many candidates in offer")]
    ErrTooManyCandidates,
    #[error("candidate is not on the allowlist")]
    ErrCandidateDisallowed,
    #[error("DTLS certificate fingerprint mismatch")]
    ErrFingerprintPinMismatch,
    #[error("DTLS handshake failed: {0}")]
    ErrDtlsHandshakeFailed(String),
    #[error("session is not established")]
    ErrSessionNotEstablished,

    #[error("io error: {0}")]
    Io(#[source] IoError),
    #[error("utf-8 error: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
#[error("io error: {0}")]
pub struct IoError(#[from] pub io::Error);

// Workaround for wanting PartialEq for io::Error.
impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(IoError(e))
    }
}
