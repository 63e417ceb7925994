use std::io;

use thiserror::Error;

use wire::{AlertCode, AlertLevel};

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the engine can surface, grouped the way callers handle
/// them: cryptographic failures, protocol failures, session lifecycle.
#[derive(Debug, Error)]
pub enum Error {
    // Cryptographic.
    #[error("invalid key size")]
    InvalidKeySize,
    #[error("invalid KEM ciphertext")]
    InvalidCiphertext,
    #[error("decapsulation failed")]
    DecapsulationFailed,
    #[error("key generation failed")]
    KeyGenerationFailed,
    #[error("encapsulation failed")]
    EncapsulationFailed,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("nonce counter exhausted")]
    NonceExhausted,

    // Protocol.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    #[error("unsupported protocol version {0:#06x}")]
    UnsupportedVersion(u16),
    #[error("no mutually supported cipher suite")]
    UnsupportedCipherSuite,
    #[error("handshake failed: {0}")]
    HandshakeFailed(&'static str),
    #[error("session expired")]
    SessionExpired,
    #[error("invalid session state")]
    InvalidState,
    #[error("message too large")]
    MessageTooLarge,
    #[error("replay detected")]
    ReplayDetected,
    #[error("invalid ticket")]
    InvalidTicket,
    #[error("expired ticket")]
    ExpiredTicket,

    // Session lifecycle.
    #[error("tunnel closed")]
    TunnelClosed,
    #[error("rekey required")]
    RekeyRequired,
    #[error("rekey already in progress")]
    RekeyInProgress,
    #[error("operation timed out")]
    Timeout,

    #[error("peer alert ({level:?}, {code:?}): {description}")]
    AlertReceived {
        level: AlertLevel,
        code: AlertCode,
        description: String,
    },

    #[error("internal error: {0}")]
    Internal(&'static str),

    #[error("io error: {0}")]
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout,
            _ => Error::Io(err),
        }
    }
}

impl From<wire::Error> for Error {
    fn from(err: wire::Error) -> Self {
        match err {
            wire::Error::Io(io_err) => Error::from(io_err),
            wire::Error::MessageTooLarge(_) => Error::MessageTooLarge,
            wire::Error::InvalidMessage(what) => Error::InvalidMessage(what),
            wire::Error::UnknownMessageType(_) => Error::InvalidMessage("unknown message type"),
            wire::Error::UnknownCipherSuite(_) => Error::InvalidMessage("unknown cipher suite"),
            wire::Error::UnknownAlertCode(_) | wire::Error::UnknownAlertLevel(_) => {
                Error::InvalidMessage("malformed alert")
            }
        }
    }
}

impl Error {
    /// Alert code announced to the peer when this error aborts a handshake.
    pub(crate) fn alert_code(&self) -> AlertCode {
        match self {
            Error::UnsupportedVersion(_) => AlertCode::UnsupportedVersion,
            Error::UnsupportedCipherSuite => AlertCode::UnsupportedSuite,
            Error::AuthenticationFailed => AlertCode::BadRecordMac,
            Error::HandshakeFailed(_)
            | Error::InvalidMessage(_)
            | Error::InvalidCiphertext
            | Error::InvalidPublicKey => AlertCode::HandshakeFailure,
            _ => AlertCode::InternalError,
        }
    }
}
