use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed {0} message")]
    InvalidMessage(&'static str),

    #[error("message length {0} exceeds the {max} byte limit", max = crate::MAX_MESSAGE_SIZE)]
    MessageTooLarge(usize),

    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),

    #[error("unknown cipher suite {0:#06x}")]
    UnknownCipherSuite(u16),

    #[error("unknown alert code {0}")]
    UnknownAlertCode(u16),

    #[error("unknown alert level {0}")]
    UnknownAlertLevel(u8),
}
