#![forbid(unsafe_code)]

//! Wire protocol for the CH-KEM tunnel.
//!
//! Every message on the stream is a 5-byte header (1-byte type, 4-byte
//! big-endian payload length) followed by the payload. The payload length is
//! capped at `MAX_MESSAGE_SIZE`; a peer announcing anything larger is
//! unrecoverable on a stream transport and the connection must be torn down.

mod alert;
mod codec;
mod error;
mod message;
mod suite;

pub use self::alert::{Alert, AlertCode, AlertLevel};
pub use self::codec::{read_frame, read_message, write_message};
pub use self::error::Error;
pub use self::message::{ClientHello, Message, RekeyBody, ServerHello};
pub use self::suite::CipherSuite;

/// Size of the fixed message header: type byte plus big-endian length.
pub const HEADER_SIZE: usize = 5;

/// Largest payload a single message may carry.
pub const MAX_MESSAGE_SIZE: usize = 65_535;

/// Wire protocol version carried in the hello messages.
pub const PROTOCOL_VERSION: u16 = 0x0001;
