#![forbid(unsafe_code)]

//! quantide — a quantum-resistant point-to-point secure transport.
//!
//! A framed, authenticated, encrypted bidirectional channel between two
//! endpoints over a reliable byte stream. Key agreement is the CH-KEM
//! hybrid: ML-KEM-1024 alongside X25519 under a binding combiner, so the
//! channel holds as long as either primitive does. Sessions get forward
//! secrecy from ephemeral keypairs, periodic in-band rekeying with deferred
//! activation, sliding-window replay protection, ticket-based resumption,
//! and graceful shutdown signaling.
//!
//! The crate provides confidentiality, integrity and forward secrecy, not
//! peer identity: wrap the channel with an authentication layer when the
//! peer's identity matters.
//!
//! ```no_run
//! use std::net::TcpStream;
//! use quantide::{Session, SessionConfig, TransportConfig, Tunnel};
//!
//! # fn main() -> quantide::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:9735")?;
//! let mut session = Session::initiator(SessionConfig::default());
//! let mut handshake_stream = stream.try_clone()?;
//! session.initiate_handshake(&mut handshake_stream)?;
//!
//! let tunnel = Tunnel::from_tcp(stream, session, &TransportConfig::default())?;
//! tunnel.send(b"Hello, quantum world!")?;
//! let reply = tunnel.receive()?;
//! tunnel.close()?;
//! # Ok(())
//! # }
//! ```

pub mod aead;
pub mod config;
pub mod constants;
mod error;
mod handshake;
pub mod kem;
pub mod key_schedule;
mod observe;
mod rekey;
mod replay;
mod session;
mod ticket;
mod transport;

pub use self::config::{SessionConfig, TransportConfig};
pub use self::error::{Error, Result};
pub use self::observe::{RateLimitListener, SessionObserver};
pub use self::replay::ReplayWindow;
pub use self::session::{Role, Session, SessionState, SessionStats};
pub use self::ticket::{Resumption, SessionTicket, TicketManager};
pub use self::transport::Tunnel;

pub use wire::{Alert, AlertCode, AlertLevel, CipherSuite, Message};
