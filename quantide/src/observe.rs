//! Observation interfaces for external collaborators (metrics exporters,
//! structured loggers, connection pools).
//!
//! Hooks run on hot paths; implementations must be cheap and must not retain
//! a reference back to the session, which only borrows its observer for the
//! session's lifetime.

use wire::CipherSuite;

use crate::error::Error;
use crate::session::Role;

/// Lifecycle and per-record hooks for one session. Every method has a no-op
/// default so implementors pick only what they need.
#[allow(unused_variables)]
pub trait SessionObserver: Send + Sync {
    fn on_session_start(&self, session_id: &[u8; 32], role: Role) {}
    fn on_session_end(&self, session_id: &[u8; 32]) {}
    fn on_session_failed(&self, session_id: &[u8; 32], error: &Error) {}

    fn on_handshake_start(&self, role: Role) {}
    fn on_handshake_complete(&self, suite: CipherSuite) {}

    fn on_encrypt_start(&self) {}
    fn on_encrypt_end(&self, ciphertext_len: usize) {}
    fn on_decrypt_start(&self) {}
    fn on_decrypt_end(&self, plaintext_len: usize) {}

    fn on_replay_detected(&self, seq: u64) {}
    fn on_auth_failure(&self, seq: u64) {}

    fn on_rekey_start(&self) {}
    fn on_rekey_complete(&self) {}

    fn on_protocol_error(&self, error: &Error) {}
}

/// Hooks fired by external rate limiters guarding accept and handshake
/// paths. The engine defines the interface; the limiters live with the
/// listener.
pub trait RateLimitListener: Send + Sync {
    fn on_connection_rate_limited(&self) {}
    fn on_handshake_rate_limited(&self) {}
}
