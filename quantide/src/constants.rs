//! Protocol constants. Everything here is wire-visible or part of the key
//! schedule; changing any value breaks interoperability.

use std::time::Duration;

pub const SESSION_ID_LEN: usize = 32;
pub const MASTER_SECRET_LEN: usize = 32;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const AEAD_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Bytes of the data-record sequence number, which rides in front of the
/// ciphertext and doubles as the AEAD associated data.
pub const SEQ_LEN: usize = 8;

/// Largest plaintext a single data record may carry.
pub const MAX_PAYLOAD_SIZE: usize = wire::MAX_MESSAGE_SIZE - SEQ_LEN - AEAD_OVERHEAD;

/// Width of the receive-side replay window.
pub const REPLAY_WINDOW_SIZE: u64 = 64;

/// Distance past the current send sequence at which rekeyed traffic keys
/// activate. The gap leaves room for records already in flight under the old
/// keys.
pub const REKEY_ACTIVATION_OFFSET: u64 = 16;

/// The AEAD refuses to seal once its nonce counter reaches this value.
pub const NONCE_LIMIT: u64 = 1 << 63;

/// `needs_rekey` trips here, well short of the hard limit.
pub const NONCE_REKEY_THRESHOLD: u64 = 1 << 62;

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadline for the best-effort close_notify alert during shutdown.
pub const CLOSE_NOTIFY_TIMEOUT: Duration = Duration::from_millis(100);

pub const TICKET_VERSION: u8 = 1;

/// version(1) || suite(2) || master_secret(32) || created_at(8)
pub const TICKET_PLAINTEXT_LEN: usize = 43;

/// Sealed ticket: nonce || plaintext || tag.
pub const TICKET_LEN: usize = NONCE_LEN + TICKET_PLAINTEXT_LEN + TAG_LEN;
