use std::time::Duration;

use serde::{Deserialize, Serialize};

use wire::CipherSuite;

use crate::constants::DEFAULT_IO_TIMEOUT;

/// Session-level knobs: protocol version, suite preference, rekey triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub version: u16,
    /// Offered suites in preference order. The responder accepts the
    /// initiator's first offer it supports.
    pub suites: Vec<CipherSuite>,
    pub max_bytes_before_rekey: u64,
    pub max_packets_before_rekey: u64,
    pub max_session_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            version: wire::PROTOCOL_VERSION,
            suites: vec![CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305],
            max_bytes_before_rekey: 1 << 30,
            max_packets_before_rekey: 1 << 20,
            max_session_duration: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Transport-level knobs. A zero duration disables the deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            read_timeout: DEFAULT_IO_TIMEOUT,
            write_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_suite_preference_is_fips_first() {
        let config = SessionConfig::default();
        assert_eq!(
            config.suites,
            vec![CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305]
        );
        assert_eq!(config.version, wire::PROTOCOL_VERSION);
    }

    #[test]
    fn default_timeouts() {
        let config = TransportConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.write_timeout, Duration::from_secs(30));
    }
}
