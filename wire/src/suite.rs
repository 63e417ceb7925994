use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Registry of negotiable AEAD cipher suites.
///
/// Identifiers are 2-byte big-endian values on the wire. `Aes256Gcm` is the
/// FIPS-eligible choice and is listed first in the default preference order.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CipherSuite {
    Aes256Gcm,
    ChaCha20Poly1305,
}

impl CipherSuite {
    pub fn id(&self) -> u16 {
        match self {
            CipherSuite::Aes256Gcm => 0x0001,
            CipherSuite::ChaCha20Poly1305 => 0x0002,
        }
    }

    pub fn from_id(id: u16) -> Result<Self, Error> {
        match id {
            0x0001 => Ok(CipherSuite::Aes256Gcm),
            0x0002 => Ok(CipherSuite::ChaCha20Poly1305),
            _ => Err(Error::UnknownCipherSuite(id)),
        }
    }
}

impl fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CipherSuite::Aes256Gcm => write!(f, "AES-256-GCM"),
            CipherSuite::ChaCha20Poly1305 => write!(f, "ChaCha20-Poly1305"),
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trip() {
        for suite in [CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305] {
            assert_eq!(CipherSuite::from_id(suite.id()).unwrap(), suite);
        }
    }

    #[test]
    fn unknown_id_rejected() {
        assert!(matches!(
            CipherSuite::from_id(0x7777),
            Err(Error::UnknownCipherSuite(0x7777))
        ));
    }
}
