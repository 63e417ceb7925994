//! Session-resumption tickets.
//!
//! A ticket seals enough state to skip the KEM round on a later connection:
//! `version(1) || suite(2 BE) || master_secret(32) || created_at(8 BE)`,
//! ChaCha20-Poly1305-sealed under a key expanded from the manager's symmetric
//! secret with a random nonce. Rotation keeps the previous key alive so
//! tickets issued just before a rotation still decrypt; two rotations later
//! they do not.
//!
//! The manager is an explicit object handed to ticket operations, never a
//! process-wide singleton.

use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ByteOrder};
use chacha20poly1305::aead::{Aead as _, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use wire::CipherSuite;

use crate::constants::{
    MASTER_SECRET_LEN, NONCE_LEN, TICKET_LEN, TICKET_PLAINTEXT_LEN, TICKET_VERSION,
};
use crate::error::{Error, Result};
use crate::key_schedule::{derive_key, LABEL_SESSION_TICKET};
use crate::session::{lock, Session};

/// Decrypted ticket contents.
pub struct SessionTicket {
    pub(crate) master_secret: Zeroizing<[u8; MASTER_SECRET_LEN]>,
    pub(crate) suite: CipherSuite,
    pub(crate) created_at_secs: u64,
}

impl SessionTicket {
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn created_at_secs(&self) -> u64 {
        self.created_at_secs
    }
}

/// Everything the initiator needs to attempt resumption later: the opaque
/// blob it will present, plus its own copy of the keying state the blob
/// stands for.
pub struct Resumption {
    pub(crate) ticket: Vec<u8>,
    pub(crate) master_secret: Zeroizing<[u8; MASTER_SECRET_LEN]>,
    pub(crate) suite: CipherSuite,
}

impl Resumption {
    pub fn ticket(&self) -> &[u8] {
        &self.ticket
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }
}

impl Session {
    /// Bundle a ticket received from the responder with this session's own
    /// keying state, for a later resumption attempt.
    pub fn export_resumption(&self, ticket: Vec<u8>) -> Result<Resumption> {
        let (master_secret, suite) = self.keying()?;
        Ok(Resumption {
            ticket,
            master_secret,
            suite,
        })
    }
}

struct TicketKeys {
    current: ChaCha20Poly1305,
    previous: Option<ChaCha20Poly1305>,
}

/// Encrypts and decrypts resumption tickets under a rotating symmetric
/// secret.
pub struct TicketManager {
    keys: Mutex<TicketKeys>,
    lifetime: Duration,
}

impl TicketManager {
    pub fn new(secret: [u8; 32], lifetime: Duration) -> Self {
        let cipher = Self::cipher_for(&secret);
        TicketManager {
            keys: Mutex::new(TicketKeys {
                current: cipher,
                previous: None,
            }),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Demote the current key and install `new_key`. Tickets sealed under
    /// the demoted key remain decryptable until the next rotation.
    pub fn rotate_key(&self, new_key: [u8; 32]) {
        let cipher = Self::cipher_for(&new_key);
        let mut keys = lock(&self.keys);
        keys.previous = Some(std::mem::replace(&mut keys.current, cipher));
        log::debug!(target: "quantide::ticket", "ticket key rotated");
    }

    // The wire key is expanded from the configured secret so the secret
    // itself never touches the cipher.
    fn cipher_for(secret: &[u8; 32]) -> ChaCha20Poly1305 {
        let key = derive_key(secret, LABEL_SESSION_TICKET, &[], 32);
        ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key))
    }

    /// Seal a ticket for the given session keying state.
    pub fn encrypt_ticket(
        &self,
        master_secret: &[u8; MASTER_SECRET_LEN],
        suite: CipherSuite,
    ) -> Result<Vec<u8>> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::Internal("system clock before epoch"))?
            .as_secs();
        self.encrypt_ticket_at(master_secret, suite, created_at)
    }

    fn encrypt_ticket_at(
        &self,
        master_secret: &[u8; MASTER_SECRET_LEN],
        suite: CipherSuite,
        created_at_secs: u64,
    ) -> Result<Vec<u8>> {
        let mut plaintext = Zeroizing::new([0u8; TICKET_PLAINTEXT_LEN]);
        plaintext[0] = TICKET_VERSION;
        BigEndian::write_u16(&mut plaintext[1..3], suite.id());
        plaintext[3..35].copy_from_slice(master_secret);
        BigEndian::write_u64(&mut plaintext[35..43], created_at_secs);

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let keys = lock(&self.keys);
        let sealed = keys
            .current
            .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), &plaintext[..])
            .map_err(|_| Error::Internal("ticket seal"))?;
        drop(keys);

        let mut out = Vec::with_capacity(TICKET_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Convenience wrapper: seal a ticket for a live established session.
    pub fn issue(&self, session: &Session) -> Result<Vec<u8>> {
        let (master_secret, suite) = session.keying()?;
        self.encrypt_ticket(&master_secret, suite)
    }

    /// Open a ticket blob, trying the current key and then the previous
    /// one. Checks version and lifetime.
    pub fn decrypt_ticket(&self, blob: &[u8]) -> Result<SessionTicket> {
        if blob.len() != TICKET_LEN {
            return Err(Error::InvalidTicket);
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let nonce = chacha20poly1305::Nonce::from_slice(nonce);

        let keys = lock(&self.keys);
        let plaintext = keys
            .current
            .decrypt(nonce, sealed)
            .or_else(|_| {
                keys.previous
                    .as_ref()
                    .ok_or(Error::InvalidTicket)?
                    .decrypt(nonce, sealed)
                    .map_err(|_| Error::InvalidTicket)
            })
            .map(Zeroizing::new)?;
        drop(keys);

        if plaintext.len() != TICKET_PLAINTEXT_LEN || plaintext[0] != TICKET_VERSION {
            return Err(Error::InvalidTicket);
        }
        let suite = CipherSuite::from_id(BigEndian::read_u16(&plaintext[1..3]))
            .map_err(|_| Error::InvalidTicket)?;
        let mut master_secret = Zeroizing::new([0u8; MASTER_SECRET_LEN]);
        master_secret.copy_from_slice(&plaintext[3..35]);
        let created_at_secs = BigEndian::read_u64(&plaintext[35..43]);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| Error::Internal("system clock before epoch"))?
            .as_secs();
        if now.saturating_sub(created_at_secs) > self.lifetime.as_secs() {
            return Err(Error::ExpiredTicket);
        }

        Ok(SessionTicket {
            master_secret,
            suite,
            created_at_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 32] = [0x77; 32];
    const MASTER: [u8; MASTER_SECRET_LEN] = [0x1f; MASTER_SECRET_LEN];

    fn manager() -> TicketManager {
        TicketManager::new(SECRET, Duration::from_secs(3600))
    }

    #[test]
    fn round_trip() {
        let manager = manager();
        let blob = manager
            .encrypt_ticket(&MASTER, CipherSuite::ChaCha20Poly1305)
            .unwrap();
        assert_eq!(blob.len(), TICKET_LEN);

        let ticket = manager.decrypt_ticket(&blob).unwrap();
        assert_eq!(*ticket.master_secret, MASTER);
        assert_eq!(ticket.suite(), CipherSuite::ChaCha20Poly1305);
    }

    #[test]
    fn expired_ticket_rejected() {
        let manager = manager();
        let stale = manager
            .encrypt_ticket_at(&MASTER, CipherSuite::Aes256Gcm, 1_000)
            .unwrap();
        assert!(matches!(
            manager.decrypt_ticket(&stale),
            Err(Error::ExpiredTicket)
        ));
    }

    #[test]
    fn ticket_survives_one_rotation_not_two() {
        let manager = manager();
        let blob = manager
            .encrypt_ticket(&MASTER, CipherSuite::Aes256Gcm)
            .unwrap();

        manager.rotate_key([0x88; 32]);
        assert!(manager.decrypt_ticket(&blob).is_ok());

        manager.rotate_key([0x99; 32]);
        assert!(matches!(
            manager.decrypt_ticket(&blob),
            Err(Error::InvalidTicket)
        ));
    }

    #[test]
    fn tampered_or_truncated_ticket_rejected() {
        let manager = manager();
        let blob = manager
            .encrypt_ticket(&MASTER, CipherSuite::Aes256Gcm)
            .unwrap();

        let mut mangled = blob.clone();
        mangled[NONCE_LEN + 3] ^= 0x01;
        assert!(matches!(
            manager.decrypt_ticket(&mangled),
            Err(Error::InvalidTicket)
        ));
        assert!(matches!(
            manager.decrypt_ticket(&blob[..TICKET_LEN - 1]),
            Err(Error::InvalidTicket)
        ));
    }

    #[test]
    fn foreign_key_rejected() {
        let ours = manager();
        let theirs = TicketManager::new([0xab; 32], Duration::from_secs(3600));
        let blob = theirs
            .encrypt_ticket(&MASTER, CipherSuite::Aes256Gcm)
            .unwrap();
        assert!(matches!(
            ours.decrypt_ticket(&blob),
            Err(Error::InvalidTicket)
        ));
    }
}
