//! Session state and the authenticated data plane.
//!
//! A `Session` is one side of a channel: identity, role, negotiated suite,
//! traffic ciphers, sequence counters, replay window and rekey state. The
//! handshake (handshake.rs) drives a session from `New` to `Established`;
//! after that `encrypt`/`decrypt` take `&self` and synchronize internally so
//! send and receive may run on separate threads.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering::SeqCst};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use wire::CipherSuite;

use crate::aead::AeadCipher;
use crate::config::SessionConfig;
use crate::constants::{MASTER_SECRET_LEN, SESSION_ID_LEN};
use crate::error::{Error, Result};
use crate::key_schedule::{derive_traffic_keys, seq_aad};
use crate::observe::SessionObserver;
use crate::rekey::RekeyState;
use crate::replay::ReplayWindow;

/// Which side of the channel this session is.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Session lifecycle. Monotone except for `Rekeying` -> `Established`, and
/// any state may drop to `Closed`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum SessionState {
    New = 0,
    Handshaking = 1,
    Established = 2,
    Rekeying = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::New,
            1 => SessionState::Handshaking,
            2 => SessionState::Established,
            3 => SessionState::Rekeying,
            _ => SessionState::Closed,
        }
    }
}

/// Point-in-time traffic counters.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SessionStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
}

// Key material and cipher state, all guarded by one mutex. Encrypt and
// decrypt hold the lock across the AEAD call; per-record work is short and
// constant-time.
pub(crate) struct SessionInner {
    pub(crate) suite: Option<CipherSuite>,
    pub(crate) master_secret: Option<Zeroizing<[u8; MASTER_SECRET_LEN]>>,
    pub(crate) send_cipher: Option<AeadCipher>,
    pub(crate) recv_cipher: Option<AeadCipher>,
    pub(crate) rekey: Option<RekeyState>,
}

pub struct Session {
    id: [u8; SESSION_ID_LEN],
    role: Role,
    pub(crate) config: SessionConfig,
    state: AtomicU8,
    pub(crate) send_seq: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    // Rekey triggers compare against the current key epoch, not the session
    // lifetime, or the first threshold crossing would re-trigger on every
    // subsequent send.
    epoch_bytes_sent: AtomicU64,
    epoch_packets_sent: AtomicU64,
    pub(crate) epoch_start: Mutex<Instant>,
    created_at: Instant,
    established_at: Mutex<Option<Instant>>,
    last_activity: Mutex<Instant>,
    observer: Option<Arc<dyn SessionObserver>>,
    pub(crate) inner: Mutex<SessionInner>,
    pub(crate) replay: Mutex<ReplayWindow>,
}

// Lock helper: a panic while holding a session lock leaves no torn state
// worth preserving, so a poisoned guard is taken over aborting every
// subsequent operation.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|err| err.into_inner())
}

impl Session {
    pub fn initiator(config: SessionConfig) -> Self {
        Self::with_role(Role::Initiator, config)
    }

    pub fn responder(config: SessionConfig) -> Self {
        Self::with_role(Role::Responder, config)
    }

    fn with_role(role: Role, config: SessionConfig) -> Self {
        let mut id = [0u8; SESSION_ID_LEN];
        OsRng.fill_bytes(&mut id);
        Session {
            id,
            role,
            config,
            state: AtomicU8::new(SessionState::New as u8),
            send_seq: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            epoch_bytes_sent: AtomicU64::new(0),
            epoch_packets_sent: AtomicU64::new(0),
            epoch_start: Mutex::new(Instant::now()),
            created_at: Instant::now(),
            established_at: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            observer: None,
            inner: Mutex::new(SessionInner {
                suite: None,
                master_secret: None,
                send_cipher: None,
                recv_cipher: None,
                rekey: None,
            }),
            replay: Mutex::new(ReplayWindow::new()),
        }
    }

    /// Attach an observer. Must happen before the session is shared or
    /// driven; the exclusive borrow enforces it.
    pub fn set_observer(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observer = Some(observer);
    }

    pub fn id(&self) -> &[u8; SESSION_ID_LEN] {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(SeqCst))
    }

    pub fn negotiated_suite(&self) -> Option<CipherSuite> {
        lock(&self.inner).suite
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            bytes_sent: self.bytes_sent.load(SeqCst),
            bytes_received: self.bytes_received.load(SeqCst),
            packets_sent: self.packets_sent.load(SeqCst),
            packets_received: self.packets_received.load(SeqCst),
        }
    }

    pub fn is_rekey_in_progress(&self) -> bool {
        lock(&self.inner).rekey.is_some()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, SeqCst);
    }

    pub(crate) fn set_id(&mut self, id: [u8; SESSION_ID_LEN]) {
        self.id = id;
    }

    pub(crate) fn observer(&self) -> Option<&Arc<dyn SessionObserver>> {
        self.observer.as_ref()
    }

    pub(crate) fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Reset the per-epoch trigger counters. Called whenever fresh traffic
    /// keys take effect.
    pub(crate) fn reset_epoch(&self) {
        self.epoch_bytes_sent.store(0, SeqCst);
        self.epoch_packets_sent.store(0, SeqCst);
        *lock(&self.epoch_start) = Instant::now();
    }

    fn usable(&self) -> Result<()> {
        match self.state() {
            SessionState::Established | SessionState::Rekeying => Ok(()),
            _ => Err(Error::InvalidState),
        }
    }

    /// Encrypt one data record. Returns the sealed record and the sequence
    /// number that must accompany it on the wire (it is the AAD).
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(Vec<u8>, u64)> {
        self.usable()?;
        if let Some(observer) = &self.observer {
            observer.on_encrypt_start();
        }

        let seq = self.send_seq.fetch_add(1, SeqCst);

        let mut inner = lock(&self.inner);
        if self.role == Role::Initiator {
            self.activate_if_due(&mut inner, seq);
        }
        let cipher = inner.send_cipher.as_mut().ok_or(Error::InvalidState)?;
        let sealed = cipher.seal(plaintext, &seq_aad(seq))?;
        drop(inner);

        self.bytes_sent.fetch_add(plaintext.len() as u64, SeqCst);
        self.packets_sent.fetch_add(1, SeqCst);
        self.epoch_bytes_sent.fetch_add(plaintext.len() as u64, SeqCst);
        self.epoch_packets_sent.fetch_add(1, SeqCst);
        self.touch();
        if let Some(observer) = &self.observer {
            observer.on_encrypt_end(sealed.len());
        }
        Ok((sealed, seq))
    }

    /// Decrypt one data record received with sequence number `seq`.
    ///
    /// `AuthenticationFailed` and `ReplayDetected` leave the session open;
    /// whether repeated failures mean an attack is the caller's policy.
    pub fn decrypt(&self, ciphertext: &[u8], seq: u64) -> Result<Vec<u8>> {
        self.usable()?;
        if let Some(observer) = &self.observer {
            observer.on_decrypt_start();
        }

        let inner = {
            let mut inner = lock(&self.inner);
            if self.role == Role::Responder {
                self.activate_if_due(&mut inner, seq);
            }
            inner
        };

        if let Err(err) = lock(&self.replay).check(seq) {
            if let Some(observer) = &self.observer {
                observer.on_replay_detected(seq);
            }
            return Err(err);
        }

        let cipher = inner.recv_cipher.as_ref().ok_or(Error::InvalidState)?;
        let plaintext = match cipher.open(ciphertext, &seq_aad(seq)) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                if matches!(err, Error::AuthenticationFailed) {
                    if let Some(observer) = &self.observer {
                        observer.on_auth_failure(seq);
                    }
                }
                return Err(err);
            }
        };
        drop(inner);

        // The authenticated record claims the sequence slot; a concurrent
        // decrypt of the same seq loses here.
        if let Err(err) = lock(&self.replay).check_and_update(seq) {
            if let Some(observer) = &self.observer {
                observer.on_replay_detected(seq);
            }
            return Err(err);
        }

        self.bytes_received.fetch_add(plaintext.len() as u64, SeqCst);
        self.packets_received.fetch_add(1, SeqCst);
        self.touch();
        if let Some(observer) = &self.observer {
            observer.on_decrypt_end(plaintext.len());
        }
        Ok(plaintext)
    }

    /// Tear the session down. Idempotent; all key material is dropped
    /// through its zeroizing wrappers and further encrypt/decrypt calls
    /// fail with `InvalidState`.
    pub fn close(&self) {
        let previous = self.state.swap(SessionState::Closed as u8, SeqCst);
        if previous == SessionState::Closed as u8 {
            return;
        }

        let mut inner = lock(&self.inner);
        inner.master_secret = None;
        inner.send_cipher = None;
        inner.recv_cipher = None;
        inner.rekey = None;
        drop(inner);

        log::debug!(
            target: "quantide::session",
            "session {} closed", hex::encode(&self.id[..8]),
        );
        if let Some(observer) = &self.observer {
            observer.on_session_end(&self.id);
        }
    }

    /// Install traffic keys derived from `master_secret` and move to
    /// `Established`. Used at handshake completion, where the session is
    /// still exclusively owned.
    pub(crate) fn install_established(
        &mut self,
        master_secret: Zeroizing<[u8; MASTER_SECRET_LEN]>,
        suite: CipherSuite,
    ) -> Result<()> {
        let keys = derive_traffic_keys(master_secret.as_ref());
        let (send_key, recv_key) = match self.role {
            Role::Initiator => (keys.initiator, keys.responder),
            Role::Responder => (keys.responder, keys.initiator),
        };
        let send_cipher = AeadCipher::new(suite, send_key.as_ref())?;
        let recv_cipher = AeadCipher::new(suite, recv_key.as_ref())?;

        let mut inner = lock(&self.inner);
        inner.suite = Some(suite);
        inner.master_secret = Some(master_secret);
        inner.send_cipher = Some(send_cipher);
        inner.recv_cipher = Some(recv_cipher);
        drop(inner);

        self.send_seq.store(0, SeqCst);
        lock(&self.replay).reset();
        self.reset_epoch();
        *lock(&self.established_at) = Some(Instant::now());
        self.set_state(SessionState::Established);
        self.touch();

        log::debug!(
            target: "quantide::session",
            "session {} established as {:?} with {:?}",
            hex::encode(&self.id[..8]), self.role, suite,
        );
        if let Some(observer) = &self.observer {
            observer.on_handshake_complete(suite);
        }
        Ok(())
    }

    /// Seal a control body (rekey) under the current send traffic cipher.
    pub(crate) fn seal_control(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut inner = lock(&self.inner);
        let cipher = inner.send_cipher.as_mut().ok_or(Error::InvalidState)?;
        cipher.seal(plaintext, &[])
    }

    /// Open a control body sealed under the peer's current traffic cipher.
    pub(crate) fn open_control(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        let inner = lock(&self.inner);
        let cipher = inner.recv_cipher.as_ref().ok_or(Error::InvalidState)?;
        cipher.open(sealed, &[])
    }

    /// Current master secret and suite, for ticket issuance and resumption
    /// export.
    pub(crate) fn keying(&self) -> Result<(Zeroizing<[u8; MASTER_SECRET_LEN]>, CipherSuite)> {
        let inner = lock(&self.inner);
        match (&inner.master_secret, inner.suite) {
            (Some(master), Some(suite)) => Ok((master.clone(), suite)),
            _ => Err(Error::InvalidState),
        }
    }

    /// True when any rekey trigger has tripped. Only meaningful on the
    /// initiator, which is the only side allowed to start a rekey.
    pub fn needs_rekey(&self) -> bool {
        if self.role != Role::Initiator || self.state() != SessionState::Established {
            return false;
        }
        if self.epoch_bytes_sent.load(SeqCst) >= self.config.max_bytes_before_rekey
            || self.epoch_packets_sent.load(SeqCst) >= self.config.max_packets_before_rekey
            || lock(&self.epoch_start).elapsed() >= self.config.max_session_duration
        {
            return true;
        }
        lock(&self.inner)
            .send_cipher
            .as_ref()
            .map(AeadCipher::needs_rekey)
            .unwrap_or(false)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn established_pair(suite: CipherSuite) -> (Session, Session) {
        let master = Zeroizing::new([0x33u8; MASTER_SECRET_LEN]);
        let mut initiator = Session::initiator(SessionConfig::default());
        let mut responder = Session::responder(SessionConfig::default());
        initiator
            .install_established(master.clone(), suite)
            .unwrap();
        responder.install_established(master, suite).unwrap();
        (initiator, responder)
    }

    #[test]
    fn encrypt_requires_established() {
        let session = Session::initiator(SessionConfig::default());
        assert!(matches!(session.encrypt(b"nope"), Err(Error::InvalidState)));
        assert!(matches!(
            session.decrypt(b"nope", 0),
            Err(Error::InvalidState)
        ));
    }

    #[test]
    fn peer_round_trip_both_suites() {
        for suite in [CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305] {
            let (initiator, responder) = established_pair(suite);
            let (sealed, seq) = initiator.encrypt(b"hello").unwrap();
            assert_eq!(responder.decrypt(&sealed, seq).unwrap(), b"hello");

            let (sealed, seq) = responder.encrypt(b"world").unwrap();
            assert_eq!(initiator.decrypt(&sealed, seq).unwrap(), b"world");
        }
    }

    #[test]
    fn own_records_do_not_decrypt() {
        let (initiator, _) = established_pair(CipherSuite::Aes256Gcm);
        let (sealed, seq) = initiator.encrypt(b"mirror").unwrap();
        assert!(matches!(
            initiator.decrypt(&sealed, seq),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn sequence_numbers_start_at_zero_and_increase() {
        let (initiator, _) = established_pair(CipherSuite::Aes256Gcm);
        for expected in 0..32u64 {
            let (_, seq) = initiator.encrypt(b"tick").unwrap();
            assert_eq!(seq, expected);
        }
    }

    #[test]
    fn replayed_record_rejected() {
        let (initiator, responder) = established_pair(CipherSuite::ChaCha20Poly1305);
        let (sealed, seq) = initiator.encrypt(b"once").unwrap();
        responder.decrypt(&sealed, seq).unwrap();
        assert!(matches!(
            responder.decrypt(&sealed, seq),
            Err(Error::ReplayDetected)
        ));
    }

    #[test]
    fn tampered_record_fails_and_session_survives() {
        let (initiator, responder) = established_pair(CipherSuite::Aes256Gcm);
        let (sealed, seq) = initiator.encrypt(b"payload").unwrap();
        let mut mangled = sealed.clone();
        let last = mangled.len() - 1;
        mangled[last] ^= 0x01;
        assert!(matches!(
            responder.decrypt(&mangled, seq),
            Err(Error::AuthenticationFailed)
        ));

        // The untampered record still decrypts: the failed open neither
        // burned the sequence slot nor disturbed the cipher.
        assert_eq!(responder.decrypt(&sealed, seq).unwrap(), b"payload");

        let (sealed, seq) = initiator.encrypt(b"next").unwrap();
        assert_eq!(responder.decrypt(&sealed, seq).unwrap(), b"next");
    }

    #[test]
    fn counters_track_plaintext_bytes() {
        let (initiator, responder) = established_pair(CipherSuite::Aes256Gcm);
        let message = b"Hello, quantum world!";
        let (sealed, seq) = initiator.encrypt(message).unwrap();
        responder.decrypt(&sealed, seq).unwrap();

        assert_eq!(initiator.stats().packets_sent, 1);
        assert_eq!(initiator.stats().bytes_sent, message.len() as u64);
        assert_eq!(responder.stats().packets_received, 1);
        assert_eq!(responder.stats().bytes_received, message.len() as u64);
    }

    #[test]
    fn close_is_idempotent_and_wipes_keys() {
        let (initiator, _) = established_pair(CipherSuite::Aes256Gcm);
        initiator.close();
        assert_eq!(initiator.state(), SessionState::Closed);
        initiator.close();
        assert_eq!(initiator.state(), SessionState::Closed);
        assert!(matches!(
            initiator.encrypt(b"late"),
            Err(Error::InvalidState)
        ));
        assert!(matches!(initiator.keying(), Err(Error::InvalidState)));
    }

    #[test]
    fn role_and_id_accessors() {
        let session = Session::responder(SessionConfig::default());
        assert_eq!(session.role(), Role::Responder);
        assert_eq!(session.state(), SessionState::New);
        assert_eq!(session.id().len(), SESSION_ID_LEN);
        assert!(session.negotiated_suite().is_none());
    }
}
