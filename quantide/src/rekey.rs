//! In-band rekeying: fresh traffic keys without tearing the session down.
//!
//! Only the initiator starts a rekey. It sends its fresh hybrid public key
//! and an activation sequence a little past its current send counter; the
//! responder encapsulates and answers with the KEM ciphertext. Each side
//! keeps the derived ciphers pending until the activation boundary: the
//! initiator swaps on the send path at the first `seq >= activation_seq`,
//! the responder swaps both directions on the receive path when such a
//! record arrives. Records never straddle a key change because the send
//! counter is continuous and the switch happens exactly at the boundary.
//!
//! A responder must not push its own send sequence past the
//! initiator-declared activation sequence before it has observed the
//! initiator's first record at that threshold; its outbound cipher swaps
//! only in the receive path.

use zeroize::Zeroizing;

use wire::RekeyBody;

use crate::aead::AeadCipher;
use crate::constants::{MASTER_SECRET_LEN, REKEY_ACTIVATION_OFFSET};
use crate::error::{Error, Result};
use crate::kem;
use crate::key_schedule::derive_traffic_keys;
use crate::session::{lock, Role, Session, SessionInner, SessionState};

/// Pending key material while a rekey is in flight. At most one exists per
/// session; the keypair half only on the initiator.
pub(crate) struct RekeyState {
    pub(crate) keypair: Option<kem::KeyPair>,
    pub(crate) pending_send: Option<AeadCipher>,
    pub(crate) pending_recv: Option<AeadCipher>,
    pub(crate) pending_master: Option<Zeroizing<[u8; MASTER_SECRET_LEN]>>,
    pub(crate) activation_seq: u64,
}

impl Session {
    /// Initiator: begin a rekey. Returns the offer body to seal and send.
    pub(crate) fn start_rekey(&self) -> Result<RekeyBody> {
        if self.role() != Role::Initiator {
            return Err(Error::InvalidState);
        }
        match self.state() {
            SessionState::Established => {}
            SessionState::Rekeying => return Err(Error::RekeyInProgress),
            _ => return Err(Error::InvalidState),
        }

        let mut inner = lock(&self.inner);
        if inner.rekey.is_some() {
            return Err(Error::RekeyInProgress);
        }
        let keypair = kem::generate_keypair()?;
        let public_key = keypair.public.to_bytes();
        let activation_seq =
            self.send_seq.load(std::sync::atomic::Ordering::SeqCst) + REKEY_ACTIVATION_OFFSET;
        inner.rekey = Some(RekeyState {
            keypair: Some(keypair),
            pending_send: None,
            pending_recv: None,
            pending_master: None,
            activation_seq,
        });
        drop(inner);

        self.set_state(SessionState::Rekeying);
        log::debug!(
            target: "quantide::rekey",
            "session {} rekey offered, activation at seq {}",
            hex::encode(&self.id()[..8]), activation_seq,
        );
        if let Some(observer) = self.observer() {
            observer.on_rekey_start();
        }
        Ok(RekeyBody {
            key_or_ct: public_key,
            activation_seq,
        })
    }

    /// Responder: process an incoming rekey offer and produce the answer.
    pub(crate) fn handle_rekey_offer(&self, body: &RekeyBody) -> Result<RekeyBody> {
        if self.role() != Role::Responder {
            return Err(Error::InvalidMessage("rekey offer at initiator"));
        }
        match self.state() {
            SessionState::Established => {}
            SessionState::Rekeying => return Err(Error::RekeyInProgress),
            _ => return Err(Error::InvalidState),
        }

        let mut inner = lock(&self.inner);
        if inner.rekey.is_some() {
            return Err(Error::RekeyInProgress);
        }
        let suite = inner.suite.ok_or(Error::InvalidState)?;

        let public_key = kem::PublicKey::from_bytes(&body.key_or_ct)?;
        let (ciphertext, master) = kem::encapsulate(&public_key)?;
        let keys = derive_traffic_keys(master.as_ref());
        inner.rekey = Some(RekeyState {
            keypair: None,
            pending_send: Some(AeadCipher::new(suite, keys.responder.as_ref())?),
            pending_recv: Some(AeadCipher::new(suite, keys.initiator.as_ref())?),
            pending_master: Some(master),
            activation_seq: body.activation_seq,
        });
        drop(inner);

        self.set_state(SessionState::Rekeying);
        log::debug!(
            target: "quantide::rekey",
            "session {} rekey answered, activation at seq {}",
            hex::encode(&self.id()[..8]), body.activation_seq,
        );
        if let Some(observer) = self.observer() {
            observer.on_rekey_start();
        }
        Ok(RekeyBody {
            key_or_ct: ciphertext.to_bytes(),
            activation_seq: body.activation_seq,
        })
    }

    /// Initiator: process the responder's answer, deriving the pending
    /// ciphers. Activation still waits for the send path to cross the
    /// boundary.
    pub(crate) fn handle_rekey_response(&self, body: &RekeyBody) -> Result<()> {
        if self.role() != Role::Initiator {
            return Err(Error::InvalidMessage("rekey answer at responder"));
        }

        let mut inner = lock(&self.inner);
        let suite = inner.suite.ok_or(Error::InvalidState)?;
        let rekey = inner
            .rekey
            .as_mut()
            .ok_or(Error::InvalidMessage("unsolicited rekey answer"))?;
        if body.activation_seq != rekey.activation_seq {
            return Err(Error::InvalidMessage("rekey activation mismatch"));
        }
        let keypair = rekey
            .keypair
            .take()
            .ok_or(Error::InvalidMessage("duplicate rekey answer"))?;

        let ciphertext = kem::Ciphertext::from_bytes(&body.key_or_ct)?;
        let master = kem::decapsulate(&ciphertext, &keypair)?;
        let keys = derive_traffic_keys(master.as_ref());
        rekey.pending_send = Some(AeadCipher::new(suite, keys.initiator.as_ref())?);
        rekey.pending_recv = Some(AeadCipher::new(suite, keys.responder.as_ref())?);
        rekey.pending_master = Some(master);

        log::debug!(
            target: "quantide::rekey",
            "session {} pending keys ready", hex::encode(&self.id()[..8]),
        );
        Ok(())
    }

    /// Swap in the pending ciphers once `seq` reaches the activation
    /// boundary. Runs under the session lock on the initiator's send path
    /// and the responder's receive path.
    pub(crate) fn activate_if_due(&self, inner: &mut SessionInner, seq: u64) {
        let due = inner.rekey.as_ref().is_some_and(|rekey| {
            seq >= rekey.activation_seq
                && rekey.pending_send.is_some()
                && rekey.pending_recv.is_some()
        });
        if !due {
            return;
        }
        if let Some(rekey) = inner.rekey.take() {
            inner.send_cipher = rekey.pending_send;
            inner.recv_cipher = rekey.pending_recv;
            inner.master_secret = rekey.pending_master;
        }
        lock(&self.replay).reset();
        self.reset_epoch();
        self.set_state(SessionState::Established);

        log::debug!(
            target: "quantide::rekey",
            "session {} traffic keys activated at seq {}",
            hex::encode(&self.id()[..8]), seq,
        );
        if let Some(observer) = self.observer() {
            observer.on_rekey_complete();
        }
    }
}
