//! The handshake state machine.
//!
//! The initiator drives: ClientHello carries its ephemeral hybrid public key
//! and suite preferences; the responder encapsulates and answers with the
//! KEM ciphertext and the selected suite; both sides derive handshake keys
//! from the shared secret and prove agreement with Finished records sealed
//! under those keys, each bound to the transcript at its own emission. Any
//! failure is fatal: a best-effort alert goes out and the session closes.
//!
//! Resumption rides the same flights. The initiator puts its ticket blob in
//! the ClientHello session-id slot; a responder that accepts answers with an
//! empty ciphertext and the ticket's suite, and the Finished exchange then
//! proves both sides hold the resumed master secret without a KEM round.

use std::io::{Read, Write};

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use wire::{write_message, Alert, ClientHello, Message, ServerHello};

use crate::aead::AeadCipher;
use crate::constants::MASTER_SECRET_LEN;
use crate::error::{Error, Result};
use crate::kem;
use crate::key_schedule::{
    derive_handshake_keys, derive_key, LABEL_CLIENT_FINISHED, LABEL_SERVER_FINISHED,
};
use crate::session::{Role, Session, SessionState};
use crate::ticket::{Resumption, TicketManager};

const VERIFY_DATA_LEN: usize = 32;

impl Session {
    /// Run the initiator side of a fresh handshake over `stream`.
    pub fn initiate_handshake<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        self.expect_role(Role::Initiator)?;
        self.begin_handshake()?;
        match self.run_initiator(stream, None) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail_handshake(stream, err)),
        }
    }

    /// Run the initiator side, attempting resumption with a previously
    /// exported ticket. Falls back to the full KEM round transparently when
    /// the responder declines the ticket.
    pub fn initiate_resumption<S: Read + Write>(
        &mut self,
        stream: &mut S,
        resumption: &Resumption,
    ) -> Result<()> {
        self.expect_role(Role::Initiator)?;
        self.begin_handshake()?;
        match self.run_initiator(stream, Some(resumption)) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail_handshake(stream, err)),
        }
    }

    /// Run the responder side of a handshake over `stream`.
    pub fn respond_handshake<S: Read + Write>(&mut self, stream: &mut S) -> Result<()> {
        self.expect_role(Role::Responder)?;
        self.begin_handshake()?;
        match self.run_responder(stream, None) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail_handshake(stream, err)),
        }
    }

    /// Responder side with ticket support: incoming resumption tickets are
    /// decrypted with `tickets` and accepted when valid.
    pub fn respond_handshake_with_tickets<S: Read + Write>(
        &mut self,
        stream: &mut S,
        tickets: &TicketManager,
    ) -> Result<()> {
        self.expect_role(Role::Responder)?;
        self.begin_handshake()?;
        match self.run_responder(stream, Some(tickets)) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail_handshake(stream, err)),
        }
    }

    fn expect_role(&self, role: Role) -> Result<()> {
        if self.role() == role {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    fn begin_handshake(&mut self) -> Result<()> {
        if self.state() != SessionState::New {
            return Err(Error::InvalidState);
        }
        self.set_state(SessionState::Handshaking);
        log::debug!(
            target: "quantide::handshake",
            "session {} handshake started as {:?}",
            hex::encode(&self.id()[..8]), self.role(),
        );
        if let Some(observer) = self.observer() {
            observer.on_session_start(self.id(), self.role());
            observer.on_handshake_start(self.role());
        }
        Ok(())
    }

    // Best-effort fatal alert, then close. Returns the original error so the
    // call sites stay one-liners.
    fn fail_handshake<S: Read + Write>(&mut self, stream: &mut S, err: Error) -> Error {
        if !matches!(err, Error::AlertReceived { .. }) {
            let alert = Alert::fatal(err.alert_code(), err.to_string());
            let _ = write_message(stream, &Message::Alert(alert));
        }
        log::warn!(
            target: "quantide::handshake",
            "session {} handshake failed: {}", hex::encode(&self.id()[..8]), err,
        );
        if let Some(observer) = self.observer() {
            observer.on_session_failed(self.id(), &err);
        }
        self.close();
        err
    }

    fn run_initiator<S: Read + Write>(
        &mut self,
        stream: &mut S,
        resumption: Option<&Resumption>,
    ) -> Result<()> {
        let mut transcript: Zeroizing<Vec<u8>> = Zeroizing::new(Vec::new());

        // Flight 1: ClientHello with a fresh ephemeral hybrid key. The key
        // goes out even on a resumption attempt so the responder can fall
        // back to the full KEM round.
        let keypair = kem::generate_keypair()?;
        let mut random = [0u8; 32];
        OsRng.fill_bytes(&mut random);
        let hello = Message::ClientHello(ClientHello {
            version: self.config.version,
            random,
            session_id: resumption.map(|r| r.ticket.clone()).unwrap_or_default(),
            public_key: keypair.public.to_bytes(),
            suites: self.config.suites.clone(),
        });
        let hello_bytes = hello.encode();
        stream.write_all(&hello_bytes)?;
        stream.flush()?;
        transcript.extend_from_slice(&hello_bytes);
        random.zeroize();

        // Flight 2: ServerHello.
        let (message, hello_bytes) = read_handshake_message(stream)?;
        let server_hello = match message {
            Message::ServerHello(hello) => hello,
            _ => return Err(Error::InvalidMessage("expected server hello")),
        };
        if server_hello.version != self.config.version {
            return Err(Error::UnsupportedVersion(server_hello.version));
        }
        if !self.config.suites.contains(&server_hello.suite) {
            return Err(Error::UnsupportedCipherSuite);
        }
        transcript.extend_from_slice(&hello_bytes);

        // Both sides share the responder-assigned session id from here on.
        self.set_id(server_hello.session_id);
        let suite = server_hello.suite;

        let master: Zeroizing<[u8; MASTER_SECRET_LEN]> = if server_hello.ciphertext.is_empty() {
            // Responder accepted our ticket; resume from the saved secret.
            let resumption =
                resumption.ok_or(Error::HandshakeFailed("unsolicited resumption"))?;
            if suite != resumption.suite() {
                return Err(Error::HandshakeFailed("resumed suite mismatch"));
            }
            log::debug!(
                target: "quantide::handshake",
                "session {} resuming without KEM round", hex::encode(&self.id()[..8]),
            );
            resumption.master_secret.clone()
        } else {
            let ciphertext = kem::Ciphertext::from_bytes(&server_hello.ciphertext)?;
            kem::decapsulate(&ciphertext, &keypair)?
        };

        // Handshake keys and the Finished exchange.
        let keys = derive_handshake_keys(master.as_ref());
        let mut send_cipher =
            AeadCipher::with_iv_salt(suite, keys.initiator_key.as_ref(), keys.initiator_iv)?;
        let recv_cipher =
            AeadCipher::with_iv_salt(suite, keys.responder_key.as_ref(), keys.responder_iv)?;

        let client_verify = derive_key(
            master.as_ref(),
            LABEL_CLIENT_FINISHED,
            &transcript,
            VERIFY_DATA_LEN,
        );
        let sealed = send_cipher.seal(&client_verify, &[])?;
        write_message(stream, &Message::ClientFinished { sealed })?;
        transcript.extend_from_slice(&client_verify);

        let (message, _) = read_handshake_message(stream)?;
        let sealed = match message {
            Message::ServerFinished { sealed } => sealed,
            _ => return Err(Error::InvalidMessage("expected server finished")),
        };
        let server_verify = Zeroizing::new(recv_cipher.open(&sealed, &[])?);
        let expected = derive_key(
            master.as_ref(),
            LABEL_SERVER_FINISHED,
            &transcript,
            VERIFY_DATA_LEN,
        );
        if server_verify.len() != VERIFY_DATA_LEN
            || !bool::from(server_verify.as_slice().ct_eq(&expected))
        {
            return Err(Error::HandshakeFailed("server verify mismatch"));
        }

        self.install_established(master, suite)
    }

    fn run_responder<S: Read + Write>(
        &mut self,
        stream: &mut S,
        tickets: Option<&TicketManager>,
    ) -> Result<()> {
        let mut transcript: Zeroizing<Vec<u8>> = Zeroizing::new(Vec::new());

        // Flight 1: ClientHello.
        let (message, hello_bytes) = read_handshake_message(stream)?;
        let client_hello = match message {
            Message::ClientHello(hello) => hello,
            _ => return Err(Error::InvalidMessage("expected client hello")),
        };
        if client_hello.version != self.config.version {
            return Err(Error::UnsupportedVersion(client_hello.version));
        }
        transcript.extend_from_slice(&hello_bytes);

        // Accept the initiator's first offer we support.
        let negotiated = client_hello
            .suites
            .iter()
            .copied()
            .find(|suite| self.config.suites.contains(suite))
            .ok_or(Error::UnsupportedCipherSuite)?;

        // Resumption: a non-empty session id is a ticket blob. Any failure
        // to use it falls back to the full KEM round.
        let mut resumed: Option<Zeroizing<[u8; MASTER_SECRET_LEN]>> = None;
        let mut suite = negotiated;
        if let Some(manager) = tickets {
            if !client_hello.session_id.is_empty() {
                match manager.decrypt_ticket(&client_hello.session_id) {
                    Ok(ticket)
                        if client_hello.suites.contains(&ticket.suite)
                            && self.config.suites.contains(&ticket.suite) =>
                    {
                        suite = ticket.suite;
                        resumed = Some(ticket.master_secret);
                    }
                    Ok(_) => {
                        log::debug!(
                            target: "quantide::handshake",
                            "ticket suite no longer offered, full handshake",
                        );
                    }
                    Err(err) => {
                        log::debug!(
                            target: "quantide::handshake",
                            "ticket rejected ({}), full handshake", err,
                        );
                    }
                }
            }
        }

        let (master, ciphertext_bytes) = match resumed {
            Some(master) => {
                log::debug!(
                    target: "quantide::handshake",
                    "session {} resuming without KEM round", hex::encode(&self.id()[..8]),
                );
                (master, Vec::new())
            }
            None => {
                // The initiator's public key is only needed until the
                // encapsulation; it is dropped with this scope.
                let public_key = kem::PublicKey::from_bytes(&client_hello.public_key)?;
                let (ciphertext, shared) = kem::encapsulate(&public_key)?;
                (shared, ciphertext.to_bytes())
            }
        };

        // Flight 2: ServerHello carrying our session id.
        let mut random = [0u8; 32];
        OsRng.fill_bytes(&mut random);
        let hello = Message::ServerHello(ServerHello {
            version: self.config.version,
            random,
            session_id: *self.id(),
            ciphertext: ciphertext_bytes,
            suite,
        });
        let hello_bytes = hello.encode();
        stream.write_all(&hello_bytes)?;
        stream.flush()?;
        transcript.extend_from_slice(&hello_bytes);
        random.zeroize();

        let keys = derive_handshake_keys(master.as_ref());
        let mut send_cipher =
            AeadCipher::with_iv_salt(suite, keys.responder_key.as_ref(), keys.responder_iv)?;
        let recv_cipher =
            AeadCipher::with_iv_salt(suite, keys.initiator_key.as_ref(), keys.initiator_iv)?;

        // Flight 3: ClientFinished proves the initiator derived the same
        // secret over the same transcript.
        let (message, _) = read_handshake_message(stream)?;
        let sealed = match message {
            Message::ClientFinished { sealed } => sealed,
            _ => return Err(Error::InvalidMessage("expected client finished")),
        };
        let client_verify = Zeroizing::new(recv_cipher.open(&sealed, &[])?);
        let expected = derive_key(
            master.as_ref(),
            LABEL_CLIENT_FINISHED,
            &transcript,
            VERIFY_DATA_LEN,
        );
        if client_verify.len() != VERIFY_DATA_LEN
            || !bool::from(client_verify.as_slice().ct_eq(&expected))
        {
            return Err(Error::HandshakeFailed("client verify mismatch"));
        }
        transcript.extend_from_slice(&client_verify);

        // Flight 4: ServerFinished over the transcript including the
        // client's verify data.
        let server_verify = derive_key(
            master.as_ref(),
            LABEL_SERVER_FINISHED,
            &transcript,
            VERIFY_DATA_LEN,
        );
        let sealed = send_cipher.seal(&server_verify, &[])?;
        write_message(stream, &Message::ServerFinished { sealed })?;

        self.install_established(master, suite)
    }
}

// Read one handshake frame, returning the decoded message together with the
// exact bytes that crossed the wire (the transcript hashes those). A peer
// alert surfaces as the error it announces.
fn read_handshake_message<S: Read>(stream: &mut S) -> Result<(Message, Vec<u8>)> {
    let (msg_type, payload) = wire::read_frame(stream)?;
    let message = match Message::decode(msg_type, &payload)? {
        Message::Alert(alert) => {
            return Err(Error::AlertReceived {
                level: alert.level,
                code: alert.code,
                description: alert.description,
            })
        }
        message => message,
    };

    let mut raw = Vec::with_capacity(wire::HEADER_SIZE + payload.len());
    raw.push(msg_type);
    raw.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    raw.extend_from_slice(&payload);
    Ok((message, raw))
}
