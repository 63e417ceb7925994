//! Framed transport over an established session.
//!
//! A `Tunnel` wraps the two halves of a reliable byte stream around a
//! `Session`. Writes are serialized by a mutex so frames never interleave;
//! reads happen one message at a time and dispatch by type: data records go
//! to the caller, pings are answered in place, rekey records drive the
//! session's rekey machine, close and fatal alerts tear the tunnel down.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wire::{read_message, write_message, Alert, AlertLevel, CipherSuite, Message, RekeyBody};

use crate::config::TransportConfig;
use crate::constants::{CLOSE_NOTIFY_TIMEOUT, MAX_PAYLOAD_SIZE};
use crate::error::{Error, Result};
use crate::session::{lock, Role, Session, SessionState, SessionStats};

pub struct Tunnel<R: Read, W: Write> {
    session: Arc<Session>,
    reader: Mutex<R>,
    writer: Mutex<W>,
    closed: AtomicBool,
    // Present when built from a TcpStream; lets close() cancel an in-flight
    // blocking read by shutting the socket down.
    raw: Option<TcpStream>,
}

impl<R: Read, W: Write> Tunnel<R, W> {
    /// Wrap an established session around a read half and a write half.
    pub fn new(reader: R, writer: W, session: Session) -> Result<Self> {
        if session.state() != SessionState::Established {
            return Err(Error::InvalidState);
        }
        Ok(Tunnel {
            session: Arc::new(session),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: AtomicBool::new(false),
            raw: None,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn session_id(&self) -> [u8; 32] {
        *self.session.id()
    }

    pub fn negotiated_suite(&self) -> Option<CipherSuite> {
        self.session.negotiated_suite()
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(SeqCst) || self.session.state() == SessionState::Closed {
            return Err(Error::TunnelClosed);
        }
        Ok(())
    }

    fn write_frame(&self, message: &Message) -> Result<()> {
        let mut writer = lock(&self.writer);
        write_message(&mut *writer, message)?;
        Ok(())
    }

    // Fatal conditions: stop both directions and drop the keys.
    fn shutdown(&self) {
        self.closed.store(true, SeqCst);
        if let Some(raw) = &self.raw {
            let _ = raw.shutdown(Shutdown::Both);
        }
        self.session.close();
    }

    /// Encrypt and send one data record.
    ///
    /// After a successful send the initiator evaluates the rekey triggers
    /// and starts a rekey when one has tripped.
    pub fn send(&self, plaintext: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if plaintext.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::MessageTooLarge);
        }

        let (ciphertext, seq) = match self.session.encrypt(plaintext) {
            Ok(record) => record,
            Err(Error::NonceExhausted) => {
                // The initiator can repair this in-band; the responder has
                // to wait for it to happen.
                if self.session.role() == Role::Initiator
                    && !self.session.is_rekey_in_progress()
                {
                    self.send_rekey()?;
                }
                return Err(Error::RekeyRequired);
            }
            Err(err) => return Err(err),
        };
        self.write_frame(&Message::Data { seq, ciphertext })?;

        if self.session.role() == Role::Initiator
            && self.session.needs_rekey()
            && !self.session.is_rekey_in_progress()
        {
            self.send_rekey()?;
        }
        Ok(())
    }

    /// Read until a data record arrives and return its plaintext. Control
    /// traffic (ping, pong, rekey) is handled transparently.
    ///
    /// `AuthenticationFailed` and `ReplayDetected` are surfaced per record;
    /// the tunnel stays open and the next `receive` reads on.
    pub fn receive(&self) -> Result<Vec<u8>> {
        loop {
            self.ensure_open()?;
            let message = {
                let mut reader = lock(&self.reader);
                match read_message(&mut *reader) {
                    Ok(message) => message,
                    Err(wire::Error::MessageTooLarge(len)) => {
                        // No way to resynchronize a stream past a frame we
                        // refuse to read.
                        drop(reader);
                        self.shutdown();
                        log::error!(
                            target: "quantide::tunnel",
                            "peer announced {} byte frame, closing", len,
                        );
                        return Err(Error::MessageTooLarge);
                    }
                    Err(err) => return Err(err.into()),
                }
            };

            match message {
                Message::Data { seq, ciphertext } => {
                    return self.session.decrypt(&ciphertext, seq);
                }
                Message::Ping => {
                    self.write_frame(&Message::Pong)?;
                    self.session.touch();
                }
                Message::Pong => {
                    self.session.touch();
                }
                Message::Close => {
                    log::debug!(target: "quantide::tunnel", "peer closed the tunnel");
                    self.shutdown();
                    return Err(Error::TunnelClosed);
                }
                Message::Rekey { sealed } => self.handle_rekey(&sealed)?,
                Message::Alert(alert) => return Err(self.handle_alert(alert)),
                _ => {
                    let err = Error::InvalidMessage("handshake message on established tunnel");
                    if let Some(observer) = self.session.observer() {
                        observer.on_protocol_error(&err);
                    }
                    return Err(err);
                }
            }
        }
    }

    fn handle_alert(&self, alert: Alert) -> Error {
        if alert.is_close_notify() {
            log::debug!(target: "quantide::tunnel", "close_notify from peer");
            self.shutdown();
            return Error::TunnelClosed;
        }
        let err = Error::AlertReceived {
            level: alert.level,
            code: alert.code,
            description: alert.description,
        };
        if alert.level == AlertLevel::Fatal {
            self.shutdown();
        } else if let Some(observer) = self.session.observer() {
            observer.on_protocol_error(&err);
        }
        err
    }

    fn handle_rekey(&self, sealed: &[u8]) -> Result<()> {
        let plaintext = self.session.open_control(sealed)?;
        let body = RekeyBody::decode(&plaintext)?;
        match self.session.role() {
            Role::Responder => {
                let answer = self.session.handle_rekey_offer(&body)?;
                let sealed = self.session.seal_control(&answer.encode())?;
                self.write_frame(&Message::Rekey { sealed })?;
            }
            Role::Initiator => self.session.handle_rekey_response(&body)?,
        }
        Ok(())
    }

    /// Send a keepalive probe. The peer answers inside its `receive`.
    pub fn send_ping(&self) -> Result<()> {
        self.ensure_open()?;
        self.write_frame(&Message::Ping)
    }

    /// Initiator only: start an in-band rekey now.
    pub fn send_rekey(&self) -> Result<()> {
        self.ensure_open()?;
        let offer = self.session.start_rekey()?;
        let sealed = self.session.seal_control(&offer.encode())?;
        self.write_frame(&Message::Rekey { sealed })
    }

    /// Close the tunnel: best-effort close_notify under a short deadline,
    /// then shut the stream down and wipe the session. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, SeqCst) {
            return Ok(());
        }
        if let Some(raw) = &self.raw {
            let _ = raw.set_write_timeout(Some(CLOSE_NOTIFY_TIMEOUT));
        }
        {
            let mut writer = lock(&self.writer);
            let _ = write_message(&mut *writer, &Message::Alert(Alert::close_notify()));
        }
        if let Some(raw) = &self.raw {
            let _ = raw.shutdown(Shutdown::Both);
        }
        self.session.close();
        log::debug!(
            target: "quantide::tunnel",
            "tunnel {} closed", hex::encode(&self.session_id()[..8]),
        );
        Ok(())
    }
}

impl Tunnel<TcpStream, TcpStream> {
    /// Build a tunnel over a TCP stream, applying the configured deadlines.
    /// A zero timeout disables the deadline.
    pub fn from_tcp(stream: TcpStream, session: Session, config: &TransportConfig) -> Result<Self> {
        fn deadline(d: Duration) -> Option<Duration> {
            if d.is_zero() {
                None
            } else {
                Some(d)
            }
        }
        stream.set_read_timeout(deadline(config.read_timeout))?;
        stream.set_write_timeout(deadline(config.write_timeout))?;
        let reader = stream.try_clone()?;
        let raw = stream.try_clone()?;
        let mut tunnel = Self::new(reader, stream, session)?;
        tunnel.raw = Some(raw);
        Ok(tunnel)
    }
}

impl<R: Read, W: Write> Drop for Tunnel<R, W> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
