use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use crate::{Alert, AlertCode, AlertLevel, CipherSuite, Error};

// Message type bytes. Handshake types sit below 0x10, post-establishment
// record types at 0x10 and above.
const MSG_CLIENT_HELLO: u8 = 0x01;
const MSG_SERVER_HELLO: u8 = 0x02;
const MSG_CLIENT_FINISHED: u8 = 0x03;
const MSG_SERVER_FINISHED: u8 = 0x04;
const MSG_DATA: u8 = 0x10;
const MSG_PING: u8 = 0x11;
const MSG_PONG: u8 = 0x12;
const MSG_CLOSE: u8 = 0x13;
const MSG_REKEY: u8 = 0x14;
const MSG_ALERT: u8 = 0x15;

/// First flight of the handshake, initiator to responder.
///
/// `session_id` doubles as the resumption slot: empty on a fresh handshake,
/// an opaque ticket blob when the initiator attempts to resume.
#[derive(Clone, Eq, PartialEq)]
pub struct ClientHello {
    pub version: u16,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub public_key: Vec<u8>,
    pub suites: Vec<CipherSuite>,
}

impl fmt::Debug for ClientHello {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientHello")
            .field("version", &self.version)
            .field("random", &hex::encode(self.random))
            .field("session_id_len", &self.session_id.len())
            .field("public_key_len", &self.public_key.len())
            .field("suites", &self.suites)
            .finish()
    }
}

/// Second flight, responder to initiator.
///
/// An empty `ciphertext` signals that the responder accepted the initiator's
/// resumption ticket and no KEM round happened.
#[derive(Clone, Eq, PartialEq)]
pub struct ServerHello {
    pub version: u16,
    pub random: [u8; 32],
    pub session_id: [u8; 32],
    pub ciphertext: Vec<u8>,
    pub suite: CipherSuite,
}

impl fmt::Debug for ServerHello {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ServerHello")
            .field("version", &self.version)
            .field("random", &hex::encode(self.random))
            .field("session_id", &hex::encode(self.session_id))
            .field("ciphertext_len", &self.ciphertext.len())
            .field("suite", &self.suite)
            .finish()
    }
}

/// Plaintext body of a rekey record, sealed under the sender's current
/// traffic key before it goes on the wire. Carries the initiator's fresh
/// public key on the offer and the responder's KEM ciphertext on the answer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RekeyBody {
    pub key_or_ct: Vec<u8>,
    pub activation_seq: u64,
}

impl RekeyBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.key_or_ct.len() + 8);
        let mut len = [0u8; 2];
        BigEndian::write_u16(&mut len, self.key_or_ct.len() as u16);
        out.extend_from_slice(&len);
        out.extend_from_slice(&self.key_or_ct);
        let mut seq = [0u8; 8];
        BigEndian::write_u64(&mut seq, self.activation_seq);
        out.extend_from_slice(&seq);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let mut dec = Decoder::new(buf, "rekey");
        let len = dec.u16()? as usize;
        let key_or_ct = dec.bytes(len)?.to_vec();
        let activation_seq = dec.u64()?;
        dec.finish()?;
        Ok(RekeyBody {
            key_or_ct,
            activation_seq,
        })
    }
}

/// A fully decoded protocol message.
///
/// The `sealed` fields of the finished and rekey variants hold the AEAD
/// output (nonce, ciphertext, tag); sealing and opening are the engine's
/// business, the codec only delimits the blob.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Message {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    ClientFinished { sealed: Vec<u8> },
    ServerFinished { sealed: Vec<u8> },
    Data { seq: u64, ciphertext: Vec<u8> },
    Ping,
    Pong,
    Close,
    Rekey { sealed: Vec<u8> },
    Alert(Alert),
}

impl Message {
    pub fn msg_type(&self) -> u8 {
        match self {
            Message::ClientHello(_) => MSG_CLIENT_HELLO,
            Message::ServerHello(_) => MSG_SERVER_HELLO,
            Message::ClientFinished { .. } => MSG_CLIENT_FINISHED,
            Message::ServerFinished { .. } => MSG_SERVER_FINISHED,
            Message::Data { .. } => MSG_DATA,
            Message::Ping => MSG_PING,
            Message::Pong => MSG_PONG,
            Message::Close => MSG_CLOSE,
            Message::Rekey { .. } => MSG_REKEY,
            Message::Alert(_) => MSG_ALERT,
        }
    }

    /// Encode the message with its 5-byte header prepended.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.encode_payload();
        let mut out = Vec::with_capacity(crate::HEADER_SIZE + payload.len());
        out.push(self.msg_type());
        let mut len = [0u8; 4];
        BigEndian::write_u32(&mut len, payload.len() as u32);
        out.extend_from_slice(&len);
        out.extend_from_slice(&payload);
        out
    }

    fn encode_payload(&self) -> Vec<u8> {
        match self {
            Message::ClientHello(hello) => {
                let mut out = Vec::new();
                let mut version = [0u8; 2];
                BigEndian::write_u16(&mut version, hello.version);
                out.extend_from_slice(&version);
                out.extend_from_slice(&hello.random);
                out.push(hello.session_id.len() as u8);
                out.extend_from_slice(&hello.session_id);
                let mut pk_len = [0u8; 2];
                BigEndian::write_u16(&mut pk_len, hello.public_key.len() as u16);
                out.extend_from_slice(&pk_len);
                out.extend_from_slice(&hello.public_key);
                out.push(hello.suites.len() as u8);
                for suite in &hello.suites {
                    let mut id = [0u8; 2];
                    BigEndian::write_u16(&mut id, suite.id());
                    out.extend_from_slice(&id);
                }
                out
            }
            Message::ServerHello(hello) => {
                let mut out = Vec::new();
                let mut version = [0u8; 2];
                BigEndian::write_u16(&mut version, hello.version);
                out.extend_from_slice(&version);
                out.extend_from_slice(&hello.random);
                out.extend_from_slice(&hello.session_id);
                let mut ct_len = [0u8; 2];
                BigEndian::write_u16(&mut ct_len, hello.ciphertext.len() as u16);
                out.extend_from_slice(&ct_len);
                out.extend_from_slice(&hello.ciphertext);
                let mut id = [0u8; 2];
                BigEndian::write_u16(&mut id, hello.suite.id());
                out.extend_from_slice(&id);
                out
            }
            Message::ClientFinished { sealed }
            | Message::ServerFinished { sealed }
            | Message::Rekey { sealed } => {
                let mut out = Vec::with_capacity(4 + sealed.len());
                let mut len = [0u8; 4];
                BigEndian::write_u32(&mut len, sealed.len() as u32);
                out.extend_from_slice(&len);
                out.extend_from_slice(sealed);
                out
            }
            Message::Data { seq, ciphertext } => {
                let mut out = Vec::with_capacity(8 + ciphertext.len());
                let mut seq_bytes = [0u8; 8];
                BigEndian::write_u64(&mut seq_bytes, *seq);
                out.extend_from_slice(&seq_bytes);
                out.extend_from_slice(ciphertext);
                out
            }
            Message::Ping | Message::Pong | Message::Close => Vec::new(),
            Message::Alert(alert) => {
                let desc = alert.description.as_bytes();
                let mut out = Vec::with_capacity(5 + desc.len());
                out.push(alert.level.code());
                let mut code = [0u8; 2];
                BigEndian::write_u16(&mut code, alert.code.id());
                out.extend_from_slice(&code);
                let mut desc_len = [0u8; 2];
                BigEndian::write_u16(&mut desc_len, desc.len() as u16);
                out.extend_from_slice(&desc_len);
                out.extend_from_slice(desc);
                out
            }
        }
    }

    /// Decode a payload for the given type byte. The whole payload must be
    /// consumed; trailing bytes mean a malformed message.
    pub fn decode(msg_type: u8, payload: &[u8]) -> Result<Message, Error> {
        match msg_type {
            MSG_CLIENT_HELLO => {
                let mut dec = Decoder::new(payload, "client hello");
                let version = dec.u16()?;
                let random = dec.array32()?;
                let session_id_len = dec.u8()? as usize;
                let session_id = dec.bytes(session_id_len)?.to_vec();
                let pk_len = dec.u16()? as usize;
                let public_key = dec.bytes(pk_len)?.to_vec();
                let suites_count = dec.u8()? as usize;
                let mut suites = Vec::with_capacity(suites_count);
                for _ in 0..suites_count {
                    suites.push(CipherSuite::from_id(dec.u16()?)?);
                }
                dec.finish()?;
                Ok(Message::ClientHello(ClientHello {
                    version,
                    random,
                    session_id,
                    public_key,
                    suites,
                }))
            }
            MSG_SERVER_HELLO => {
                let mut dec = Decoder::new(payload, "server hello");
                let version = dec.u16()?;
                let random = dec.array32()?;
                let session_id = dec.array32()?;
                let ct_len = dec.u16()? as usize;
                let ciphertext = dec.bytes(ct_len)?.to_vec();
                let suite = CipherSuite::from_id(dec.u16()?)?;
                dec.finish()?;
                Ok(Message::ServerHello(ServerHello {
                    version,
                    random,
                    session_id,
                    ciphertext,
                    suite,
                }))
            }
            MSG_CLIENT_FINISHED => {
                let sealed = decode_sealed(payload, "client finished")?;
                Ok(Message::ClientFinished { sealed })
            }
            MSG_SERVER_FINISHED => {
                let sealed = decode_sealed(payload, "server finished")?;
                Ok(Message::ServerFinished { sealed })
            }
            MSG_DATA => {
                let mut dec = Decoder::new(payload, "data");
                let seq = dec.u64()?;
                let ciphertext = dec.rest().to_vec();
                Ok(Message::Data { seq, ciphertext })
            }
            MSG_PING => expect_empty(payload, "ping").map(|_| Message::Ping),
            MSG_PONG => expect_empty(payload, "pong").map(|_| Message::Pong),
            MSG_CLOSE => expect_empty(payload, "close").map(|_| Message::Close),
            MSG_REKEY => {
                let sealed = decode_sealed(payload, "rekey")?;
                Ok(Message::Rekey { sealed })
            }
            MSG_ALERT => {
                let mut dec = Decoder::new(payload, "alert");
                let level = AlertLevel::from_code(dec.u8()?)?;
                let code = AlertCode::from_id(dec.u16()?)?;
                let desc_len = dec.u16()? as usize;
                let desc = dec.bytes(desc_len)?;
                let description = String::from_utf8(desc.to_vec())
                    .map_err(|_| Error::InvalidMessage("alert"))?;
                dec.finish()?;
                Ok(Message::Alert(Alert {
                    level,
                    code,
                    description,
                }))
            }
            other => Err(Error::UnknownMessageType(other)),
        }
    }
}

// The encrypted handshake-finished and rekey records delimit their sealed
// blob with an inner 4-byte big-endian length in front of the ciphertext.
fn decode_sealed(payload: &[u8], what: &'static str) -> Result<Vec<u8>, Error> {
    let mut dec = Decoder::new(payload, what);
    let len = dec.u32()? as usize;
    let sealed = dec.bytes(len)?.to_vec();
    dec.finish()?;
    Ok(sealed)
}

fn expect_empty(payload: &[u8], what: &'static str) -> Result<(), Error> {
    if payload.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidMessage(what))
    }
}

// Bounds-checked cursor over a payload slice. Every read failure names the
// message being parsed.
struct Decoder<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8], what: &'static str) -> Self {
        Decoder { buf, what }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.buf.len() < n {
            return Err(Error::InvalidMessage(self.what));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, Error> {
        Ok(BigEndian::read_u16(self.bytes(2)?))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        Ok(BigEndian::read_u32(self.bytes(4)?))
    }

    fn u64(&mut self) -> Result<u64, Error> {
        Ok(BigEndian::read_u64(self.bytes(8)?))
    }

    fn array32(&mut self) -> Result<[u8; 32], Error> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.bytes(32)?);
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = self.buf;
        self.buf = &[];
        out
    }

    fn finish(self) -> Result<(), Error> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidMessage(self.what))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) -> Message {
        let encoded = msg.encode();
        assert_eq!(encoded[0], msg.msg_type());
        let len = BigEndian::read_u32(&encoded[1..5]) as usize;
        assert_eq!(len, encoded.len() - crate::HEADER_SIZE);
        Message::decode(encoded[0], &encoded[crate::HEADER_SIZE..]).unwrap()
    }

    #[test]
    fn client_hello_round_trip() {
        let msg = Message::ClientHello(ClientHello {
            version: crate::PROTOCOL_VERSION,
            random: [0x5a; 32],
            session_id: vec![1, 2, 3],
            public_key: vec![7; 1600],
            suites: vec![CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305],
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn server_hello_round_trip() {
        let msg = Message::ServerHello(ServerHello {
            version: crate::PROTOCOL_VERSION,
            random: [0xa5; 32],
            session_id: [0x11; 32],
            ciphertext: vec![9; 1600],
            suite: CipherSuite::ChaCha20Poly1305,
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn empty_server_hello_ciphertext_round_trip() {
        let msg = Message::ServerHello(ServerHello {
            version: crate::PROTOCOL_VERSION,
            random: [0; 32],
            session_id: [0x22; 32],
            ciphertext: Vec::new(),
            suite: CipherSuite::Aes256Gcm,
        });
        assert_eq!(round_trip(msg.clone()), msg);
    }

    #[test]
    fn sealed_records_round_trip() {
        for msg in [
            Message::ClientFinished { sealed: vec![4; 60] },
            Message::ServerFinished { sealed: vec![5; 60] },
            Message::Rekey { sealed: vec![6; 1640] },
        ] {
            assert_eq!(round_trip(msg.clone()), msg);
        }
    }

    #[test]
    fn data_and_control_round_trip() {
        for msg in [
            Message::Data {
                seq: 0x0102_0304_0506_0708,
                ciphertext: vec![0xcc; 48],
            },
            Message::Ping,
            Message::Pong,
            Message::Close,
            Message::Alert(Alert::fatal(AlertCode::HandshakeFailure, "no common suite")),
        ] {
            assert_eq!(round_trip(msg.clone()), msg);
        }
    }

    #[test]
    fn client_hello_golden_bytes() {
        use hex_literal::hex;

        let msg = Message::ClientHello(ClientHello {
            version: 0x0001,
            random: [0xaa; 32],
            session_id: Vec::new(),
            public_key: vec![0x01, 0x02, 0x03],
            suites: vec![CipherSuite::Aes256Gcm],
        });
        let mut expected = hex!("01 000000 2b 0001").to_vec();
        expected.extend_from_slice(&[0xaa; 32]);
        expected.extend_from_slice(&hex!("00 0003 010203 01 0001"));
        assert_eq!(msg.encode(), expected);
    }

    #[test]
    fn data_record_golden_bytes() {
        use hex_literal::hex;

        let msg = Message::Data {
            seq: 1,
            ciphertext: vec![0xff, 0xee],
        };
        assert_eq!(
            msg.encode(),
            hex!("10 0000000a 0000000000000001 ffee")
        );
    }

    #[test]
    fn rekey_body_round_trip() {
        let body = RekeyBody {
            key_or_ct: vec![3; 1600],
            activation_seq: 42,
        };
        assert_eq!(RekeyBody::decode(&body.encode()).unwrap(), body);
    }

    #[test]
    fn truncated_client_hello_rejected() {
        let msg = Message::ClientHello(ClientHello {
            version: 1,
            random: [0; 32],
            session_id: Vec::new(),
            public_key: vec![1; 16],
            suites: vec![CipherSuite::Aes256Gcm],
        });
        let encoded = msg.encode();
        let payload = &encoded[crate::HEADER_SIZE..];
        for cut in [0, 1, 34, 36, payload.len() - 1] {
            assert!(Message::decode(MSG_CLIENT_HELLO, &payload[..cut]).is_err());
        }
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut payload = Message::Ping.encode().split_off(crate::HEADER_SIZE);
        payload.push(0);
        assert!(matches!(
            Message::decode(MSG_PING, &payload),
            Err(Error::InvalidMessage("ping"))
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(matches!(
            Message::decode(0x7f, &[]),
            Err(Error::UnknownMessageType(0x7f))
        ));
    }
}
