//! Key schedule: everything keyed is derived from the 32-byte master secret
//! through one SHAKE-256 expander with domain-separating labels.
//!
//! `derive_key(secret, label, context, n)` reads `n` bytes from
//! `SHAKE-256(secret || len(label) || label || context)`. The label length
//! byte keeps the label/context boundary unambiguous. Distinct labels per
//! role and phase keep every derived key independent.

use byteorder::{BigEndian, ByteOrder};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use zeroize::Zeroizing;

use crate::constants::{KEY_LEN, NONCE_LEN};

pub const LABEL_INITIATOR_TRAFFIC: &str = "CH-KEM-VPN-InitiatorTraffic";
pub const LABEL_RESPONDER_TRAFFIC: &str = "CH-KEM-VPN-ResponderTraffic";
pub const LABEL_INITIATOR_HANDSHAKE: &str = "CH-KEM-VPN-InitiatorHandshake";
pub const LABEL_RESPONDER_HANDSHAKE: &str = "CH-KEM-VPN-ResponderHandshake";
pub const LABEL_INITIATOR_IV: &str = "CH-KEM-VPN-InitiatorIV";
pub const LABEL_RESPONDER_IV: &str = "CH-KEM-VPN-ResponderIV";
pub const LABEL_CLIENT_FINISHED: &str = "CH-KEM-VPN-ClientFinished";
pub const LABEL_SERVER_FINISHED: &str = "CH-KEM-VPN-ServerFinished";
pub const LABEL_SESSION_TICKET: &str = "CH-KEM-VPN-SessionTicket";

/// Generic expander over the shared secret.
pub fn derive_key(secret: &[u8], label: &str, context: &[u8], len: usize) -> Zeroizing<Vec<u8>> {
    let mut xof = Shake256::default();
    xof.update(secret);
    xof.update(&[label.len() as u8]);
    xof.update(label.as_bytes());
    xof.update(context);

    let mut out = Zeroizing::new(vec![0u8; len]);
    xof.finalize_xof().read(&mut out);
    out
}

fn derive_key32(secret: &[u8], label: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let bytes = derive_key(secret, label, &[], KEY_LEN);
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(&bytes);
    out
}

fn derive_iv(secret: &[u8], label: &str) -> [u8; NONCE_LEN] {
    let bytes = derive_key(secret, label, &[], NONCE_LEN);
    let mut out = [0u8; NONCE_LEN];
    out.copy_from_slice(&bytes);
    out
}

/// Per-direction data-plane keys.
pub struct TrafficKeys {
    pub initiator: Zeroizing<[u8; KEY_LEN]>,
    pub responder: Zeroizing<[u8; KEY_LEN]>,
}

pub fn derive_traffic_keys(master_secret: &[u8]) -> TrafficKeys {
    TrafficKeys {
        initiator: derive_key32(master_secret, LABEL_INITIATOR_TRAFFIC),
        responder: derive_key32(master_secret, LABEL_RESPONDER_TRAFFIC),
    }
}

/// Per-direction handshake keys plus the IV salts that mask the Finished
/// record nonces.
pub struct HandshakeKeys {
    pub initiator_key: Zeroizing<[u8; KEY_LEN]>,
    pub responder_key: Zeroizing<[u8; KEY_LEN]>,
    pub initiator_iv: [u8; NONCE_LEN],
    pub responder_iv: [u8; NONCE_LEN],
}

pub fn derive_handshake_keys(master_secret: &[u8]) -> HandshakeKeys {
    HandshakeKeys {
        initiator_key: derive_key32(master_secret, LABEL_INITIATOR_HANDSHAKE),
        responder_key: derive_key32(master_secret, LABEL_RESPONDER_HANDSHAKE),
        initiator_iv: derive_iv(master_secret, LABEL_INITIATOR_IV),
        responder_iv: derive_iv(master_secret, LABEL_RESPONDER_IV),
    }
}

/// Sequence numbers ride as associated data in big-endian form.
pub fn seq_aad(seq: u64) -> [u8; 8] {
    let mut aad = [0u8; 8];
    BigEndian::write_u64(&mut aad, seq);
    aad
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    const MASTER: [u8; 32] = [0x0b; 32];

    #[test]
    fn traffic_key_vectors() {
        let keys = derive_traffic_keys(&MASTER);
        assert_eq!(
            *keys.initiator,
            hex!("16858ccff462d9622f3b4bf1bdd051d775b8061c14b1698157d144daf292bcb5")
        );
        assert_eq!(
            *keys.responder,
            hex!("b7a23f84e5896ae2e6dfddad13676b6ef3df625c8b09c845548f1eab1fbc19eb")
        );
    }

    #[test]
    fn finished_vector_binds_transcript() {
        let verify = derive_key(&MASTER, LABEL_CLIENT_FINISHED, b"example transcript", 32);
        assert_eq!(
            verify.as_slice(),
            hex!("04b86e845c3ac3c95a18e86acb64819a9f094cd5a75ded5aee4824e4e9ea1cb3")
        );
    }

    #[test]
    fn iv_vector() {
        let keys = derive_handshake_keys(&MASTER);
        assert_eq!(keys.initiator_iv, hex!("abc83612c538ff269ff5e518"));
    }

    #[test]
    fn labels_separate_domains() {
        let keys = derive_handshake_keys(&MASTER);
        let traffic = derive_traffic_keys(&MASTER);
        let all = [
            *keys.initiator_key,
            *keys.responder_key,
            *traffic.initiator,
            *traffic.responder,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in all.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn context_changes_output() {
        let a = derive_key(&MASTER, LABEL_SERVER_FINISHED, b"transcript a", 32);
        let b = derive_key(&MASTER, LABEL_SERVER_FINISHED, b"transcript b", 32);
        assert_ne!(a.as_slice(), b.as_slice());
    }

    #[test]
    fn requested_length_honored() {
        for len in [16usize, 32, 48, 64] {
            assert_eq!(derive_key(&MASTER, LABEL_SESSION_TICKET, &[], len).len(), len);
        }
    }
}
