//! AEAD layer over the two negotiable suites.
//!
//! A sealed record is `nonce(12) || ciphertext || tag(16)`. The nonce is not
//! random: it is the instance's monotonic 64-bit counter, big-endian in the
//! low 8 bytes with a zero high half, optionally XOR-masked by a per-instance
//! IV salt (handshake ciphers carry a salt, traffic ciphers do not). Each
//! instance refuses to seal past `NONCE_LIMIT`, leaving headroom below the
//! 2^64 wrap.

use aes_gcm::aead::{Aead as _, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use byteorder::{BigEndian, ByteOrder};
use chacha20poly1305::ChaCha20Poly1305;

use wire::CipherSuite;

use crate::constants::{KEY_LEN, NONCE_LEN, NONCE_LIMIT, NONCE_REKEY_THRESHOLD, TAG_LEN};
use crate::error::{Error, Result};

enum Cipher {
    Aes256Gcm(Box<Aes256Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

/// One direction's AEAD state: cipher, nonce counter, IV salt.
pub struct AeadCipher {
    suite: CipherSuite,
    cipher: Cipher,
    counter: u64,
    iv_salt: [u8; NONCE_LEN],
}

impl AeadCipher {
    /// Build a traffic cipher; the wire nonce equals the bare counter.
    pub fn new(suite: CipherSuite, key: &[u8]) -> Result<Self> {
        Self::with_iv_salt(suite, key, [0u8; NONCE_LEN])
    }

    /// Build a cipher whose nonces are masked with `iv_salt`.
    pub fn with_iv_salt(suite: CipherSuite, key: &[u8], iv_salt: [u8; NONCE_LEN]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(Error::InvalidKeySize);
        }
        let cipher = match suite {
            CipherSuite::Aes256Gcm => Cipher::Aes256Gcm(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|_| Error::InvalidKeySize)?,
            )),
            CipherSuite::ChaCha20Poly1305 => Cipher::ChaCha20Poly1305(Box::new(
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::InvalidKeySize)?,
            )),
        };
        Ok(AeadCipher {
            suite,
            cipher,
            counter: 0,
            iv_salt,
        })
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// True once the counter is close enough to the limit that fresh keys
    /// should be negotiated.
    pub fn needs_rekey(&self) -> bool {
        self.counter >= NONCE_REKEY_THRESHOLD
    }

    fn nonce_for(&self, counter: u64) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        BigEndian::write_u64(&mut nonce[4..], counter);
        for (byte, salt) in nonce.iter_mut().zip(self.iv_salt.iter()) {
            *byte ^= salt;
        }
        nonce
    }

    /// Seal `plaintext`, producing `nonce || ciphertext || tag` and bumping
    /// the counter.
    pub fn seal(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if self.counter >= NONCE_LIMIT {
            return Err(Error::NonceExhausted);
        }
        let nonce = self.nonce_for(self.counter);
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let sealed = match &self.cipher {
            Cipher::Aes256Gcm(cipher) => {
                cipher.encrypt(aes_gcm::Nonce::from_slice(&nonce), payload)
            }
            Cipher::ChaCha20Poly1305(cipher) => {
                cipher.encrypt(chacha20poly1305::Nonce::from_slice(&nonce), payload)
            }
        }
        .map_err(|_| Error::Internal("aead seal"))?;
        self.counter += 1;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a sealed record. The nonce is taken from the record itself; the
    /// tag check is the cipher's constant-time verification.
    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::AuthenticationFailed);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match &self.cipher {
            Cipher::Aes256Gcm(cipher) => cipher.decrypt(aes_gcm::Nonce::from_slice(nonce), payload),
            Cipher::ChaCha20Poly1305(cipher) => {
                cipher.decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
            }
        }
        .map_err(|_| Error::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = [0x42; KEY_LEN];

    fn suites() -> [CipherSuite; 2] {
        [CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305]
    }

    #[test]
    fn seal_open_round_trip() {
        for suite in suites() {
            let mut sealer = AeadCipher::new(suite, &KEY).unwrap();
            let opener = AeadCipher::new(suite, &KEY).unwrap();
            let sealed = sealer.seal(b"attack at dawn", b"aad").unwrap();
            assert_eq!(opener.open(&sealed, b"aad").unwrap(), b"attack at dawn");
        }
    }

    #[test]
    fn nonce_is_big_endian_counter() {
        let mut sealer = AeadCipher::new(CipherSuite::Aes256Gcm, &KEY).unwrap();
        let first = sealer.seal(b"x", b"").unwrap();
        let second = sealer.seal(b"x", b"").unwrap();
        assert_eq!(&first[..NONCE_LEN], &[0u8; 12]);
        let mut expected = [0u8; 12];
        expected[11] = 1;
        assert_eq!(&second[..NONCE_LEN], &expected);
    }

    #[test]
    fn iv_salt_masks_nonce() {
        let salt = [0xff; NONCE_LEN];
        let mut sealer = AeadCipher::with_iv_salt(CipherSuite::ChaCha20Poly1305, &KEY, salt).unwrap();
        let opener = AeadCipher::with_iv_salt(CipherSuite::ChaCha20Poly1305, &KEY, salt).unwrap();
        let sealed = sealer.seal(b"salted", b"").unwrap();
        assert_eq!(&sealed[..NONCE_LEN], &salt);
        assert_eq!(opener.open(&sealed, b"").unwrap(), b"salted");
    }

    #[test]
    fn tampered_bit_fails_auth() {
        for suite in suites() {
            let mut sealer = AeadCipher::new(suite, &KEY).unwrap();
            let opener = AeadCipher::new(suite, &KEY).unwrap();
            let sealed = sealer.seal(b"payload", b"").unwrap();
            for index in [NONCE_LEN, sealed.len() - 1] {
                let mut mangled = sealed.clone();
                mangled[index] ^= 0x80;
                assert!(matches!(
                    opener.open(&mangled, b""),
                    Err(Error::AuthenticationFailed)
                ));
            }
        }
    }

    #[test]
    fn wrong_aad_fails_auth() {
        let mut sealer = AeadCipher::new(CipherSuite::Aes256Gcm, &KEY).unwrap();
        let opener = AeadCipher::new(CipherSuite::Aes256Gcm, &KEY).unwrap();
        let sealed = sealer.seal(b"payload", b"seq 1").unwrap();
        assert!(matches!(
            opener.open(&sealed, b"seq 2"),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn wrong_key_size_rejected() {
        assert!(matches!(
            AeadCipher::new(CipherSuite::Aes256Gcm, &[0u8; 16]),
            Err(Error::InvalidKeySize)
        ));
    }

    #[test]
    fn truncated_record_rejected() {
        let opener = AeadCipher::new(CipherSuite::ChaCha20Poly1305, &KEY).unwrap();
        assert!(matches!(
            opener.open(&[0u8; NONCE_LEN + TAG_LEN - 1], b""),
            Err(Error::AuthenticationFailed)
        ));
    }

    #[test]
    fn fresh_cipher_does_not_need_rekey() {
        let cipher = AeadCipher::new(CipherSuite::Aes256Gcm, &KEY).unwrap();
        assert!(!cipher.needs_rekey());
    }
}
