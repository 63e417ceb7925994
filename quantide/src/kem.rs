//! CH-KEM: hybrid key encapsulation.
//!
//! Composes ML-KEM-1024 (NIST Category 5) with an X25519 exchange. The
//! 32-byte shared secret is the SHA3-256 binding hash over both raw secrets
//! and the full public key and ciphertext, so the result stands as long as
//! either primitive stands and the hash is collision-resistant.
//!
//! Serialized forms:
//!   public key  = mlkem_pk[1568] || x25519_pk[32]
//!   ciphertext  = mlkem_ct[1568] || x25519_ephemeral_pk[32]

use pqcrypto_mlkem::mlkem1024;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use rand::rngs::OsRng;
use sha3::{Digest, Sha3_256};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

pub const MLKEM_PUBLIC_KEY_LEN: usize = 1568;
pub const MLKEM_SECRET_KEY_LEN: usize = 3168;
pub const MLKEM_CIPHERTEXT_LEN: usize = 1568;
pub const X25519_KEY_LEN: usize = 32;

pub const PUBLIC_KEY_LEN: usize = MLKEM_PUBLIC_KEY_LEN + X25519_KEY_LEN;
pub const CIPHERTEXT_LEN: usize = MLKEM_CIPHERTEXT_LEN + X25519_KEY_LEN;
pub const SHARED_SECRET_LEN: usize = 32;

/// The combined 32-byte secret both sides derive.
pub type SharedSecret = Zeroizing<[u8; SHARED_SECRET_LEN]>;

/// Hybrid public key.
#[derive(Clone)]
pub struct PublicKey {
    mlkem: mlkem1024::PublicKey,
    x25519: X25519PublicKey,
}

impl PublicKey {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_KEY_LEN);
        out.extend_from_slice(self.mlkem.as_bytes());
        out.extend_from_slice(self.x25519.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(Error::InvalidPublicKey);
        }
        let mlkem = mlkem1024::PublicKey::from_bytes(&bytes[..MLKEM_PUBLIC_KEY_LEN])
            .map_err(|_| Error::InvalidPublicKey)?;
        let mut x25519_bytes = [0u8; X25519_KEY_LEN];
        x25519_bytes.copy_from_slice(&bytes[MLKEM_PUBLIC_KEY_LEN..]);
        Ok(PublicKey {
            mlkem,
            x25519: X25519PublicKey::from(x25519_bytes),
        })
    }
}

/// Hybrid secret key. The ML-KEM half is kept as raw bytes under a zeroizing
/// wrapper and re-parsed per decapsulation; the X25519 half wipes itself on
/// drop.
pub struct SecretKey {
    mlkem: Zeroizing<Vec<u8>>,
    x25519: StaticSecret,
}

/// An ephemeral hybrid keypair. Private material is zeroized when the pair
/// is dropped.
pub struct KeyPair {
    pub public: PublicKey,
    secret: SecretKey,
}

/// Hybrid KEM ciphertext.
#[derive(Clone)]
pub struct Ciphertext {
    mlkem: mlkem1024::Ciphertext,
    x25519: X25519PublicKey,
}

impl Ciphertext {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CIPHERTEXT_LEN);
        out.extend_from_slice(self.mlkem.as_bytes());
        out.extend_from_slice(self.x25519.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CIPHERTEXT_LEN {
            return Err(Error::InvalidCiphertext);
        }
        let mlkem = mlkem1024::Ciphertext::from_bytes(&bytes[..MLKEM_CIPHERTEXT_LEN])
            .map_err(|_| Error::InvalidCiphertext)?;
        let mut x25519_bytes = [0u8; X25519_KEY_LEN];
        x25519_bytes.copy_from_slice(&bytes[MLKEM_CIPHERTEXT_LEN..]);
        Ok(Ciphertext {
            mlkem,
            x25519: X25519PublicKey::from(x25519_bytes),
        })
    }
}

/// Generate a fresh hybrid keypair.
pub fn generate_keypair() -> Result<KeyPair> {
    let (mlkem_pk, mlkem_sk) = mlkem1024::keypair();
    let x25519_sk = StaticSecret::random_from_rng(OsRng);
    let x25519_pk = X25519PublicKey::from(&x25519_sk);

    Ok(KeyPair {
        public: PublicKey {
            mlkem: mlkem_pk,
            x25519: x25519_pk,
        },
        secret: SecretKey {
            mlkem: Zeroizing::new(mlkem_sk.as_bytes().to_vec()),
            x25519: x25519_sk,
        },
    })
}

/// Encapsulate to a peer's hybrid public key.
pub fn encapsulate(public_key: &PublicKey) -> Result<(Ciphertext, SharedSecret)> {
    let (mlkem_ss, mlkem_ct) = mlkem1024::encapsulate(&public_key.mlkem);

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pk = X25519PublicKey::from(&ephemeral);
    let x25519_ss = ephemeral.diffie_hellman(&public_key.x25519);

    let ciphertext = Ciphertext {
        mlkem: mlkem_ct,
        x25519: ephemeral_pk,
    };
    let shared = combine(
        mlkem_ss.as_bytes(),
        x25519_ss.as_bytes(),
        &public_key.to_bytes(),
        &ciphertext.to_bytes(),
    );
    Ok((ciphertext, shared))
}

/// Recover the shared secret from a ciphertext produced against our public
/// key. A malformed ciphertext fails uniformly, never revealing which half
/// was at fault; a forged but well-formed one yields a garbage secret by
/// ML-KEM's implicit rejection, which the handshake MAC then catches.
pub fn decapsulate(ciphertext: &Ciphertext, keypair: &KeyPair) -> Result<SharedSecret> {
    let mlkem_sk = mlkem1024::SecretKey::from_bytes(&keypair.secret.mlkem)
        .map_err(|_| Error::InvalidPrivateKey)?;
    let mlkem_ss = mlkem1024::decapsulate(&ciphertext.mlkem, &mlkem_sk);

    let x25519_ss = keypair.secret.x25519.diffie_hellman(&ciphertext.x25519);

    Ok(combine(
        mlkem_ss.as_bytes(),
        x25519_ss.as_bytes(),
        &keypair.public.to_bytes(),
        &ciphertext.to_bytes(),
    ))
}

// The binding combiner: SHA3-256(mlkem_ss || x25519_ss || pk || ct).
fn combine(mlkem_ss: &[u8], x25519_ss: &[u8], pk: &[u8], ct: &[u8]) -> SharedSecret {
    let mut hasher = Sha3_256::new();
    hasher.update(mlkem_ss);
    hasher.update(x25519_ss);
    hasher.update(pk);
    hasher.update(ct);

    let mut out = Zeroizing::new([0u8; SHARED_SECRET_LEN]);
    out.copy_from_slice(&hasher.finalize());
    out
}
