//! Cryptographic primitives for the Stella protocol
//!
//! Node identities use Curve25519; per-datagram payload protection is
//! Salsa20/12 with a Poly1305 authenticator, matching cipher suite 1 of
//! the wire format. The authenticator key for a datagram is derived
//! from the session key and the datagram nonce, so tags never repeat a
//! one-time key.

use poly1305::universal_hash::KeyInit;
use poly1305::Poly1305;
use rand::rngs::OsRng;
use salsa20::cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa12;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{Error, Result};

/// Curve25519 key length in bytes (public and private)
pub const KEY_LENGTH: usize = 32;

/// Stream cipher nonce length in bytes
pub const NONCE_LENGTH: usize = 8;

/// Poly1305 tag length in bytes
pub const TAG_LENGTH: usize = 16;

/// Hash output length in bytes
pub const HASH_LENGTH: usize = 64;

/// A Curve25519 key pair
#[derive(Clone)]
pub struct KeyPair {
    /// Public key
    pub public: [u8; KEY_LENGTH],
    /// Private key
    pub private: [u8; KEY_LENGTH],
}

impl KeyPair {
    /// Generate a fresh Curve25519 key pair from the OS entropy source
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            private: secret.to_bytes(),
        }
    }
}

/// SHA-512 of `data`
pub fn hash(data: &[u8]) -> [u8; HASH_LENGTH] {
    let digest = Sha512::digest(data);
    let mut out = [0u8; HASH_LENGTH];
    out.copy_from_slice(&digest);
    out
}

/// Derive the shared secret between a local private key and a peer
/// public key
///
/// Returns the SHA-512 hash of the raw X25519 output. Both sides of a
/// pairing derive bitwise-identical results. The first 32 bytes serve
/// as the stream cipher key.
pub fn derive_shared_secret(private_key: &[u8], peer_public_key: &[u8]) -> Result<[u8; HASH_LENGTH]> {
    let private: [u8; KEY_LENGTH] =
        private_key
            .try_into()
            .map_err(|_| Error::InvalidKeyLength {
                expected: KEY_LENGTH,
                actual: private_key.len(),
            })?;
    let public: [u8; KEY_LENGTH] =
        peer_public_key
            .try_into()
            .map_err(|_| Error::InvalidKeyLength {
                expected: KEY_LENGTH,
                actual: peer_public_key.len(),
            })?;

    let secret = StaticSecret::from(private);
    let shared = secret.diffie_hellman(&PublicKey::from(public));
    Ok(hash(shared.as_bytes()))
}

/// Apply the Salsa20/12 keystream to `data` in place
///
/// Encryption and decryption are the same transform.
pub fn salsa2012_crypt(data: &mut [u8], key: &[u8; KEY_LENGTH], nonce: &[u8; NONCE_LENGTH]) {
    let mut cipher = Salsa12::new(key.into(), nonce.into());
    cipher.apply_keystream(data);
}

/// Compute the Poly1305 tag of `message` under a one-time key
pub fn authenticate(message: &[u8], key: &[u8; KEY_LENGTH]) -> [u8; TAG_LENGTH] {
    let mac = Poly1305::new(key.into());
    mac.compute_unpadded(message).into()
}

/// Verify a Poly1305 tag
///
/// Runs in time independent of the tag contents.
pub fn verify(message: &[u8], key: &[u8; KEY_LENGTH], tag: &[u8]) -> bool {
    let computed = authenticate(message, key);
    constant_time_eq(&computed, tag)
}

/// Derive the one-time authenticator key for a `(key, nonce)` pair
fn auth_key(key: &[u8; KEY_LENGTH], nonce: &[u8; NONCE_LENGTH]) -> [u8; KEY_LENGTH] {
    let mut input = [0u8; KEY_LENGTH + NONCE_LENGTH];
    input[..KEY_LENGTH].copy_from_slice(key);
    input[KEY_LENGTH..].copy_from_slice(nonce);

    let digest = hash(&input);
    let mut out = [0u8; KEY_LENGTH];
    out.copy_from_slice(&digest[..KEY_LENGTH]);
    out
}

/// Encrypt and authenticate `data`
///
/// Output is `ciphertext || tag(ciphertext)` where the tag key is
/// `hash(key || nonce)[..32]`.
pub fn encrypt_authenticated(
    data: &[u8],
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_LENGTH],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + TAG_LENGTH);
    out.extend_from_slice(data);
    salsa2012_crypt(&mut out, key, nonce);

    let tag = authenticate(&out, &auth_key(key, nonce));
    out.extend_from_slice(&tag);
    out
}

/// Verify and decrypt the output of [`encrypt_authenticated`]
///
/// The tag is checked before any decryption happens; on mismatch the
/// call fails with [`Error::AuthenticationFailed`] and reveals nothing
/// about the plaintext.
pub fn decrypt_authenticated(
    data: &[u8],
    key: &[u8; KEY_LENGTH],
    nonce: &[u8; NONCE_LENGTH],
) -> Result<Vec<u8>> {
    if data.len() < TAG_LENGTH {
        return Err(Error::PacketTooShort {
            expected: TAG_LENGTH,
            actual: data.len(),
        });
    }

    let (ciphertext, tag) = data.split_at(data.len() - TAG_LENGTH);
    if !verify(ciphertext, &auth_key(key, nonce), tag) {
        return Err(Error::AuthenticationFailed);
    }

    let mut out = ciphertext.to_vec();
    salsa2012_crypt(&mut out, key, nonce);
    Ok(out)
}

/// Constant-time equality for byte slices
///
/// Slices of unequal length compare unequal immediately; the length is
/// not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
