//! Diffie-Hellman precomputation and authenticated sealing.
//!
//! [`SealingKey`] is the protocol's "precompute" step: one X25519
//! agreement hashed into a symmetric key, then reused for any number
//! of seal/open calls under distinct nonces. Sealing is
//! XChaCha20-Poly1305, whose 24-byte nonce matches the transcript-
//! derived bases from [`crate::nonce`]. `open` fails closed: any
//! tampering, any wrong nonce, any wrong key is an authentication
//! error, never corrupted plaintext.

use blake2::{Blake2s256, Digest};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::nonce::NONCE_LEN;
use crate::PeerError;

/// AEAD tag overhead added to every sealed message.
pub const TAG_LEN: usize = 16;

/// Precomputed symmetric key; the key bytes are zeroized on drop.
pub struct SealingKey {
    key: Zeroizing<[u8; 32]>,
}

impl SealingKey {
    /// Agree on a shared secret between `public` and `secret` and hash
    /// it into a sealing key. Degenerate agreements (low-order remote
    /// points yielding a non-contributory secret) are rejected.
    pub fn precompute(public: &[u8; 32], secret: &StaticSecret) -> Result<Self, PeerError> {
        let shared = secret.diffie_hellman(&PublicKey::from(*public));
        if !shared.was_contributory() {
            return Err(PeerError::KeyAgreement("non-contributory shared secret"));
        }
        let key = Blake2s256::digest(shared.as_bytes());
        Ok(Self {
            key: Zeroizing::new(key.into()),
        })
    }

    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>, PeerError> {
        self.cipher()
            .encrypt(XNonce::from_slice(nonce), plaintext)
            .map_err(|_| PeerError::Sealing)
    }

    pub fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Result<Vec<u8>, PeerError> {
        self.cipher()
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| PeerError::Authentication)
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&*self.key).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::KeyPair;
    use crate::nonce::NonceBase;

    fn key_pair_of_keys() -> (SealingKey, SealingKey) {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let ab = SealingKey::precompute(b.public(), a.secret().unwrap()).unwrap();
        let ba = SealingKey::precompute(a.public(), b.secret().unwrap()).unwrap();
        (ab, ba)
    }

    #[test]
    fn both_directions_agree() {
        let (ab, ba) = key_pair_of_keys();
        let nonce = NonceBase::derive(b"n").at(0);

        let sealed = ab.seal(&nonce, b"shared view").unwrap();
        assert_eq!(ba.open(&nonce, &sealed).unwrap(), b"shared view");
    }

    #[test]
    fn open_fails_under_any_other_nonce() {
        let (ab, ba) = key_pair_of_keys();
        let base = NonceBase::derive(b"n");

        let sealed = ab.seal(&base.at(3), b"msg").unwrap();
        assert!(ba.open(&base.at(4), &sealed).is_err());
        assert!(ba.open(&base.at(3), &sealed).is_ok());
    }

    #[test]
    fn every_flipped_bit_is_caught() {
        let (ab, ba) = key_pair_of_keys();
        let nonce = NonceBase::derive(b"n").at(0);
        let sealed = ab.seal(&nonce, b"integrity").unwrap();

        for byte in 0..sealed.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    matches!(ba.open(&nonce, &tampered), Err(PeerError::Authentication)),
                    "tamper at byte {byte} bit {bit} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn wrong_key_fails() {
        let (ab, _) = key_pair_of_keys();
        let (_, other) = key_pair_of_keys();
        let nonce = NonceBase::derive(b"n").at(0);

        let sealed = ab.seal(&nonce, b"msg").unwrap();
        assert!(other.open(&nonce, &sealed).is_err());
    }
}
