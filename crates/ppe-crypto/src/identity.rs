//! X25519 key identities and short key ids.
//!
//! A [`KeyPair`] is a 32-byte X25519 public key plus an optional
//! private half: pools provisioned for validation may hold public-only
//! entries. Private halves zeroize on drop.
//!
//! A [`KeyId`] is a 2-byte digest of a public key, used both as the
//! wire addressing tag in the first handshake message and as the pool
//! lookup key. At 2 bytes, distinct keys sharing an id is entirely
//! expected; lookups return every candidate and the server tries them
//! all.

use std::fmt;

use blake2::{Blake2s256, Digest};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

/// Curve key length in bytes.
pub const KEY_LEN: usize = 32;

/// Key id length in bytes.
pub const KEY_ID_LEN: usize = 2;

/// 2-byte truncated BLAKE2s digest of a public key. Never unique.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId([u8; KEY_ID_LEN]);

impl KeyId {
    pub fn of(public: &[u8; KEY_LEN]) -> Self {
        let digest = Blake2s256::digest(public);
        Self([digest[0], digest[1]])
    }

    pub fn from_bytes(bytes: [u8; KEY_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}", self.0[0], self.0[1])
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

/// Long-term or throwaway X25519 keypair.
#[derive(Clone)]
pub struct KeyPair {
    public: [u8; KEY_LEN],
    secret: Option<StaticSecret>,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: Some(secret),
        }
    }

    /// Rebuild a keypair from its private half.
    pub fn from_secret_bytes(secret: [u8; KEY_LEN]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: Some(secret),
        }
    }

    /// Public half only, for validating pools.
    pub fn public_only(public: [u8; KEY_LEN]) -> Self {
        Self {
            public,
            secret: None,
        }
    }

    pub fn public(&self) -> &[u8; KEY_LEN] {
        &self.public
    }

    pub fn id(&self) -> KeyId {
        KeyId::of(&self.public)
    }

    pub fn secret(&self) -> Option<&StaticSecret> {
        self.secret.as_ref()
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("id", &self.id())
            .field("has_secret", &self.has_secret())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_id_is_deterministic() {
        let pair = KeyPair::generate();
        assert_eq!(KeyId::of(pair.public()), KeyId::of(pair.public()));
        assert_eq!(pair.id().as_bytes().len(), KEY_ID_LEN);
    }

    #[test]
    fn secret_bytes_roundtrip() {
        let pair = KeyPair::generate();
        let secret = pair.secret().unwrap().to_bytes();
        let restored = KeyPair::from_secret_bytes(secret);
        assert_eq!(restored.public(), pair.public());
    }

    #[test]
    fn public_only_carries_no_secret() {
        let pair = KeyPair::generate();
        let public = KeyPair::public_only(*pair.public());
        assert!(!public.has_secret());
        assert_eq!(public.id(), pair.id());
    }

    #[test]
    fn debug_never_prints_key_material() {
        let pair = KeyPair::generate();
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains(&format!("{:?}", pair.public())));
    }
}
