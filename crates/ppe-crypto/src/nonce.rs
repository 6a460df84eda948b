//! Transcript-derived nonce bases.
//!
//! A session's nonces are `base + counter`, where the base is a
//! 24-byte digest of ephemeral handshake material (`EC ‖ S`). Because
//! the base depends on a fresh ephemeral key, two independent sessions
//! never share a nonce even when their counters coincide — and no
//! persistent per-key nonce state is needed. The counter itself is
//! owned by the session and drawn exactly once per seal.

use blake2::{Blake2s256, Digest};

/// Nonce length expected by the sealing primitive.
pub const NONCE_LEN: usize = 24;

/// 192-bit big-endian nonce base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceBase([u8; NONCE_LEN]);

impl NonceBase {
    /// Hash `seed` down to a 24-byte base.
    pub fn derive(seed: &[u8]) -> Self {
        let digest = Blake2s256::digest(seed);
        let mut base = [0u8; NONCE_LEN];
        base.copy_from_slice(&digest[..NONCE_LEN]);
        Self(base)
    }

    /// `(base + counter) mod 2^192`, serialized big-endian.
    pub fn at(&self, counter: u32) -> [u8; NONCE_LEN] {
        let mut nonce = self.0;
        let mut carry = u64::from(counter);
        for byte in nonce.iter_mut().rev() {
            if carry == 0 {
                break;
            }
            let sum = u64::from(*byte) + (carry & 0xff);
            *byte = sum as u8;
            carry = (carry >> 8) + (sum >> 8);
        }
        nonce
    }
}
