//! Key pool: multi-candidate lookup by short key id.
//!
//! Ids are two bytes, so distinct keys can land on the same id. The
//! pool files every pair under its id in insertion order, and the
//! server trial-decrypts against each candidate in turn — a collision
//! is disambiguated by attempt, never treated as an error.
//!
//! Provision the pool before any handshake runs, then share it
//! read-only (an `Arc<KeyPool>` serves any number of concurrent
//! server-side handshakes; lookups take `&self`).

use std::collections::HashMap;

use crate::identity::{KeyId, KeyPair};

#[derive(Debug, Default)]
pub struct KeyPool {
    pool: HashMap<KeyId, Vec<KeyPair>>,
}

impl KeyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a keypair under its computed id. Collisions append.
    pub fn add_key(&mut self, pair: KeyPair) {
        self.pool.entry(pair.id()).or_default().push(pair);
    }

    /// Candidates for `id` in insertion order; empty when unknown.
    pub fn get(&self, id: KeyId) -> &[KeyPair] {
        self.pool.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct ids with at least one entry.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// File a pair under an explicit id, bypassing the digest. Lets
    /// tests manufacture id collisions without searching for them.
    #[cfg(test)]
    pub(crate) fn add_key_under(&mut self, id: KeyId, pair: KeyPair) {
        self.pool.entry(id).or_default().push(pair);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_insertion_order() {
        let first = KeyPair::generate();
        let second = KeyPair::generate();
        let id = first.id();

        let mut pool = KeyPool::new();
        pool.add_key_under(id, first.clone());
        pool.add_key_under(id, second.clone());

        let candidates = pool.get(id);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].public(), first.public());
        assert_eq!(candidates[1].public(), second.public());
    }

    #[test]
    fn unknown_id_is_empty_not_an_error() {
        let pool = KeyPool::new();
        assert!(pool.get(KeyId::from_bytes([0xAA, 0xBB])).is_empty());
    }

    #[test]
    fn add_key_files_under_computed_id() {
        let pair = KeyPair::generate();
        let mut pool = KeyPool::new();
        pool.add_key(pair.clone());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(pair.id())[0].public(), pair.public());
    }
}
