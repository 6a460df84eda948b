//! Cryptographic core of ppe: key identities and pools, transcript-
//! derived nonces, sealed-block sessions, and the client/server
//! handshake peers.
//!
//! ppe gives a client an authenticated, confidential channel to one of
//! several known servers. Long-term X25519 keys establish identity,
//! per-session ephemeral keys give forward secrecy, and a short 2-byte
//! key id lets the first message address a server key without shipping
//! the full public key in the clear.
//!
//! # Handshake flow (stream mode)
//!
//! ```text
//! Client                                        Server
//!   |                                             |
//!   |  key_id(S) ‖ EC ‖ seal(Ctag)                |  temp = DH(S, ECs)
//!   |-------------------------------------------->|  trial-decrypt pool
//!   |                                             |
//!   |  seal(ES ‖ Ctag ‖ Stag)                     |  temp = DH(EC, Ss)
//!   |<--------------------------------------------|
//!   |                                             |
//!   |  seal(C ‖ seal(EC ‖ Stag, DH(S, Cs)),       |
//!   |       DH(ES, ECs))                          |  proof of possession
//!   |-------------------------------------------->|
//!   |                                             |
//!   [   session key = DH(ES, ECs) on both sides   ]
//! ```
//!
//! Packet mode skips the round trip: the first payload carries
//! `key_id(S) ‖ EC` and the static-ephemeral secret stays the session
//! key. Appropriate only where the weaker guarantees are acceptable.
//!
//! All post-handshake traffic rides length-prefixed sealed blocks
//! (see `ppe_core::frame`) under nonces derived from the handshake
//! transcript plus a never-reused counter, with a sliding replay
//! window on the receive path.

#![forbid(unsafe_code)]

pub mod client;
pub mod identity;
pub mod nonce;
pub mod pool;
pub mod sealing;
pub mod server;
pub mod session;
pub mod window;

#[cfg(test)]
pub(crate) mod testutil;

pub use client::ClientPeer;
pub use identity::{KeyId, KeyPair};
pub use pool::KeyPool;
pub use ppe_core::Mode;
pub use sealing::SealingKey;
pub use server::ServerPeer;
pub use session::{Peer, PeerState};
pub use window::ReplayWindow;

use ppe_core::FrameError;
use std::io;

/// Session-fatal protocol errors.
///
/// Nothing here is retried: a failed handshake or a block that will
/// not authenticate leaves the peer terminal, with its secrets
/// dropped. Reconnection policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Key agreement produced a degenerate secret or key material was
    /// unusable.
    #[error("key agreement failed: {0}")]
    KeyAgreement(&'static str),

    /// A seal would not open, or an echoed handshake value did not
    /// match what this side sent.
    #[error("authentication failed")]
    Authentication,

    #[error("sealing failed")]
    Sealing,

    #[error("malformed handshake message: {0}")]
    Malformed(&'static str),

    /// No candidate key under the advertised id opened the first
    /// handshake message.
    #[error("no key in pool opens id {0}")]
    PoolExhausted(KeyId),

    /// Received block counter already seen or outside the replay
    /// window.
    #[error("replayed or stale block counter {0}")]
    Replay(u32),

    /// The session's nonce counter ran out; the channel must be torn
    /// down and re-established.
    #[error("nonce counter exhausted")]
    CounterExhausted,

    #[error("session not established")]
    NotEstablished,

    #[error("peer is closed")]
    Closed,

    #[error("handshake already failed")]
    HandshakeFailed,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<PeerError> for io::Error {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::Io(inner) => inner,
            PeerError::Frame(FrameError::Io(inner)) => inner,
            PeerError::Authentication
            | PeerError::Malformed(_)
            | PeerError::Replay(_)
            | PeerError::PoolExhausted(_)
            | PeerError::Frame(_) => io::Error::new(io::ErrorKind::InvalidData, err),
            PeerError::NotEstablished | PeerError::Closed | PeerError::HandshakeFailed => {
                io::Error::new(io::ErrorKind::NotConnected, err)
            }
            PeerError::KeyAgreement(_) | PeerError::Sealing | PeerError::CounterExhausted => {
                io::Error::new(io::ErrorKind::Other, err)
            }
        }
    }
}
