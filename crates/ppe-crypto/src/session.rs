//! Shared per-session state and the sealed-block read/write paths used
//! by both handshake roles.
//!
//! # Counter convention
//!
//! Both roles walk one logical counter sequence seeded at 0. The
//! sender draws the next value (read, then post-increment), seals with
//! it, and stamps it into the block header; the receiver replay-checks
//! the stamped value, opens with it, and then moves its own counter
//! past it (`max(local, stamped + 1)`). As long as the two sides take
//! turns — which the handshake and the request/response shape of the
//! protocol enforce — no (key, nonce) pair is ever used twice.

use std::io::{Read, Write};

use tracing::trace;

use ppe_core::{read_block, write_block, BlockHeader, FrameError, Mode, MAX_BLOCK_PAYLOAD};

use crate::nonce::NonceBase;
use crate::sealing::{SealingKey, TAG_LEN};
use crate::window::ReplayWindow;
use crate::PeerError;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// Remote long-term public key, once known.
    pub peer_key: Option<[u8; 32]>,
    /// Association id stamped on every block of this session.
    pub assoc_id: u32,
    /// Next nonce counter to be drawn.
    pub counter: u32,
}

/// Common surface of both handshake roles.
///
/// Peers are single-owner: every operation takes `&mut self`, so the
/// lazy handshake can only ever run once and the concurrent-first-call
/// race is unrepresentable on one peer value. Callers that split reads
/// and writes across threads wrap the peer in a `Mutex`; that lock is
/// then what serializes the trigger.
pub trait Peer: Read + Write {
    /// Run the handshake now if it has not run yet. Idempotent after
    /// success, terminal after failure.
    fn handshake(&mut self) -> Result<(), PeerError>;

    fn state(&self) -> PeerState;

    /// Drop all owned secret material (zeroized on drop) and mark the
    /// peer unusable. Closing the underlying transport is left to the
    /// caller, who owns its lifecycle.
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Established,
    Failed,
    Closed,
}

/// Per-session mutable state shared by client and server peers.
pub(crate) struct SessionCore<T> {
    pub(crate) transport: T,
    pub(crate) mode: Mode,
    pub(crate) assoc_id: u32,
    pub(crate) counter: u32,
    pub(crate) nonce_base: Option<NonceBase>,
    pub(crate) key: Option<SealingKey>,
    pub(crate) window: ReplayWindow,
    pub(crate) phase: Phase,
    /// Decrypted bytes not yet handed to the caller.
    pending: Vec<u8>,
}

impl<T: Read + Write> SessionCore<T> {
    pub(crate) fn new(transport: T, mode: Mode, assoc_id: u32) -> Self {
        Self {
            transport,
            mode,
            assoc_id,
            counter: 0,
            nonce_base: None,
            key: None,
            window: ReplayWindow::new(),
            phase: Phase::Idle,
            pending: Vec::new(),
        }
    }

    /// Gate for the lazy handshake: Ok(true) means "run it now".
    pub(crate) fn begin_handshake(&self) -> Result<bool, PeerError> {
        match self.phase {
            Phase::Idle => Ok(true),
            Phase::Established => Ok(false),
            Phase::Failed => Err(PeerError::HandshakeFailed),
            Phase::Closed => Err(PeerError::Closed),
        }
    }

    /// Draw the next nonce counter, exactly once per seal.
    pub(crate) fn next_counter(&mut self) -> Result<u32, PeerError> {
        if self.counter == u32::MAX {
            return Err(PeerError::CounterExhausted);
        }
        let counter = self.counter;
        self.counter += 1;
        Ok(counter)
    }

    /// Fold an accepted incoming counter into the session: remember it
    /// in the replay window and move the local counter past it.
    pub(crate) fn accept_counter(&mut self, counter: u32) {
        self.window.check_and_update(counter);
        self.counter = self.counter.max(counter.saturating_add(1));
    }

    /// Deframe one block, adopting its association id and replay-
    /// checking its counter. Callers open the payload, then commit the
    /// counter with [`Self::accept_counter`].
    pub(crate) fn read_raw_block(&mut self) -> Result<(BlockHeader, Vec<u8>), PeerError> {
        let (header, payload) = read_block(&mut self.transport)?;
        self.assoc_id = header.assoc_id;
        if !self.window.check(header.counter) {
            trace!(counter = header.counter, "rejecting replayed block");
            return Err(PeerError::Replay(header.counter));
        }
        Ok((header, payload))
    }

    pub(crate) fn write_raw_block(&mut self, counter: u32, payload: &[u8]) -> Result<(), PeerError> {
        write_block(&mut self.transport, self.assoc_id, counter, payload)?;
        Ok(())
    }

    /// Seal `plaintext` under the session key and frame
    /// `head ‖ ciphertext` as one block stamped with the counter that
    /// sealed it.
    pub(crate) fn write_sealed(&mut self, head: &[u8], plaintext: &[u8]) -> Result<usize, PeerError> {
        let base = self.nonce_base.ok_or(PeerError::NotEstablished)?;
        let framed = head.len() + plaintext.len() + TAG_LEN;
        if framed > MAX_BLOCK_PAYLOAD {
            return Err(PeerError::Frame(FrameError::PayloadTooLarge(framed)));
        }
        let counter = self.next_counter()?;
        let nonce = base.at(counter);
        let key = self.key.as_ref().ok_or(PeerError::NotEstablished)?;
        let ciphertext = key.seal(&nonce, plaintext)?;

        let mut payload = Vec::with_capacity(head.len() + ciphertext.len());
        payload.extend_from_slice(head);
        payload.extend_from_slice(&ciphertext);
        self.write_raw_block(counter, &payload)?;
        Ok(plaintext.len())
    }

    /// Deframe and open the next block with the counter its sender
    /// stamped. The replay window commits only after the open
    /// succeeds.
    pub(crate) fn read_sealed(&mut self) -> Result<Vec<u8>, PeerError> {
        let (header, payload) = self.read_raw_block()?;
        let base = self.nonce_base.ok_or(PeerError::NotEstablished)?;
        let key = self.key.as_ref().ok_or(PeerError::NotEstablished)?;
        let plaintext = key.open(&base.at(header.counter), &payload)?;
        self.accept_counter(header.counter);
        Ok(plaintext)
    }

    /// Serve buffered plaintext, opening the next block when empty.
    pub(crate) fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, PeerError> {
        if self.pending.is_empty() {
            self.pending = self.read_sealed()?;
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    /// Park plaintext recovered during the handshake (packet mode's
    /// first payload) for the next read.
    pub(crate) fn stash_plaintext(&mut self, plaintext: Vec<u8>) {
        self.pending = plaintext;
    }

    /// Drop key material and mark the session failed.
    pub(crate) fn fail(&mut self) {
        self.key = None;
        self.nonce_base = None;
        self.phase = Phase::Failed;
    }

    pub(crate) fn close(&mut self) {
        self.key = None;
        self.nonce_base = None;
        self.pending.clear();
        self.phase = Phase::Closed;
    }
}
