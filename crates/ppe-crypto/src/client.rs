//! Client side of the handshake and transport.
//!
//! Construction is cheap and does no I/O; the handshake runs lazily,
//! exactly once, on the first read or write (or an explicit
//! [`Peer::handshake`] call). A client with no provisioned long-term
//! identity authenticates with a fresh throwaway keypair — anonymous
//! mode — since the protocol's proof-of-possession leg still needs
//! some identity to prove.

use std::io::{self, Read, Write};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use ppe_core::{random_assoc_id, Mode};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::identity::{KeyId, KeyPair, KEY_ID_LEN, KEY_LEN};
use crate::nonce::NonceBase;
use crate::sealing::SealingKey;
use crate::session::{Peer, PeerState, Phase, SessionCore};
use crate::window::ReplayWindow;
use crate::PeerError;

/// Length of the random challenge tags echoed during the handshake.
pub(crate) const CHALLENGE_LEN: usize = 32;

pub struct ClientPeer<T> {
    core: SessionCore<T>,
    local: Option<KeyPair>,
    server_key: [u8; KEY_LEN],
    /// Packet mode: `key_id(S) ‖ EC`, prepended to the first write.
    packet_prefix: Option<Vec<u8>>,
}

impl<T: Read + Write> ClientPeer<T> {
    /// `server_key` is the server's long-term public key, provisioned
    /// out of band. `local` may be `None` for anonymous mode.
    pub fn new(mode: Mode, transport: T, local: Option<KeyPair>, server_key: [u8; KEY_LEN]) -> Self {
        Self {
            core: SessionCore::new(transport, mode, random_assoc_id()),
            local,
            server_key,
            packet_prefix: None,
        }
    }

    /// Like [`Self::new`] with a caller-sized replay window on the
    /// receive path.
    pub fn with_window(
        mode: Mode,
        transport: T,
        local: Option<KeyPair>,
        server_key: [u8; KEY_LEN],
        window: ReplayWindow,
    ) -> Self {
        let mut peer = Self::new(mode, transport, local, server_key);
        peer.core.window = window;
        peer
    }

    fn ensure_established(&mut self) -> Result<(), PeerError> {
        if !self.core.begin_handshake()? {
            return Ok(());
        }
        match self.run_handshake() {
            Ok(()) => {
                self.core.phase = Phase::Established;
                Ok(())
            }
            Err(err) => {
                self.core.fail();
                self.local = None;
                self.packet_prefix = None;
                Err(err)
            }
        }
    }

    fn run_handshake(&mut self) -> Result<(), PeerError> {
        let local = match &self.local {
            Some(pair) => pair.clone(),
            None => {
                let pair = KeyPair::generate();
                self.local = Some(pair.clone());
                pair
            }
        };
        let local_secret = local
            .secret()
            .ok_or(PeerError::KeyAgreement("client private key missing"))?;

        let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
        let ec_public = PublicKey::from(&ephemeral_secret).to_bytes();

        let mut seed = Vec::with_capacity(KEY_LEN * 2);
        seed.extend_from_slice(&ec_public);
        seed.extend_from_slice(&self.server_key);
        let base = NonceBase::derive(&seed);
        self.core.nonce_base = Some(base);

        // Handshake legs ride the static-ephemeral secret; stream mode
        // swaps in the ephemeral-ephemeral secret at the end.
        let handshake_key = SealingKey::precompute(&self.server_key, &ephemeral_secret)?;
        let key_id = KeyId::of(&self.server_key);

        if self.core.mode == Mode::Packet {
            let mut prefix = Vec::with_capacity(KEY_ID_LEN + KEY_LEN);
            prefix.extend_from_slice(key_id.as_bytes());
            prefix.extend_from_slice(&ec_public);
            self.packet_prefix = Some(prefix);
            self.core.key = Some(handshake_key);
            debug!(assoc_id = self.core.assoc_id, "packet-mode client ready");
            return Ok(());
        }

        // Message 1: key_id(S) ‖ EC ‖ seal(Ctag).
        let mut ctag = [0u8; CHALLENGE_LEN];
        OsRng.fill_bytes(&mut ctag);
        let c0 = self.core.next_counter()?;
        let sealed = handshake_key.seal(&base.at(c0), &ctag)?;
        let mut msg1 = Vec::with_capacity(KEY_ID_LEN + KEY_LEN + sealed.len());
        msg1.extend_from_slice(key_id.as_bytes());
        msg1.extend_from_slice(&ec_public);
        msg1.extend_from_slice(&sealed);
        self.core.write_raw_block(c0, &msg1)?;

        // Message 2: ES ‖ Ctag ‖ Stag under the same handshake secret.
        let (header, payload) = self.core.read_raw_block()?;
        let text = handshake_key.open(&base.at(header.counter), &payload)?;
        self.core.accept_counter(header.counter);
        if text.len() != KEY_LEN + CHALLENGE_LEN * 2 {
            return Err(PeerError::Malformed("handshake response length"));
        }
        let mut es_public = [0u8; KEY_LEN];
        es_public.copy_from_slice(&text[..KEY_LEN]);
        let (echoed, stag) = text[KEY_LEN..].split_at(CHALLENGE_LEN);
        if echoed != ctag {
            return Err(PeerError::Authentication);
        }

        // Message 3: prove possession of the long-term key inside a
        // forward-secure ephemeral envelope. Inner and outer share one
        // counter draw; their keys differ.
        let identity_key = SealingKey::precompute(&self.server_key, local_secret)?;
        let session_key = SealingKey::precompute(&es_public, &ephemeral_secret)?;
        let c2 = self.core.next_counter()?;
        let nonce = base.at(c2);

        let mut proof = Vec::with_capacity(KEY_LEN + CHALLENGE_LEN);
        proof.extend_from_slice(&ec_public);
        proof.extend_from_slice(stag);
        let inner = identity_key.seal(&nonce, &proof)?;

        let mut envelope = Vec::with_capacity(KEY_LEN + inner.len());
        envelope.extend_from_slice(local.public());
        envelope.extend_from_slice(&inner);
        let outer = session_key.seal(&nonce, &envelope)?;
        self.core.write_raw_block(c2, &outer)?;

        self.core.key = Some(session_key);
        debug!(assoc_id = self.core.assoc_id, "client handshake complete");
        Ok(())
    }
}

impl<T: Read + Write> Peer for ClientPeer<T> {
    fn handshake(&mut self) -> Result<(), PeerError> {
        self.ensure_established()
    }

    fn state(&self) -> PeerState {
        PeerState {
            peer_key: Some(self.server_key),
            assoc_id: self.core.assoc_id,
            counter: self.core.counter,
        }
    }

    fn close(&mut self) {
        self.core.close();
        self.local = None;
        self.packet_prefix = None;
    }
}

impl<T: Read + Write> Read for ClientPeer<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_established()?;
        Ok(self.core.read_into(buf)?)
    }
}

impl<T: Read + Write> Write for ClientPeer<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_established()?;
        let n = if let Some(prefix) = self.packet_prefix.clone() {
            let n = self.core.write_sealed(&prefix, buf)?;
            self.packet_prefix = None;
            n
        } else {
            self.core.write_sealed(&[], buf)?
        };
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.core.transport.flush()
    }
}
