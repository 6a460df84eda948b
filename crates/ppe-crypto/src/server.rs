//! Server side of the handshake and transport.
//!
//! The server does not know which long-term key the client addressed:
//! the first message carries only a 2-byte key id, and distinct keys
//! can share one. Every candidate under the id is trial-decrypted in
//! pool insertion order; the first that opens the message wins, and a
//! pool with no opener rejects the session.

use std::io::{self, Read, Write};
use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, trace};

use ppe_core::Mode;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::client::CHALLENGE_LEN;
use crate::identity::{KeyId, KEY_ID_LEN, KEY_LEN};
use crate::nonce::NonceBase;
use crate::pool::KeyPool;
use crate::sealing::SealingKey;
use crate::session::{Peer, PeerState, Phase, SessionCore};
use crate::window::ReplayWindow;
use crate::PeerError;

pub struct ServerPeer<T> {
    core: SessionCore<T>,
    pool: Arc<KeyPool>,
    /// Client long-term public key, learned in stream mode.
    client_key: Option<[u8; KEY_LEN]>,
}

impl<T: Read + Write> ServerPeer<T> {
    /// The pool must be fully provisioned before the first handshake;
    /// it is shared read-only across sessions.
    pub fn new(mode: Mode, transport: T, pool: Arc<KeyPool>) -> Self {
        Self {
            // Association id is adopted from the client's first block.
            core: SessionCore::new(transport, mode, 0),
            pool,
            client_key: None,
        }
    }

    /// Like [`Self::new`] with a caller-sized replay window on the
    /// receive path.
    pub fn with_window(mode: Mode, transport: T, pool: Arc<KeyPool>, window: ReplayWindow) -> Self {
        let mut peer = Self::new(mode, transport, pool);
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
                self.client_key = None;
                Err(err)
            }
        }
    }

    fn run_handshake(&mut self) -> Result<(), PeerError> {
        let (header, payload) = self.core.read_raw_block()?;
        if payload.len() < KEY_ID_LEN + KEY_LEN {
            return Err(PeerError::Malformed("first handshake block too short"));
        }
        let id = KeyId::from_bytes([payload[0], payload[1]]);
        let mut ec_public = [0u8; KEY_LEN];
        ec_public.copy_from_slice(&payload[KEY_ID_LEN..KEY_ID_LEN + KEY_LEN]);
        let sealed = &payload[KEY_ID_LEN + KEY_LEN..];

        // The 2-byte id does not disambiguate the key; try every
        // candidate in pool order until one opens the message.
        let mut opened = None;
        for pair in self.pool.get(id) {
            let Some(secret) = pair.secret() else {
                continue;
            };
            let mut seed = Vec::with_capacity(KEY_LEN * 2);
            seed.extend_from_slice(&ec_public);
            seed.extend_from_slice(pair.public());
            let base = NonceBase::derive(&seed);
            let handshake_key = SealingKey::precompute(&ec_public, secret)?;
            match handshake_key.open(&base.at(header.counter), sealed) {
                Ok(text) => {
                    opened = Some((text, base, handshake_key, pair.clone()));
                    break;
                }
                Err(_) => trace!(%id, "candidate key failed, trying next"),
            }
        }
        let Some((text, base, handshake_key, pair)) = opened else {
            return Err(PeerError::PoolExhausted(id));
        };
        self.core.nonce_base = Some(base);
        self.core.accept_counter(header.counter);

        if self.core.mode == Mode::Packet {
            // The plaintext is already the first application payload;
            // no response, and the handshake secret stays the session
            // key.
            self.core.key = Some(handshake_key);
            self.core.stash_plaintext(text);
            debug!(assoc_id = self.core.assoc_id, "packet-mode session accepted");
            return Ok(());
        }

        if text.len() != CHALLENGE_LEN {
            return Err(PeerError::Malformed("client challenge length"));
        }
        let ctag = text;
        let server_secret = pair
            .secret()
            .ok_or(PeerError::KeyAgreement("pool entry missing private key"))?;

        let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
        let es_public = PublicKey::from(&ephemeral_secret).to_bytes();
        let mut stag = [0u8; CHALLENGE_LEN];
        OsRng.fill_bytes(&mut stag);

        // Message 2: ES ‖ Ctag ‖ Stag under the handshake secret.
        let c1 = self.core.next_counter()?;
        let mut msg2 = Vec::with_capacity(KEY_LEN + CHALLENGE_LEN * 2);
        msg2.extend_from_slice(&es_public);
        msg2.extend_from_slice(&ctag);
        msg2.extend_from_slice(&stag);
        let sealed2 = handshake_key.seal(&base.at(c1), &msg2)?;
        self.core.write_raw_block(c1, &sealed2)?;

        // Message 3: outer envelope under the ephemeral pair, inner
        // possession proof under the client's long-term key. One
        // stamped counter opens both layers.
        let (header, payload) = self.core.read_raw_block()?;
        let session_key = SealingKey::precompute(&ec_public, &ephemeral_secret)?;
        let nonce = base.at(header.counter);
        let envelope = session_key.open(&nonce, &payload)?;
        self.core.accept_counter(header.counter);
        if envelope.len() < KEY_LEN {
            return Err(PeerError::Malformed("identity envelope too short"));
        }
        let mut client_key = [0u8; KEY_LEN];
        client_key.copy_from_slice(&envelope[..KEY_LEN]);

        let identity_key = SealingKey::precompute(&client_key, server_secret)?;
        let proof = identity_key.open(&nonce, &envelope[KEY_LEN..])?;
        if proof.len() != KEY_LEN + CHALLENGE_LEN {
            return Err(PeerError::Malformed("possession proof length"));
        }
        // The echoed EC binds the proof to this session's ephemeral
        // key; the echoed Stag rules out replays of an older proof.
        if proof[..KEY_LEN] != ec_public || proof[KEY_LEN..] != stag {
            return Err(PeerError::Authentication);
        }

        self.client_key = Some(client_key);
        self.core.key = Some(session_key);
        debug!(assoc_id = self.core.assoc_id, "server handshake complete");
        Ok(())
    }
}

impl<T: Read + Write> Peer for ServerPeer<T> {
    fn handshake(&mut self) -> Result<(), PeerError> {
        self.ensure_established()
    }

    fn state(&self) -> PeerState {
        PeerState {
            peer_key: self.client_key,
            assoc_id: self.core.assoc_id,
            counter: self.core.counter,
        }
    }

    fn close(&mut self) {
        self.core.close();
        self.client_key = None;
    }
}

impl<T: Read + Write> Read for ServerPeer<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_established()?;
        Ok(self.core.read_into(buf)?)
    }
}

impl<T: Read + Write> Write for ServerPeer<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.core.mode == Mode::Packet {
            // Packet mode cannot initiate: the session key exists only
            // after the client's first block has been read.
            match self.core.phase {
                Phase::Established => {}
                Phase::Closed => return Err(PeerError::Closed.into()),
                _ => return Err(PeerError::NotEstablished.into()),
            }
        } else {
            self.ensure_established()?;
        }
        Ok(self.core.write_sealed(&[], buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.core.transport.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientPeer;
    use crate::identity::KeyPair;
    use crate::testutil::duplex;
    use std::thread;

    fn server_pool(pairs: &[KeyPair]) -> Arc<KeyPool> {
        let mut pool = KeyPool::new();
        for pair in pairs {
            pool.add_key(pair.clone());
        }
        Arc::new(pool)
    }

    #[test]
    fn colliding_ids_are_tried_in_order() {
        let server_pair = KeyPair::generate();
        let decoy = KeyPair::generate();

        // Manufacture a collision: the decoy sits first under the
        // server key's id, so the handshake must fall through it.
        let mut pool = KeyPool::new();
        pool.add_key_under(server_pair.id(), decoy);
        pool.add_key_under(server_pair.id(), server_pair.clone());
        let pool = Arc::new(pool);

        let (client_t, server_t) = duplex();
        let mut client = ClientPeer::new(Mode::Stream, client_t, None, *server_pair.public());
        let mut server = ServerPeer::new(Mode::Stream, server_t, pool);

        let handle = thread::spawn(move || {
            server.handshake().map(|_| server.state())
        });
        client.handshake().unwrap();
        let state = handle.join().unwrap().unwrap();
        assert!(state.peer_key.is_some());
    }

    #[test]
    fn exhausted_pool_rejects_the_session() {
        let server_pair = KeyPair::generate();
        let wrong = KeyPair::generate();

        // Only a wrong key sits under the addressed id.
        let mut pool = KeyPool::new();
        pool.add_key_under(server_pair.id(), wrong);
        let pool = Arc::new(pool);

        let (client_t, server_t) = duplex();
        let mut client = ClientPeer::new(Mode::Stream, client_t, None, *server_pair.public());
        let mut server = ServerPeer::new(Mode::Stream, server_t, pool);

        let handle = thread::spawn(move || {
            let err = server.handshake().unwrap_err();
            assert!(matches!(err, PeerError::PoolExhausted(_)));
            // The failure is terminal.
            assert!(matches!(
                server.handshake().unwrap_err(),
                PeerError::HandshakeFailed
            ));
        });
        // The client blocks on message 2 and errors once the rejecting
        // server hangs up.
        let _ = client.handshake();
        handle.join().unwrap();
    }

    #[test]
    fn public_only_entries_are_skipped() {
        let server_pair = KeyPair::generate();

        let mut pool = KeyPool::new();
        pool.add_key_under(server_pair.id(), KeyPair::public_only(*server_pair.public()));
        pool.add_key_under(server_pair.id(), server_pair.clone());
        let pool = Arc::new(pool);

        let (client_t, server_t) = duplex();
        let mut client = ClientPeer::new(Mode::Stream, client_t, None, *server_pair.public());
        let mut server = ServerPeer::new(Mode::Stream, server_t, pool);

        let handle = thread::spawn(move || server.handshake());
        client.handshake().unwrap();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn tampered_first_block_is_rejected() {
        let server_pair = KeyPair::generate();
        let pool = server_pool(&[server_pair.clone()]);

        // Capture a packet-mode first block offline, then corrupt its
        // ciphertext tail before handing it to the server.
        let mut capture = crate::testutil::Sink::default();
        {
            let mut client =
                ClientPeer::new(Mode::Packet, &mut capture, None, *server_pair.public());
            client.write_all(b"first payload").unwrap();
        }
        let mut wire = capture.into_bytes();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let mut server =
            ServerPeer::new(Mode::Packet, crate::testutil::replay(wire), pool);
        let err = server.handshake().unwrap_err();
        assert!(matches!(err, PeerError::PoolExhausted(_)));
    }
}
