//! Core ppe wire types: transport modes, encrypted block framing, and
//! the UDP byte-stream adapter.
//!
//! This crate knows nothing about keys or ciphers. It defines the wire
//! unit everything travels in (see [`frame`]) and the plumbing that
//! lets the framer run over a datagram socket (see [`udp`]). The
//! handshake and sealing logic live in `ppe-crypto`.

#![forbid(unsafe_code)]

pub mod frame;
pub mod udp;

pub use frame::{
    random_assoc_id, read_block, write_block, BlockHeader, FrameError, BLOCK_HEADER_LEN,
    MAX_BLOCK_PAYLOAD,
};
pub use udp::UdpTransport;

/// How a session rides its transport.
///
/// Stream mode performs the full three-message mutual-authentication
/// handshake before any data flows. Packet mode folds key
/// identification into the first payload with no round trip, trading
/// authentication strength and first-message forward secrecy for zero
/// added latency on datagram transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Stream,
    Packet,
}
