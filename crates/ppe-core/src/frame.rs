//! Length-prefixed encrypted block framing.
//!
//! The wire unit of a ppe session, all integers big-endian:
//!
//! ```text
//! [assoc_id (4B)] [counter (4B)] [length (2B)] [ciphertext (length bytes)]
//! ```
//!
//! `assoc_id` is a random per-session tag echoed in every block so
//! overlapping logical sessions on one transport can be told apart.
//! `counter` is the nonce counter the sender sealed this block with;
//! the receiver decrypts with the stamped value after replay-checking
//! it. The 16-bit length field is a hard wire-format limit: callers
//! chunk anything larger.
//!
//! Reads are exact or they fail. A byte-stream transport may deliver a
//! block in arbitrary pieces, so both the 10-byte header and the
//! payload are pulled with `read_exact`; running dry mid-block is
//! [`FrameError::Truncated`], never a partial success.

use std::io::{self, Read, Write};

use bytes::{BufMut, BytesMut};
use rand::rngs::OsRng;
use rand::RngCore;

/// Fixed size of the block header preceding the ciphertext.
pub const BLOCK_HEADER_LEN: usize = 10;

/// Largest payload one block can carry (the length field is 16 bits).
pub const MAX_BLOCK_PAYLOAD: usize = u16::MAX as usize;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("payload too large for one block: {0} bytes (max {MAX_BLOCK_PAYLOAD})")]
    PayloadTooLarge(usize),
    #[error("transport truncated mid-block")]
    Truncated,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Parsed block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub assoc_id: u32,
    pub counter: u32,
    pub len: u16,
}

/// Frame `payload` into one block and emit it with a single write.
///
/// The block is assembled in one buffer and written with one
/// `write_all` call so datagram transports send it as one packet.
pub fn write_block<W: Write>(
    w: &mut W,
    assoc_id: u32,
    counter: u32,
    payload: &[u8],
) -> Result<(), FrameError> {
    if payload.len() > MAX_BLOCK_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(BLOCK_HEADER_LEN + payload.len());
    buf.put_u32(assoc_id);
    buf.put_u32(counter);
    buf.put_u16(payload.len() as u16);
    buf.put_slice(payload);
    w.write_all(&buf)?;
    w.flush()?;
    Ok(())
}

/// Read exactly one block: 10 header bytes, then `length` payload bytes.
pub fn read_block<R: Read>(r: &mut R) -> Result<(BlockHeader, Vec<u8>), FrameError> {
    let mut header = [0u8; BLOCK_HEADER_LEN];
    read_exact_or_truncated(r, &mut header)?;

    let assoc_id = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let counter = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let len = u16::from_be_bytes([header[8], header[9]]);

    let mut payload = vec![0u8; len as usize];
    read_exact_or_truncated(r, &mut payload)?;

    Ok((
        BlockHeader {
            assoc_id,
            counter,
            len,
        },
        payload,
    ))
}

fn read_exact_or_truncated<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    r.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => FrameError::Truncated,
        _ => FrameError::Io(err),
    })
}

/// Random 32-bit association id for a fresh client session.
pub fn random_assoc_id() -> u32 {
    OsRng.next_u32()
}
