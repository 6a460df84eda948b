//! In-memory transports for unit tests.

use std::io::{self, Cursor, Read, Write};
use std::sync::mpsc::{channel, Receiver, Sender};

/// One end of a bidirectional in-memory pipe.
pub(crate) struct Duplex {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// Two connected pipe ends. Dropping one end makes the other's reads
/// return EOF and its writes fail with `BrokenPipe`.
pub(crate) fn duplex() -> (Duplex, Duplex) {
    let (a_tx, a_rx) = channel();
    let (b_tx, b_rx) = channel();
    (
        Duplex {
            tx: a_tx,
            rx: b_rx,
            pending: Vec::new(),
        },
        Duplex {
            tx: b_tx,
            rx: a_rx,
            pending: Vec::new(),
        },
    )
}

impl Read for Duplex {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

impl Write for Duplex {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Write-only capture; reads report EOF.
#[derive(Default)]
pub(crate) struct Sink {
    captured: Vec<u8>,
}

impl Sink {
    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.captured
    }
}

impl Read for Sink {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.captured.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Replay captured wire bytes to a reader; writes are discarded.
pub(crate) fn replay(wire: Vec<u8>) -> Replay {
    Replay {
        cursor: Cursor::new(wire),
    }
}

pub(crate) struct Replay {
    cursor: Cursor<Vec<u8>>,
}

impl Read for Replay {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for Replay {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
