//! UDP socket as a byte stream.
//!
//! The block framer consumes its transport through `read_exact`, which
//! needs byte-stream semantics; a datagram socket delivers whole
//! packets. [`UdpTransport`] bridges the two: each `write` goes out as
//! a single datagram, and each received datagram is buffered and served
//! out in whatever sized reads the caller asks for.
//!
//! Server sockets are typically unconnected. The first datagram that
//! arrives latches the remote address, and subsequent writes are sent
//! back to it; a connected client socket just uses `send`.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};

use tracing::debug;

use crate::frame::{BLOCK_HEADER_LEN, MAX_BLOCK_PAYLOAD};

pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    recv_buf: Vec<u8>,
    pending: VecDeque<u8>,
}

impl UdpTransport {
    /// Default receive buffer, sized for a maximal framed block.
    /// Real datagrams are capped well below this by the IP layer.
    pub const DEFAULT_RECV_BUF: usize = BLOCK_HEADER_LEN + MAX_BLOCK_PAYLOAD;

    pub fn new(socket: UdpSocket) -> Self {
        Self::with_recv_buf(socket, Self::DEFAULT_RECV_BUF)
    }

    /// `recv_buf` bounds the largest datagram that can be received;
    /// anything longer is truncated by the OS.
    pub fn with_recv_buf(socket: UdpSocket, recv_buf: usize) -> Self {
        Self {
            socket,
            peer: None,
            recv_buf: vec![0u8; recv_buf],
            pending: VecDeque::new(),
        }
    }

    /// Remote address learned from the last latching datagram, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }
}

impl Read for UdpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            let (n, from) = self.socket.recv_from(&mut self.recv_buf)?;
            if self.peer != Some(from) {
                debug!(%from, "latched datagram peer");
                self.peer = Some(from);
            }
            self.pending.extend(&self.recv_buf[..n]);
        }
        let n = buf.len().min(self.pending.len());
        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for UdpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.peer {
            Some(addr) => self.socket.send_to(buf, addr),
            None => self.socket.send(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback_pair() -> (UdpTransport, UdpTransport) {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.connect(server.local_addr().unwrap()).unwrap();
        for sock in [&server, &client] {
            sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        }
        (UdpTransport::new(client), UdpTransport::new(server))
    }

    #[test]
    fn default_buffer_fits_a_maximal_block() {
        assert!(UdpTransport::DEFAULT_RECV_BUF >= BLOCK_HEADER_LEN + MAX_BLOCK_PAYLOAD);
    }

    #[test]
    fn datagram_served_in_partial_reads() {
        let (mut client, mut server) = loopback_pair();

        client.write_all(b"hello datagram").unwrap();

        let mut head = [0u8; 5];
        server.read_exact(&mut head).unwrap();
        assert_eq!(&head, b"hello");

        let mut rest = [0u8; 9];
        server.read_exact(&mut rest).unwrap();
        assert_eq!(&rest, b" datagram");
    }

    #[test]
    fn server_replies_to_latched_peer() {
        let (mut client, mut server) = loopback_pair();

        client.write_all(b"ping").unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert!(server.peer_addr().is_some());

        server.write_all(b"pong").unwrap();
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }
}
