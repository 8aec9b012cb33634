//! Transport layer for client connections
//!
//! Sessions talk to a [`Transport`] instead of a socket so the client manager
//! can be driven from tests with [`MockTransport`]. Transports backed by a
//! socket expose it as a [`mio::event::Source`] for the manager's poller.

use crate::error::{Error, Result};
use mio::event::Source;
use mio::net::TcpStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

mod mock;
pub use mock::MockTransport;

/// Non-blocking byte stream to one client
pub trait Transport: Send {
    /// Read available bytes. `Ok(0)` means nothing is available right now;
    /// a closed peer is reported as [`Error::Disconnected`].
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write as much of `data` as the peer accepts without blocking
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes
    fn flush(&mut self) -> Result<()>;

    /// Peer description for logs
    fn peer(&self) -> String;

    /// Close both directions
    fn shutdown(&mut self) {}

    /// Socket to watch for readiness; `None` when there is nothing to poll
    fn source(&mut self) -> Option<&mut dyn Source> {
        None
    }
}

/// Accepted TCP connection; always non-blocking
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }
        Self { stream, peer }
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.stream.read(buffer) {
            Ok(0) => Err(Error::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self.stream.write(data) {
            Ok(0) if !data.is_empty() => Err(Error::Disconnected),
            Ok(n) => Ok(n),
            Err(e) if would_block(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self.stream.flush() {
            Err(e) if !would_block(&e) => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn source(&mut self) -> Option<&mut dyn Source> {
        Some(&mut self.stream)
    }
}

fn would_block(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
