//! Mock transport for testing

use super::Transport;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// In-memory transport; clones share the same buffers
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    /// Bytes the peer will still accept; `None` is unlimited
    write_capacity: Option<usize>,
    peer_closed: bool,
    shut_down: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                write_capacity: None,
                peer_closed: false,
                shut_down: false,
            })),
        }
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Take all written data
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().write_buffer)
    }

    /// Limit how many more bytes writes accept (`None` for unlimited)
    pub fn set_write_capacity(&self, capacity: Option<usize>) {
        self.inner.lock().write_capacity = capacity;
    }

    /// Simulate the peer closing its end once pending reads are drained
    pub fn close_peer(&self) {
        self.inner.lock().peer_closed = true;
    }

    /// True once the server side shut the transport down
    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.read_buffer.is_empty() && inner.peer_closed {
            return Err(Error::Disconnected);
        }
        let available = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.peer_closed {
            return Err(Error::Disconnected);
        }
        let n = inner.write_capacity.map_or(data.len(), |c| c.min(data.len()));
        if let Some(capacity) = inner.write_capacity.as_mut() {
            *capacity -= n;
        }
        inner.write_buffer.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn peer(&self) -> String {
        "mock".to_string()
    }

    fn shutdown(&mut self) {
        self.inner.lock().shut_down = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let mock = MockTransport::new();
        let mut transport = mock.clone();
        mock.inject_read(&[1, 2, 3]);

        let mut buf = [0u8; 2];
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(transport.read(&mut buf).unwrap(), 1);
        assert_eq!(transport.read(&mut buf).unwrap(), 0);

        transport.write(&[9, 8]).unwrap();
        assert_eq!(mock.take_written(), vec![9, 8]);
    }

    #[test]
    fn test_write_capacity() {
        let mock = MockTransport::new();
        let mut transport = mock.clone();
        mock.set_write_capacity(Some(3));
        assert_eq!(transport.write(&[1, 2, 3, 4, 5]).unwrap(), 3);
        assert_eq!(transport.write(&[4, 5]).unwrap(), 0);
        mock.set_write_capacity(None);
        assert_eq!(transport.write(&[4, 5]).unwrap(), 2);
        assert_eq!(mock.get_written(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_peer_close_after_drain() {
        let mock = MockTransport::new();
        let mut transport = mock.clone();
        mock.inject_read(&[7]);
        mock.close_peer();
        let mut buf = [0u8; 4];
        assert_eq!(transport.read(&mut buf).unwrap(), 1);
        assert!(matches!(transport.read(&mut buf), Err(Error::Disconnected)));
    }
}
