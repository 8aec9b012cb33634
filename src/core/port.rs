//! Per-device buffers shared between a driver and the client manager
//!
//! A [`DevicePort`] is the only channel between a driver's producer thread
//! and the client side. Data is double buffered: the producer fills its own
//! buffer and swaps it into the front slot under the port mutex, readers copy
//! the front slot out. Commands land in a single slot whose size is fixed by
//! the driver; anything else is dropped before it can reach the driver.
//!
//! Publishing signals the client manager through a [`WakeSender`]: the
//! address goes on a channel and the manager's poller is woken.

use crate::core::types::{DeviceAddress, Interface, Timestamp};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use mio::Waker;
use parking_lot::Mutex;
use std::sync::Arc;

/// Capacity of the wake channel from drivers to the client manager
pub const WAKE_CHANNEL_CAPACITY: usize = 256;

/// Create the channel drivers use to signal freshly published data.
/// With a `waker`, every signal also interrupts the manager's poll.
pub fn create_wake_channel(waker: Option<Arc<Waker>>) -> (WakeSender, Receiver<DeviceAddress>) {
    let (tx, rx) = crossbeam_channel::bounded(WAKE_CHANNEL_CAPACITY);
    (WakeSender { tx, waker }, rx)
}

/// Producer end of the wake channel
#[derive(Clone)]
pub struct WakeSender {
    tx: Sender<DeviceAddress>,
    waker: Option<Arc<Waker>>,
}

impl WakeSender {
    /// Tell the manager that `address` has a new sample
    pub fn notify(&self, address: DeviceAddress) {
        match self.tx.try_send(address) {
            // a full channel is drained on the wakeup already owed
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::trace!("{}: wake channel closed", address);
                return;
            }
        }
        if let Some(waker) = &self.waker
            && let Err(e) = waker.wake()
        {
            log::warn!("{}: failed to wake client manager: {}", address, e);
        }
    }
}

/// Result of copying a sample out of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSample {
    /// Bytes written into the destination buffer
    pub len: usize,
    /// Timestamp the sample was published with
    pub timestamp: Timestamp,
}

struct DataSlot {
    front: Vec<u8>,
    timestamp: Timestamp,
    published: bool,
}

struct CommandSlot {
    bytes: Vec<u8>,
    fresh: bool,
    present: bool,
}

struct PortInner {
    address: DeviceAddress,
    command_size: Option<usize>,
    data: Mutex<DataSlot>,
    command: Mutex<CommandSlot>,
    notify: Option<WakeSender>,
}

/// Cloneable handle to one device's data and command buffers
#[derive(Clone)]
pub struct DevicePort {
    inner: Arc<PortInner>,
}

impl DevicePort {
    /// Create a port. `command_size` of `None` means the device takes no commands.
    pub fn new(
        address: DeviceAddress,
        command_size: Option<usize>,
        notify: Option<WakeSender>,
    ) -> Self {
        Self {
            inner: Arc::new(PortInner {
                address,
                command_size,
                data: Mutex::new(DataSlot {
                    front: Vec::new(),
                    timestamp: Timestamp::ZERO,
                    published: false,
                }),
                command: Mutex::new(CommandSlot {
                    bytes: Vec::new(),
                    fresh: false,
                    present: false,
                }),
                notify,
            }),
        }
    }

    #[inline]
    pub fn address(&self) -> DeviceAddress {
        self.inner.address
    }

    #[inline]
    pub fn command_size(&self) -> Option<usize> {
        self.inner.command_size
    }

    /// Publish a new sample by swapping `buf` into the front slot.
    ///
    /// On return `buf` holds the previous sample so the producer can reuse the
    /// allocation. The stored timestamp is forced to be strictly increasing.
    pub fn publish(&self, buf: &mut Vec<u8>, timestamp: Option<Timestamp>) -> Timestamp {
        let stamp = {
            let mut slot = self.inner.data.lock();
            let stamp = timestamp.unwrap_or_else(Timestamp::now).after(slot.timestamp);
            std::mem::swap(&mut slot.front, buf);
            slot.timestamp = stamp;
            slot.published = true;
            stamp
        };

        if let Some(notify) = &self.inner.notify {
            notify.notify(self.inner.address);
        }
        stamp
    }

    /// Publish a copy of `bytes`
    pub fn put_data(&self, bytes: &[u8], timestamp: Option<Timestamp>) -> Timestamp {
        let mut buf = bytes.to_vec();
        self.publish(&mut buf, timestamp)
    }

    /// Copy the latest complete sample into `dest`.
    ///
    /// Returns `None` when nothing has been published yet or the sample does
    /// not fit in `dest`.
    pub fn get_data(&self, dest: &mut [u8]) -> Option<DataSample> {
        let slot = self.inner.data.lock();
        if !slot.published {
            return None;
        }
        let len = slot.front.len();
        if len > dest.len() {
            log::warn!(
                "{}: sample of {} bytes exceeds {} byte limit, skipped",
                self.inner.address,
                len,
                dest.len()
            );
            return None;
        }
        dest[..len].copy_from_slice(&slot.front);
        Some(DataSample {
            len,
            timestamp: slot.timestamp,
        })
    }

    /// Timestamp of the latest sample, if any
    pub fn timestamp(&self) -> Option<Timestamp> {
        let slot = self.inner.data.lock();
        slot.published.then_some(slot.timestamp)
    }

    /// Store a command for the driver.
    ///
    /// The command must be exactly the driver's command size; otherwise it is
    /// dropped and the slot keeps its previous contents.
    pub fn put_command(&self, src: &[u8]) -> Result<()> {
        let address = self.inner.address;
        let expected = self
            .inner
            .command_size
            .ok_or(Error::NotWritable(address))?;
        if src.len() != expected {
            return Err(Error::CommandSize {
                address,
                expected,
                actual: src.len(),
            });
        }

        let mut slot = self.inner.command.lock();
        slot.bytes.clear();
        slot.bytes.extend_from_slice(src);
        slot.fresh = true;
        slot.present = true;
        Ok(())
    }

    /// Take the latest command if it has not been taken yet
    pub fn take_command(&self) -> Option<Vec<u8>> {
        let mut slot = self.inner.command.lock();
        if !slot.fresh {
            return None;
        }
        slot.fresh = false;
        Some(slot.bytes.clone())
    }

    /// Latest accepted command, taken or not
    pub fn last_command(&self) -> Option<Vec<u8>> {
        let slot = self.inner.command.lock();
        slot.present.then(|| slot.bytes.clone())
    }
}

/// The ports handed to a driver at setup, one per address it provides
#[derive(Clone, Default)]
pub struct DevicePorts {
    ports: Vec<DevicePort>,
}

impl DevicePorts {
    pub fn new(ports: Vec<DevicePort>) -> Self {
        Self { ports }
    }

    /// First port on the given interface
    pub fn get(&self, interface: Interface) -> Option<&DevicePort> {
        self.ports.iter().find(|p| p.address().interface == interface)
    }

    /// Like [`get`](Self::get), failing setup when the port is missing
    pub fn require(&self, interface: Interface) -> Result<DevicePort> {
        self.get(interface).cloned().ok_or_else(|| {
            Error::InitializationFailed(format!("driver was not given a {} device", interface))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &DevicePort> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_port() -> DevicePort {
        DevicePort::new(DeviceAddress::new(Interface::POSITION, 0), Some(4), None)
    }

    #[test]
    fn test_get_data_before_publish() {
        let port = position_port();
        let mut buf = [0u8; 16];
        assert!(port.get_data(&mut buf).is_none());
        assert!(port.timestamp().is_none());
    }

    #[test]
    fn test_publish_swaps_buffers() {
        let port = position_port();
        let mut producer = vec![1, 2, 3];
        port.publish(&mut producer, Some(Timestamp::new(5, 0)));
        assert!(producer.is_empty());

        producer.extend_from_slice(&[4, 5]);
        port.publish(&mut producer, Some(Timestamp::new(6, 0)));
        assert_eq!(producer, vec![1, 2, 3]);

        let mut buf = [0u8; 16];
        let sample = port.get_data(&mut buf).unwrap();
        assert_eq!(sample.len, 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(sample.timestamp, Timestamp::new(6, 0));
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let port = position_port();
        let t = Timestamp::new(100, 0);
        let first = port.put_data(&[1], Some(t));
        let second = port.put_data(&[2], Some(t));
        let third = port.put_data(&[3], Some(Timestamp::new(99, 0)));
        assert!(second > first);
        assert!(third > second);
    }

    #[test]
    fn test_oversized_sample_not_copied() {
        let port = position_port();
        port.put_data(&[0u8; 32], None);
        let mut buf = [0u8; 8];
        assert!(port.get_data(&mut buf).is_none());
    }

    #[test]
    fn test_wrong_size_command_leaves_slot_unchanged() {
        let port = position_port();
        port.put_command(&[1, 2, 3, 4]).unwrap();

        let err = port.put_command(&[9, 9, 9]).unwrap_err();
        assert!(matches!(
            err,
            Error::CommandSize {
                expected: 4,
                actual: 3,
                ..
            }
        ));
        assert!(port.put_command(&[9, 9, 9, 9, 9]).is_err());

        assert_eq!(port.last_command(), Some(vec![1, 2, 3, 4]));
        assert_eq!(port.take_command(), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_take_command_once() {
        let port = position_port();
        assert!(port.take_command().is_none());
        port.put_command(&[0, 0, 0, 1]).unwrap();
        assert!(port.take_command().is_some());
        assert!(port.take_command().is_none());
        assert_eq!(port.last_command(), Some(vec![0, 0, 0, 1]));
    }

    #[test]
    fn test_read_only_port_rejects_commands() {
        let port = DevicePort::new(DeviceAddress::new(Interface::SONAR, 0), None, None);
        assert!(matches!(
            port.put_command(&[0]),
            Err(Error::NotWritable(_))
        ));
    }

    #[test]
    fn test_publish_signals_wake_channel() {
        let (tx, rx) = create_wake_channel(None);
        let addr = DeviceAddress::new(Interface::LASER, 0);
        let port = DevicePort::new(addr, None, Some(tx));
        port.put_data(&[1, 2], None);
        assert_eq!(rx.try_recv().unwrap(), addr);
    }

    #[test]
    fn test_publish_wakes_poller() {
        let mut poll = mio::Poll::new().unwrap();
        let token = mio::Token(7);
        let waker = Arc::new(Waker::new(poll.registry(), token).unwrap());
        let (tx, rx) = create_wake_channel(Some(waker));
        let addr = DeviceAddress::new(Interface::SONAR, 0);
        let port = DevicePort::new(addr, None, Some(tx));

        port.put_data(&[3], None);
        let mut events = mio::Events::with_capacity(4);
        poll.poll(&mut events, Some(std::time::Duration::from_secs(5)))
            .unwrap();
        assert!(events.iter().any(|e| e.token() == token));
        assert_eq!(rx.try_recv().unwrap(), addr);
    }

    #[test]
    fn test_ports_lookup() {
        let ports = DevicePorts::new(vec![
            position_port(),
            DevicePort::new(DeviceAddress::new(Interface::SONAR, 1), None, None),
        ]);
        assert_eq!(ports.len(), 2);
        assert_eq!(
            ports.get(Interface::SONAR).map(|p| p.address().index),
            Some(1)
        );
        assert!(ports.require(Interface::LASER).is_err());
    }
}
