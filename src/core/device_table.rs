//! Device table: registry of devices, their access modes and grants

use crate::core::driver::DriverRef;
use crate::core::port::DevicePort;
use crate::core::types::{AccessMode, DeviceAddress};
use crate::error::{Error, Result};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifier of a client session
pub type SessionId = u64;

/// Default capacity of a device's configuration request queue
pub const DEFAULT_REQUEST_QUEUE_LEN: usize = 8;

/// A configuration request waiting for its driver
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub session: SessionId,
    pub tag: u32,
    pub payload: Vec<u8>,
}

/// Outcome of an access negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// Mode actually granted; `Error` when the request was denied
    pub mode: AccessMode,
    /// The session held write access before and no longer does
    pub released_write: bool,
}

/// A registered device
pub struct DeviceEntry {
    address: DeviceAddress,
    access: AccessMode,
    driver: DriverRef,
    port: DevicePort,
    requests: Arc<ArrayQueue<PendingRequest>>,
    writer: Option<SessionId>,
    subscribers: usize,
}

impl DeviceEntry {
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    pub fn driver(&self) -> &DriverRef {
        &self.driver
    }

    pub fn port(&self) -> &DevicePort {
        &self.port
    }

    pub fn writer(&self) -> Option<SessionId> {
        self.writer
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers
    }
}

/// Configuration requests of one device, detached from the table lock
pub struct RequestQueue {
    pub address: DeviceAddress,
    pub driver: DriverRef,
    pub queue: Arc<ArrayQueue<PendingRequest>>,
}

/// Registry of all devices served by one server instance
pub struct DeviceTable {
    entries: Mutex<HashMap<DeviceAddress, DeviceEntry>>,
    request_queue_len: usize,
}

impl DeviceTable {
    pub fn new(request_queue_len: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            request_queue_len: request_queue_len.max(1),
        }
    }

    /// Register a device. Fails if the address is taken.
    pub fn add_device(
        &self,
        address: DeviceAddress,
        access: AccessMode,
        driver: DriverRef,
        port: DevicePort,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&address) {
            return Err(Error::DuplicateAddress(address));
        }
        entries.insert(
            address,
            DeviceEntry {
                address,
                access,
                driver,
                port,
                requests: Arc::new(ArrayQueue::new(self.request_queue_len)),
                writer: None,
                subscribers: 0,
            },
        );
        Ok(())
    }

    /// Unregister a device, dropping its subscription counts from the driver
    pub fn remove_device(&self, address: DeviceAddress) -> Result<DeviceEntry> {
        let entry = self
            .entries
            .lock()
            .remove(&address)
            .ok_or(Error::DeviceNotFound(address))?;
        for _ in 0..entry.subscribers {
            entry.driver.unsubscribe();
        }
        Ok(entry)
    }

    pub fn contains(&self, address: DeviceAddress) -> bool {
        self.entries.lock().contains_key(&address)
    }

    pub fn driver(&self, address: DeviceAddress) -> Option<DriverRef> {
        self.entries
            .lock()
            .get(&address)
            .map(|e| Arc::clone(&e.driver))
    }

    pub fn driver_name(&self, address: DeviceAddress) -> Option<String> {
        self.entries
            .lock()
            .get(&address)
            .map(|e| e.driver.name().to_string())
    }

    pub fn port(&self, address: DeviceAddress) -> Option<DevicePort> {
        self.entries.lock().get(&address).map(|e| e.port.clone())
    }

    pub fn access(&self, address: DeviceAddress) -> Option<AccessMode> {
        self.entries.lock().get(&address).map(|e| e.access)
    }

    /// Change what a device allows. Returns the previous mode.
    ///
    /// Write ownership is dropped when the new mode forbids writing; callers
    /// are responsible for narrowing existing session grants.
    pub fn set_access(&self, address: DeviceAddress, mode: AccessMode) -> Result<AccessMode> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&address)
            .ok_or(Error::DeviceNotFound(address))?;
        let previous = entry.access;
        entry.access = mode;
        if !mode.can_write() {
            entry.writer = None;
        }
        Ok(previous)
    }

    pub fn writer(&self, address: DeviceAddress) -> Option<SessionId> {
        self.entries.lock().get(&address).and_then(|e| e.writer)
    }

    pub fn subscribers(&self, address: DeviceAddress) -> usize {
        self.entries
            .lock()
            .get(&address)
            .map_or(0, |e| e.subscribers)
    }

    /// Resolve a session's access request.
    ///
    /// Reads are shared, writes are exclusive. The grant may be smaller than
    /// the request; when nothing requested can be granted the result is
    /// `AccessMode::Error` and the session's previous grant is released.
    pub fn negotiate(
        &self,
        address: DeviceAddress,
        session: SessionId,
        current: AccessMode,
        requested: AccessMode,
    ) -> Result<Grant> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&address)
            .ok_or(Error::DeviceNotFound(address))?;

        let held_write = entry.writer == Some(session);
        let read_ok = requested.can_read() && entry.access.can_read();
        let write_ok = requested.can_write()
            && entry.access.can_write()
            && (entry.writer.is_none() || held_write);

        let granted = AccessMode::from_parts(read_ok, write_ok);
        let released_write = held_write && !write_ok;
        if write_ok {
            entry.writer = Some(session);
        } else if held_write {
            entry.writer = None;
        }

        match (current.is_open(), granted.is_open()) {
            (false, true) => {
                entry.subscribers += 1;
                entry.driver.subscribe();
            }
            (true, false) => {
                entry.subscribers = entry.subscribers.saturating_sub(1);
                entry.driver.unsubscribe();
            }
            _ => {}
        }

        let mode = if granted == AccessMode::Closed && requested != AccessMode::Closed {
            AccessMode::Error
        } else {
            granted
        };
        log::debug!(
            "session {} on {}: requested {}, granted {}",
            session,
            address,
            requested,
            mode
        );
        Ok(Grant {
            mode,
            released_write,
        })
    }

    /// Drop every grant a closing session holds.
    ///
    /// Returns the devices whose write access the session gave up. Devices
    /// removed in the meantime are skipped.
    pub fn release_all(&self, session: SessionId, grants: &[(DeviceAddress, AccessMode)]) -> Vec<DeviceAddress> {
        grants
            .iter()
            .filter_map(|&(address, held)| {
                self.negotiate(address, session, held, AccessMode::Closed)
                    .ok()
                    .filter(|grant| grant.released_write)
                    .map(|_| address)
            })
            .collect()
    }

    /// Queue a configuration request for the device's driver
    pub fn queue_request(&self, address: DeviceAddress, request: PendingRequest) -> Result<()> {
        let queue = self
            .entries
            .lock()
            .get(&address)
            .map(|e| Arc::clone(&e.requests))
            .ok_or(Error::DeviceNotFound(address))?;
        queue
            .push(request)
            .map_err(|_| Error::QueueFull("configuration requests"))
    }

    /// Oldest pending configuration request of a device
    pub fn pop_request(&self, address: DeviceAddress) -> Option<PendingRequest> {
        let queue = self.entries.lock().get(&address).map(|e| Arc::clone(&e.requests))?;
        queue.pop()
    }

    /// Queues that currently hold requests
    pub fn pending_requests(&self) -> Vec<RequestQueue> {
        let entries = self.entries.lock();
        let mut queues: Vec<RequestQueue> = entries
            .values()
            .filter(|e| !e.requests.is_empty())
            .map(|e| RequestQueue {
                address: e.address,
                driver: Arc::clone(&e.driver),
                queue: Arc::clone(&e.requests),
            })
            .collect();
        queues.sort_by_key(|q| q.address);
        queues
    }

    /// All registered addresses, sorted
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        let mut addrs: Vec<_> = self.entries.lock().keys().copied().collect();
        addrs.sort();
        addrs
    }

    /// Distinct drivers backing the registered devices
    pub fn drivers(&self) -> Vec<DriverRef> {
        let entries = self.entries.lock();
        let mut drivers: Vec<DriverRef> = Vec::new();
        for entry in entries.values() {
            if !drivers.iter().any(|d| Arc::ptr_eq(d, &entry.driver)) {
                drivers.push(Arc::clone(&entry.driver));
            }
        }
        drivers
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_QUEUE_LEN)
    }
}
