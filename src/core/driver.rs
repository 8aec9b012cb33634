//! Driver trait definition and the helpers drivers are built from

use crate::core::port::DevicePorts;
use crate::core::types::{DeviceAddress, Interface};
use crate::error::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Reply to a synchronous configuration request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigReply {
    /// Request handled; payload is sent back to the client
    Ack(Vec<u8>),
    /// Request refused or not understood
    Nack,
}

/// Device driver trait for hardware and simulated devices
///
/// A driver provides one or more devices. The server creates a
/// [`DevicePort`](crate::core::port::DevicePort) per provided address and
/// hands them to [`setup`](Driver::setup). Threaded drivers spawn their
/// producer loop there (see [`DriverThread`]); non-threaded drivers refresh
/// their data from [`update`](Driver::update), which the client manager calls
/// once per cycle while the driver has subscribers.
pub trait Driver: Send {
    /// Driver name as used in configuration
    fn name(&self) -> &str;

    /// Size in bytes of a command for the given interface, `None` if the
    /// interface takes no commands
    fn command_size(&self, _interface: Interface) -> Option<usize> {
        None
    }

    /// Acquire resources and start producing data
    fn setup(&mut self, ports: &DevicePorts) -> Result<()>;

    /// Release resources. Must tolerate being called after a failed setup
    /// and being called twice.
    fn shutdown(&mut self) -> Result<()>;

    /// Poll hook for drivers without their own thread
    fn update(&mut self) {}

    /// Handle a configuration request for one of the driver's devices.
    ///
    /// Runs on the client manager thread, so it must return promptly.
    fn handle_config(&mut self, _address: DeviceAddress, _request: &[u8]) -> ConfigReply {
        ConfigReply::Nack
    }

    /// Command that brings the device to a safe state once its writer leaves
    fn stop_command(&self, _interface: Interface) -> Option<Vec<u8>> {
        None
    }

    /// One line debug description
    fn describe(&self) -> String {
        self.name().to_string()
    }
}

/// A driver together with its lock and subscription count
pub struct DriverCell {
    name: String,
    driver: Mutex<Box<dyn Driver>>,
    subscriptions: AtomicUsize,
}

/// Shared handle to a registered driver
pub type DriverRef = Arc<DriverCell>;

impl DriverCell {
    pub fn new(driver: Box<dyn Driver>) -> DriverRef {
        Arc::new(Self {
            name: driver.name().to_string(),
            driver: Mutex::new(driver),
            subscriptions: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Driver>> {
        self.driver.lock()
    }

    /// Number of open subscriptions across all of the driver's devices
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::Acquire)
    }

    pub(crate) fn subscribe(&self) -> usize {
        self.subscriptions.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn unsubscribe(&self) -> usize {
        let prev = self
            .subscriptions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }
}

/// Stop signal shared with a driver thread
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Sleep for `duration` in short slices. Returns false if stopped meanwhile.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }
}

/// Background producer loop of a threaded driver.
///
/// Stops and joins the thread on [`stop`](Self::stop) or drop.
pub struct DriverThread {
    name: String,
    stop: StopFlag,
    handle: Option<JoinHandle<()>>,
}

impl DriverThread {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(StopFlag) + Send + 'static,
    {
        let stop = StopFlag::default();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_stop))
            .map_err(|e| Error::Other(format!("Failed to spawn {} thread: {}", name, e)))?;

        Ok(Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stop(&mut self) {
        self.stop.set();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("{} thread panicked", self.name);
        }
    }
}

impl Drop for DriverThread {
    fn drop(&mut self) {
        self.stop();
    }
}
