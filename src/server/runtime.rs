//! Server assembly and main loop
//!
//! [`ServerBuilder`] registers drivers (running their setup), binds the
//! listening sockets and yields a [`Server`]. The server either runs on the
//! calling thread until stopped through its controller, or on a dedicated
//! `client-manager` thread through [`Server::spawn`]. Runtime changes to the
//! device table go through [`ServerControl`] so that only the manager thread
//! ever touches sessions; each call wakes the manager's poller.

use crate::config::Config;
use crate::core::device_table::DeviceTable;
use crate::core::driver::Driver;
use crate::core::types::{AccessMode, DeviceAddress};
use crate::devices::create_driver;
use crate::error::{Error, Result};
use crate::server::manager::{ClientManager, ManagerSettings};
use crate::server::session::SessionStats;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use mio::Waker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long a control call waits for the manager thread
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

type DeviceList = Vec<(DeviceAddress, AccessMode)>;

/// Collects drivers and settings before the server starts
pub struct ServerBuilder {
    config: Config,
    drivers: Vec<(Box<dyn Driver>, DeviceList)>,
}

impl ServerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            drivers: Vec::new(),
        }
    }

    /// Replace the configured listen addresses
    pub fn listen(mut self, addrs: Vec<String>) -> Self {
        self.config.server.listen = addrs;
        self
    }

    /// Register a driver instance for the given devices
    pub fn driver(mut self, driver: Box<dyn Driver>, devices: &[(DeviceAddress, AccessMode)]) -> Self {
        self.drivers.push((driver, devices.to_vec()));
        self
    }

    /// Instantiate every driver listed in the configuration
    pub fn with_configured_drivers(mut self) -> Result<Self> {
        for driver_config in &self.config.drivers {
            let driver = create_driver(driver_config)?;
            let devices = driver_config
                .provides
                .iter()
                .map(|address| (*address, driver_config.access))
                .collect();
            self.drivers.push((driver, devices));
        }
        Ok(self)
    }

    /// Set up the drivers and bind the listeners.
    ///
    /// A driver whose setup fails is shut down and its devices are left out;
    /// the rest of the server starts normally.
    pub fn build(self) -> Result<Server> {
        let config = self.config;
        let table = Arc::new(DeviceTable::new(config.server.request_queue_len));
        let mut manager = ClientManager::new(Arc::clone(&table), ManagerSettings::from(&config))?;

        let mut registered = 0;
        for (driver, devices) in self.drivers {
            let name = driver.name().to_string();
            match manager.add_driver(driver, &devices) {
                Ok(_) => registered += 1,
                Err(e) => log::error!("Driver {} skipped: {}", name, e),
            }
        }
        log::info!(
            "{} driver(s) registered, {} device(s) available",
            registered,
            table.len()
        );

        for addr in &config.server.listen {
            if let Err(e) = manager.listen(addr) {
                shutdown_drivers(&table);
                return Err(e);
            }
        }

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        Ok(Server {
            table,
            manager,
            running: Arc::new(AtomicBool::new(true)),
            control_tx,
            control_rx,
        })
    }
}

fn shutdown_drivers(table: &DeviceTable) {
    for driver in table.drivers() {
        log::info!("Shutting down driver {}", driver.name());
        if let Err(e) = driver.lock().shutdown() {
            log::warn!("Driver {} shutdown failed: {}", driver.name(), e);
        }
    }
}

/// Requests carried to the manager thread
enum Control {
    AddDriver(Box<dyn Driver>, DeviceList, Sender<Result<Vec<DeviceAddress>>>),
    RemoveDevice(DeviceAddress, Sender<Result<()>>),
    SetAccess(DeviceAddress, AccessMode, Sender<Result<AccessMode>>),
    Stats(Sender<Vec<SessionStats>>),
}

pub struct Server {
    table: Arc<DeviceTable>,
    manager: ClientManager,
    running: Arc<AtomicBool>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
}

impl Server {
    pub fn builder(config: Config) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// Build a server with the drivers named in the configuration
    pub fn from_config(config: Config) -> Result<Self> {
        ServerBuilder::new(config).with_configured_drivers()?.build()
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.manager.local_addrs()
    }

    pub fn table(&self) -> &Arc<DeviceTable> {
        &self.table
    }

    pub fn controller(&self) -> ServerControl {
        ServerControl {
            tx: self.control_tx.clone(),
            running: Arc::clone(&self.running),
            waker: self.manager.waker(),
        }
    }

    /// Serve clients until [`ServerControl::stop`], then close every
    /// session and shut the drivers down
    pub fn run(&mut self) -> Result<()> {
        log::info!("Client manager started");
        while self.running.load(Ordering::Relaxed) {
            self.handle_control();
            self.manager.poll_at(Instant::now());
            self.manager.wait(Instant::now());
        }

        log::info!("Shutting down...");
        self.manager.shutdown();
        shutdown_drivers(&self.table);
        log::info!("Shutdown complete");
        Ok(())
    }

    fn handle_control(&mut self) {
        while let Ok(control) = self.control_rx.try_recv() {
            // the caller may have timed out; a dropped reply channel is fine
            match control {
                Control::AddDriver(driver, devices, reply) => {
                    let _ = reply.send(self.manager.add_driver(driver, &devices));
                }
                Control::RemoveDevice(address, reply) => {
                    let _ = reply.send(self.manager.remove_device(address).map(|_| ()));
                }
                Control::SetAccess(address, mode, reply) => {
                    let _ = reply.send(self.manager.set_device_access(address, mode));
                }
                Control::Stats(reply) => {
                    let _ = reply.send(self.manager.stats());
                }
            }
        }
    }

    /// Run the server on its own thread
    pub fn spawn(mut self) -> Result<ServerHandle> {
        let control = self.controller();
        let addrs = self.local_addrs();
        let thread = thread::Builder::new()
            .name("client-manager".to_string())
            .spawn(move || {
                if let Err(e) = self.run() {
                    log::error!("Client manager error: {}", e);
                }
            })
            .map_err(|e| Error::Other(format!("Failed to spawn client manager: {}", e)))?;
        Ok(ServerHandle {
            control,
            addrs,
            thread: Some(thread),
        })
    }
}

/// Cloneable handle for changing a running server
#[derive(Clone)]
pub struct ServerControl {
    tx: Sender<Control>,
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ServerControl {
    fn call<T>(&self, make: impl FnOnce(Sender<T>) -> Control) -> Result<T> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.tx.send(make(reply_tx)).map_err(|_| Error::Disconnected)?;
        self.wake();
        reply_rx.recv_timeout(CONTROL_TIMEOUT).map_err(|e| match e {
            RecvTimeoutError::Timeout => Error::Timeout,
            RecvTimeoutError::Disconnected => Error::Disconnected,
        })
    }

    fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            log::warn!("Failed to wake client manager: {}", e);
        }
    }

    /// Set up a driver on the running server and serve its devices.
    /// Returns the addresses added.
    pub fn add_driver(
        &self,
        driver: Box<dyn Driver>,
        devices: &[(DeviceAddress, AccessMode)],
    ) -> Result<Vec<DeviceAddress>> {
        let devices = devices.to_vec();
        self.call(|reply| Control::AddDriver(driver, devices, reply))?
    }

    /// Remove a device; its subscribers are notified
    pub fn remove_device(&self, address: DeviceAddress) -> Result<()> {
        self.call(|reply| Control::RemoveDevice(address, reply))?
    }

    /// Change a device's access mode, returning the previous one
    pub fn set_device_access(&self, address: DeviceAddress, mode: AccessMode) -> Result<AccessMode> {
        self.call(|reply| Control::SetAccess(address, mode, reply))?
    }

    pub fn stats(&self) -> Result<Vec<SessionStats>> {
        self.call(Control::Stats)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.wake();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// A server running on its own thread; stopped and joined on drop
pub struct ServerHandle {
    control: ServerControl,
    addrs: Vec<SocketAddr>,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// First bound address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addrs.first().copied()
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn control(&self) -> &ServerControl {
        &self.control
    }

    /// Stop the server and wait for its thread to finish
    pub fn stop(&mut self) {
        self.control.stop();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            log::error!("Client manager thread panicked");
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
