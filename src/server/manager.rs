//! Client manager: owns every session and drives all client I/O
//!
//! One cycle ([`ClientManager::poll_at`]):
//!
//! ```text
//! accept ─▶ read + dispatch ─▶ config requests ─▶ driver updates
//!        ─▶ async data ─▶ push/pull rounds ─▶ flush ─▶ reap
//! ```
//!
//! Between cycles the manager blocks in [`ClientManager::wait`] on one
//! [`mio::Poll`] wait-set: the listening sockets, every client socket
//! (writable interest only while its outbox holds data) and a waker that
//! drivers signal when they publish. The timeout is the time until the next
//! push round is due; drivers polled for data cap it at the poll interval.
//! All sockets are non-blocking, so a slow client only ever costs its own
//! queue.

use crate::config::{Config, SessionConfig};
use crate::core::device_table::{DeviceEntry, DeviceTable, PendingRequest, SessionId};
use crate::core::driver::{ConfigReply, Driver, DriverCell};
use crate::core::port::{DevicePort, DevicePorts, WakeSender, create_wake_channel};
use crate::core::types::{AccessMode, DeviceAddress};
use crate::error::{Error, Result};
use crate::protocol::frame::{Frame, MessageType};
use crate::protocol::requests::{AccessReply, DeviceListReply, ServerRequest};
use crate::protocol::ProtocolError;
use crate::server::session::{ClientSession, SessionStats};
use crate::transport::{TcpTransport, Transport};
use crossbeam_channel::Receiver;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::{BTreeSet, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 16 * 1024;
const EVENT_CAPACITY: usize = 256;

/// Poller token of the driver waker. Sessions use their id, listeners count
/// down from `usize::MAX`.
const WAKE_TOKEN: Token = Token(0);

fn listener_token(index: usize) -> Token {
    Token(usize::MAX - index)
}

/// Settings the manager needs from the configuration
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub session: SessionConfig,
    pub auth_key: Option<String>,
    pub max_payload: usize,
    pub read_budget: usize,
    pub poll_interval: Duration,
}

impl From<&Config> for ManagerSettings {
    fn from(config: &Config) -> Self {
        Self {
            session: config.session.clone(),
            auth_key: config.server.auth_key.clone(),
            max_payload: config.server.max_payload,
            read_budget: config.server.read_budget,
            poll_interval: config.poll_interval(),
        }
    }
}

/// State shared by every dispatch call
struct Context {
    table: Arc<DeviceTable>,
    auth_key: Option<String>,
}

pub struct ClientManager {
    ctx: Context,
    settings: ManagerSettings,
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    listeners: Vec<TcpListener>,
    sessions: Vec<ClientSession>,
    next_id: SessionId,
    wake_tx: WakeSender,
    wake_rx: Receiver<DeviceAddress>,
    woken: BTreeSet<DeviceAddress>,
    read_buf: Vec<u8>,
    scratch: Vec<u8>,
}

impl ClientManager {
    pub fn new(table: Arc<DeviceTable>, settings: ManagerSettings) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (wake_tx, wake_rx) = create_wake_channel(Some(Arc::clone(&waker)));
        Ok(Self {
            ctx: Context {
                table,
                auth_key: settings.auth_key.clone(),
            },
            scratch: vec![0u8; settings.max_payload],
            read_buf: vec![0u8; READ_CHUNK],
            settings,
            poll,
            events: Events::with_capacity(EVENT_CAPACITY),
            waker,
            listeners: Vec::new(),
            sessions: Vec::new(),
            next_id: 1,
            wake_tx,
            wake_rx,
            woken: BTreeSet::new(),
        })
    }

    /// Bind a listening socket and add it to the wait-set
    pub fn listen(&mut self, addr: &str) -> Result<SocketAddr> {
        let listener = std::net::TcpListener::bind(addr)
            .map_err(|e| Error::Other(format!("Failed to bind to {}: {}", addr, e)))?;
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);
        self.poll
            .registry()
            .register(&mut listener, listener_token(self.listeners.len()), Interest::READABLE)?;
        let local = listener.local_addr()?;
        log::info!("Listening for clients on {}", local);
        self.listeners.push(listener);
        Ok(local)
    }

    /// Signal handle for ports created for this manager
    pub fn wake_sender(&self) -> WakeSender {
        self.wake_tx.clone()
    }

    /// Interrupts [`wait`](Self::wait) from another thread
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok())
            .collect()
    }

    pub fn table(&self) -> &Arc<DeviceTable> {
        &self.ctx.table
    }

    /// Start serving a connected client
    pub fn add_session(&mut self, transport: Box<dyn Transport>) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        let mut session = ClientSession::new(
            id,
            transport,
            &self.settings.session,
            self.settings.max_payload,
            self.ctx.auth_key.is_some(),
        );
        // session ids start at 1, clear of the waker token
        if let Err(e) = session.register(self.poll.registry(), Token(id as usize)) {
            session.close(format!("poll registration failed: {}", e));
        }
        log::info!("Client {} connected from {}", id, session.peer());
        self.sessions.push(session);
        id
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn stats(&self) -> Vec<SessionStats> {
        self.sessions.iter().map(ClientSession::stats).collect()
    }

    /// Run one full cycle
    pub fn poll_at(&mut self, now: Instant) {
        self.accept_pending();
        self.read_sessions();
        self.service_requests();
        self.update_drivers();
        self.deliver_async();
        self.deliver_rounds(now);
        self.flush_sessions();
        self.reap_sessions();
    }

    /// Block until a socket is ready, a driver publishes or the next round
    /// is due
    pub fn wait(&mut self, now: Instant) {
        let timeout = self.next_wait(now);
        if timeout != Some(Duration::ZERO) {
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => log::trace!("Woke with {} events", self.events.iter().count()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::error!("Poll failed: {}", e);
                    thread::sleep(self.settings.poll_interval);
                }
            }
        }
        self.woken.extend(self.wake_rx.try_iter());
    }

    /// How long the manager may block before something is due; `None` means
    /// only a socket or driver event can make work
    pub fn next_wait(&self, now: Instant) -> Option<Duration> {
        if !self.woken.is_empty() || self.sessions.iter().any(ClientSession::has_pending_input) {
            return Some(Duration::ZERO);
        }
        let push = self
            .sessions
            .iter()
            .filter_map(|s| {
                if s.is_due(now) {
                    Some(Duration::ZERO)
                } else {
                    s.until_due(now)
                }
            })
            .min();
        let polled = self
            .ctx
            .table
            .drivers()
            .iter()
            .any(|d| d.subscriptions() > 0);
        match (push, polled) {
            (Some(due), true) => Some(due.min(self.settings.poll_interval)),
            (None, true) => Some(self.settings.poll_interval),
            (push, false) => push,
        }
    }

    fn accept_pending(&mut self) {
        let mut accepted = Vec::new();
        for listener in &self.listeners {
            loop {
                match listener.accept() {
                    Ok((stream, peer)) => accepted.push(TcpTransport::new(stream, peer)),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::error!("Accept error: {}", e);
                        break;
                    }
                }
            }
        }
        for transport in accepted {
            self.add_session(Box::new(transport));
        }
    }

    fn read_sessions(&mut self) {
        let ctx = &self.ctx;
        let budget = self.settings.read_budget;
        for session in self.sessions.iter_mut() {
            if !session.wants_read() {
                continue;
            }
            session.read_available(&mut self.read_buf, budget);
            while !session.is_closing() {
                match session.next_frame() {
                    Ok(Some(frame)) => {
                        if let Err(e) = dispatch(ctx, session, frame) {
                            session.close(format!("protocol error: {}", e));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => session.close(format!("protocol error: {}", e)),
                }
            }
        }
    }

    /// Hand queued configuration requests to their drivers
    fn service_requests(&mut self) {
        for pending in self.ctx.table.pending_requests() {
            for _ in 0..pending.queue.capacity() {
                let Some(request) = self.ctx.table.pop_request(pending.address) else {
                    break;
                };
                let reply = pending.driver.lock().handle_config(pending.address, &request.payload);
                let frame = match reply {
                    ConfigReply::Ack(payload) => {
                        Frame::reply(MessageType::RespAck, pending.address, request.tag, payload)
                    }
                    ConfigReply::Nack => {
                        Frame::reply(MessageType::RespNack, pending.address, request.tag, Vec::new())
                    }
                };
                match self.sessions.iter_mut().find(|s| s.id() == request.session) {
                    Some(session) => session.queue_reply(frame),
                    None => log::debug!(
                        "Reply from {} for departed client {} discarded",
                        pending.address,
                        request.session
                    ),
                }
            }
        }
    }

    /// Poll drivers that produce data on demand
    fn update_drivers(&mut self) {
        for driver in self.ctx.table.drivers() {
            if driver.subscriptions() > 0 {
                driver.lock().update();
            }
        }
    }

    fn deliver_async(&mut self) {
        let woken = std::mem::take(&mut self.woken);
        for address in woken {
            for session in self.sessions.iter_mut() {
                session.push_async(&self.ctx.table, address, &mut self.scratch);
            }
        }
    }

    fn deliver_rounds(&mut self, now: Instant) {
        for session in self.sessions.iter_mut() {
            if session.is_due(now) {
                let frames = session.build_round(&self.ctx.table, now, &mut self.scratch);
                log::trace!("Client {}: round with {} data frames", session.id(), frames);
            }
        }
    }

    fn flush_sessions(&mut self) {
        let registry = self.poll.registry();
        for session in self.sessions.iter_mut() {
            session.flush();
            session.update_interest(registry);
        }
    }

    fn reap_sessions(&mut self) {
        let table = &self.ctx.table;
        let registry = self.poll.registry();
        self.sessions.retain_mut(|session| {
            if !session.is_closing() {
                return true;
            }
            release_all(table, session);
            session.deregister(registry);
            session.finish();
            log::info!("Client {} ({}) disconnected", session.id(), session.peer());
            false
        });
    }

    /// Close every session, releasing their grants
    pub fn shutdown(&mut self) {
        for session in self.sessions.iter_mut() {
            session.close("server shutting down");
        }
        self.reap_sessions();
        self.listeners.clear();
    }

    /// Set up a driver and serve its devices.
    ///
    /// Fails without touching the driver when an address is already served
    /// or listed twice. A failed setup shuts the driver down again.
    pub fn add_driver(
        &mut self,
        mut driver: Box<dyn Driver>,
        devices: &[(DeviceAddress, AccessMode)],
    ) -> Result<Vec<DeviceAddress>> {
        let table = &self.ctx.table;
        let mut seen = HashSet::new();
        if let Some((address, _)) = devices
            .iter()
            .find(|(address, _)| table.contains(*address) || !seen.insert(*address))
        {
            return Err(Error::DuplicateAddress(*address));
        }

        let name = driver.name().to_string();
        let ports: Vec<DevicePort> = devices
            .iter()
            .map(|(address, _)| {
                DevicePort::new(
                    *address,
                    driver.command_size(address.interface),
                    Some(self.wake_tx.clone()),
                )
            })
            .collect();

        if let Err(e) = driver.setup(&DevicePorts::new(ports.clone())) {
            if let Err(e) = driver.shutdown() {
                log::warn!("Driver {} shutdown failed: {}", name, e);
            }
            return Err(e);
        }

        let cell = DriverCell::new(driver);
        let mut added = Vec::with_capacity(devices.len());
        for ((address, access), port) in devices.iter().zip(ports) {
            match table.add_device(*address, *access, Arc::clone(&cell), port) {
                Ok(()) => {
                    log::info!("{} -> {} ({})", address, name, access);
                    added.push(*address);
                }
                Err(e) => log::error!("Driver {}: {}", name, e),
            }
        }
        Ok(added)
    }

    /// Remove a device at runtime.
    ///
    /// A departing writer leaves the device in its stop state. Sessions
    /// holding it lose their subscription and are told so with an
    /// unsolicited access reply granting `Closed`. The driver is shut down once
    /// it serves no other device.
    pub fn remove_device(&mut self, address: DeviceAddress) -> Result<DeviceEntry> {
        if self.ctx.table.writer(address).is_some() {
            apply_stop_command(&self.ctx.table, address);
        }
        let entry = self.ctx.table.remove_device(address)?;
        let driver_name = entry.driver().name().to_string();
        for session in self.sessions.iter_mut() {
            if session.subscription(address).is_some() {
                session.set_grant(address, AccessMode::Closed);
                announce(session, address, AccessMode::Closed, &driver_name);
            }
        }

        let still_used = self
            .ctx
            .table
            .drivers()
            .iter()
            .any(|d| Arc::ptr_eq(d, entry.driver()));
        if !still_used && let Err(e) = entry.driver().lock().shutdown() {
            log::warn!("Driver {} shutdown failed: {}", driver_name, e);
        }
        log::info!("Device {} removed", address);
        Ok(entry)
    }

    /// Change what a device allows, narrowing existing grants to match
    pub fn set_device_access(&mut self, address: DeviceAddress, mode: AccessMode) -> Result<AccessMode> {
        let table = Arc::clone(&self.ctx.table);
        let had_writer = table.writer(address).is_some();
        let previous = table.set_access(address, mode)?;
        if had_writer && !mode.can_write() {
            apply_stop_command(&table, address);
        }

        let driver_name = table.driver_name(address).unwrap_or_default();
        for session in self.sessions.iter_mut() {
            let held = session.access(address);
            if !held.is_open() {
                continue;
            }
            let narrowed = held.intersect(mode);
            if narrowed == held {
                continue;
            }
            let granted = match table.negotiate(address, session.id(), held, narrowed) {
                Ok(grant) => grant.mode,
                Err(_) => AccessMode::Closed,
            };
            session.set_grant(address, granted);
            announce(session, address, granted, &driver_name);
        }
        log::info!("Device {} access {} -> {}", address, previous, mode);
        Ok(previous)
    }
}

/// Route one frame from a client
fn dispatch(ctx: &Context, session: &mut ClientSession, frame: Frame) -> std::result::Result<(), ProtocolError> {
    if session.auth_pending() {
        return authenticate(ctx, session, frame);
    }

    match frame.msg_type {
        MessageType::Request if frame.address.is_server() => {
            handle_server_request(ctx, session, frame);
            Ok(())
        }
        MessageType::Request => handle_device_request(ctx, session, frame),
        MessageType::Command => handle_command(ctx, session, frame),
        other => Err(ProtocolError::UnexpectedMessage(other)),
    }
}

fn authenticate(ctx: &Context, session: &mut ClientSession, frame: Frame) -> std::result::Result<(), ProtocolError> {
    let is_auth = frame.msg_type == MessageType::Request && frame.address.is_server();
    if is_auth
        && let Ok(ServerRequest::Authenticate(key)) = ServerRequest::decode(&frame.payload)
        && ctx.auth_key.as_deref() == Some(key.as_str())
    {
        session.authenticated();
        log::info!("Client {} authenticated", session.id());
        session.queue_reply(Frame::reply(
            MessageType::RespAck,
            frame.address,
            frame.tag,
            frame.payload,
        ));
        return Ok(());
    }
    Err(ProtocolError::AuthFailed)
}

fn handle_server_request(ctx: &Context, session: &mut ClientSession, frame: Frame) {
    let request = match ServerRequest::decode(&frame.payload) {
        Ok(request) => request,
        Err(e) => {
            log::debug!("Client {}: bad server request: {}", session.id(), e);
            session.queue_reply(Frame::reply(MessageType::RespNack, frame.address, frame.tag, Vec::new()));
            return;
        }
    };

    let (kind, payload) = match request {
        ServerRequest::DeviceList => (
            MessageType::RespAck,
            DeviceListReply(ctx.table.addresses()).encode(),
        ),
        ServerRequest::ChangeAccess { address, mode } => {
            let granted = change_access(&ctx.table, session, address, mode);
            let reply = AccessReply {
                address,
                granted,
                driver_name: ctx.table.driver_name(address).unwrap_or_default(),
            };
            (MessageType::RespAck, reply.encode())
        }
        ServerRequest::RequestData => {
            if session.request_data() {
                (MessageType::RespAck, frame.payload)
            } else {
                (MessageType::RespNack, Vec::new())
            }
        }
        ServerRequest::SetDataMode(mode) => {
            session.set_data_mode(mode);
            (MessageType::RespAck, frame.payload)
        }
        ServerRequest::SetFrequency(hz) => {
            if session.set_frequency(hz) {
                (MessageType::RespAck, frame.payload)
            } else {
                (MessageType::RespNack, Vec::new())
            }
        }
        // already authenticated
        ServerRequest::Authenticate(_) => (MessageType::RespNack, Vec::new()),
    };
    session.queue_reply(Frame::reply(kind, frame.address, frame.tag, payload));
}

fn handle_device_request(ctx: &Context, session: &mut ClientSession, frame: Frame) -> std::result::Result<(), ProtocolError> {
    let address = frame.address;
    if !ctx.table.contains(address) {
        return Err(ProtocolError::UnknownDevice(address));
    }
    if !session.access(address).is_open() {
        log::debug!("Client {}: request to unopened device {}", session.id(), address);
        session.queue_reply(Frame::reply(MessageType::RespNack, address, frame.tag, Vec::new()));
        return Ok(());
    }

    let request = PendingRequest {
        session: session.id(),
        tag: frame.tag,
        payload: frame.payload,
    };
    if let Err(e) = ctx.table.queue_request(address, request) {
        log::warn!("Client {}: request to {} refused: {}", session.id(), address, e);
        session.queue_reply(Frame::reply(MessageType::RespErr, address, frame.tag, Vec::new()));
    }
    Ok(())
}

fn handle_command(ctx: &Context, session: &mut ClientSession, frame: Frame) -> std::result::Result<(), ProtocolError> {
    let address = frame.address;
    let Some(port) = ctx.table.port(address) else {
        return Err(ProtocolError::UnknownDevice(address));
    };
    let device_writable = ctx.table.access(address).is_some_and(AccessMode::can_write);
    if !session.access(address).can_write() || !device_writable {
        log::warn!(
            "Client {}: command to {} without write access dropped",
            session.id(),
            address
        );
        return Ok(());
    }
    if let Err(e) = port.put_command(&frame.payload) {
        log::warn!("Client {}: {}", session.id(), e);
    }
    Ok(())
}

/// Negotiate and record a session's access to a device
fn change_access(
    table: &DeviceTable,
    session: &mut ClientSession,
    address: DeviceAddress,
    requested: AccessMode,
) -> AccessMode {
    let current = session.access(address);
    match table.negotiate(address, session.id(), current, requested) {
        Ok(grant) => {
            if grant.released_write {
                apply_stop_command(table, address);
            }
            session.set_grant(address, grant.mode);
            grant.mode
        }
        Err(e) => {
            log::debug!("Client {}: access to {} denied: {}", session.id(), address, e);
            AccessMode::Error
        }
    }
}

/// Drop every grant a closing session holds
fn release_all(table: &DeviceTable, session: &mut ClientSession) {
    let held: Vec<_> = session.subscriptions().collect();
    for address in table.release_all(session.id(), &held) {
        apply_stop_command(table, address);
    }
    for (address, _) in held {
        session.set_grant(address, AccessMode::Closed);
    }
}

/// Put the device in its safe state after its writer left
fn apply_stop_command(table: &DeviceTable, address: DeviceAddress) {
    let (Some(driver), Some(port)) = (table.driver(address), table.port(address)) else {
        return;
    };
    let command = driver.lock().stop_command(address.interface);
    if let Some(command) = command {
        match port.put_command(&command) {
            Ok(()) => log::info!("{}: writer released, stop command applied", address),
            Err(e) => log::warn!("{}: stop command rejected: {}", address, e),
        }
    }
}

fn announce(session: &mut ClientSession, address: DeviceAddress, granted: AccessMode, driver_name: &str) {
    let reply = AccessReply {
        address,
        granted,
        driver_name: driver_name.to_string(),
    };
    session.queue_reply(Frame::reply(
        MessageType::RespAck,
        DeviceAddress::SERVER,
        0,
        reply.encode(),
    ));
}
