//! Per-connection client state

use crate::config::SessionConfig;
use crate::core::device_table::{DeviceTable, SessionId};
use crate::core::types::{AccessMode, DataMode, DeviceAddress, Timestamp};
use crate::error::Error;
use crate::protocol::frame::{Frame, banner};
use crate::protocol::{FrameDecoder, ProtocolError};
use crate::server::outbox::Outbox;
use crate::transport::Transport;
use mio::{Interest, Registry, Token};
use std::collections::BTreeMap;
use std::io;
use std::time::{Duration, Instant};

/// Slack when deciding whether a push round is due, so a wakeup that lands a
/// hair early does not skip a whole period
const DUE_SLACK: Duration = Duration::from_micros(1);

/// A session's hold on one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub access: AccessMode,
    /// Timestamp of the last sample delivered to this session
    pub last_sent: Option<Timestamp>,
}

/// Snapshot of a session for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub id: SessionId,
    pub peer: String,
    pub data_mode: DataMode,
    pub frequency_hz: u16,
    pub subscriptions: usize,
    pub queued_bytes: usize,
    pub queued_frames: usize,
    pub dropped_frames: u64,
    pub authenticated: bool,
}

pub struct ClientSession {
    id: SessionId,
    peer: String,
    transport: Box<dyn Transport>,
    decoder: FrameDecoder,
    outbox: Outbox,
    subscriptions: BTreeMap<DeviceAddress, Subscription>,
    data_mode: DataMode,
    frequency_hz: u16,
    last_round: Option<Instant>,
    data_requested: bool,
    auth_pending: bool,
    closing: Option<String>,
    /// Input may be waiting that no readiness event will report again
    input_pending: bool,
    /// Poller registration, absent for transports without a socket
    registration: Option<(Token, Interest)>,
}

impl ClientSession {
    /// Create a session and queue the identification banner
    pub fn new(
        id: SessionId,
        transport: Box<dyn Transport>,
        settings: &SessionConfig,
        max_payload: usize,
        auth_required: bool,
    ) -> Self {
        let peer = transport.peer();
        let mut session = Self {
            id,
            peer,
            transport,
            decoder: FrameDecoder::new(max_payload),
            outbox: Outbox::new(settings.outbox_capacity, settings.overflow),
            subscriptions: BTreeMap::new(),
            data_mode: settings.data_mode,
            frequency_hz: settings.frequency_hz.max(1),
            last_round: None,
            data_requested: false,
            auth_pending: auth_required,
            closing: None,
            input_pending: true,
            registration: None,
        };
        session.queue_reliable(banner().to_vec());
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    // ===== lifecycle =====

    /// Mark the session for removal at the end of the cycle
    pub fn close(&mut self, reason: impl Into<String>) {
        if self.closing.is_none() {
            let reason = reason.into();
            log::info!("Client {} ({}) closing: {}", self.id, self.peer, reason);
            self.closing = Some(reason);
        }
    }

    pub fn is_closing(&self) -> bool {
        self.closing.is_some()
    }

    /// Shut the transport down; the session is dropped afterwards
    pub fn finish(&mut self) {
        // best effort: push out whatever the socket still takes
        let _ = self.outbox.flush(self.transport.as_mut());
        self.transport.shutdown();
    }

    /// Register the transport's socket for readability
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        if let Some(source) = self.transport.source() {
            registry.register(source, token, Interest::READABLE)?;
            self.registration = Some((token, Interest::READABLE));
        }
        Ok(())
    }

    /// Watch for writability only while output is queued
    pub fn update_interest(&mut self, registry: &Registry) {
        let Some((token, current)) = self.registration else {
            return;
        };
        let wanted = if self.outbox.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if wanted == current {
            return;
        }
        let Some(source) = self.transport.source() else {
            return;
        };
        match registry.reregister(source, token, wanted) {
            Ok(()) => self.registration = Some((token, wanted)),
            Err(e) => self.close(format!("poll registration failed: {}", e)),
        }
    }

    pub fn deregister(&mut self, registry: &Registry) {
        if self.registration.take().is_some()
            && let Some(source) = self.transport.source()
            && let Err(e) = registry.deregister(source)
        {
            log::debug!("Client {}: deregister failed: {}", self.id, e);
        }
    }

    pub fn auth_pending(&self) -> bool {
        self.auth_pending
    }

    pub fn authenticated(&mut self) {
        self.auth_pending = false;
    }

    // ===== input =====

    /// True when the session should be read this cycle
    pub fn wants_read(&self) -> bool {
        self.closing.is_none() && !self.outbox.is_saturated()
    }

    /// True when a read is wanted before the next readiness event
    pub fn has_pending_input(&self) -> bool {
        self.input_pending && self.wants_read()
    }

    /// Read up to `budget` bytes from the transport into the decoder
    pub fn read_available(&mut self, scratch: &mut [u8], budget: usize) -> usize {
        let mut total = 0;
        // cleared only once the transport runs dry
        self.input_pending = true;
        while total < budget {
            match self.transport.read(scratch) {
                Ok(0) => {
                    self.input_pending = false;
                    break;
                }
                Ok(n) => {
                    self.decoder.extend(&scratch[..n]);
                    total += n;
                }
                Err(Error::Disconnected) => {
                    self.close("disconnected");
                    break;
                }
                Err(e) => {
                    self.close(format!("read error: {}", e));
                    break;
                }
            }
        }
        total
    }

    /// Next complete frame received from the client
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        self.decoder.next_frame()
    }

    // ===== subscriptions =====

    /// Access this session currently holds on `address`
    pub fn access(&self, address: DeviceAddress) -> AccessMode {
        self.subscriptions
            .get(&address)
            .map_or(AccessMode::Closed, |s| s.access)
    }

    pub fn subscription(&self, address: DeviceAddress) -> Option<&Subscription> {
        self.subscriptions.get(&address)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = (DeviceAddress, AccessMode)> + '_ {
        self.subscriptions.iter().map(|(a, s)| (*a, s.access))
    }

    /// Record the outcome of a negotiation
    pub fn set_grant(&mut self, address: DeviceAddress, mode: AccessMode) {
        if mode.is_open() {
            self.subscriptions
                .entry(address)
                .and_modify(|s| s.access = mode)
                .or_insert(Subscription {
                    access: mode,
                    last_sent: None,
                });
        } else {
            self.subscriptions.remove(&address);
        }
    }

    // ===== delivery settings =====

    pub fn data_mode(&self) -> DataMode {
        self.data_mode
    }

    pub fn set_data_mode(&mut self, mode: DataMode) {
        if mode != self.data_mode {
            log::debug!("Client {}: data mode {:?} -> {:?}", self.id, self.data_mode, mode);
        }
        self.data_mode = mode;
        self.data_requested = false;
    }

    pub fn frequency_hz(&self) -> u16 {
        self.frequency_hz
    }

    /// Set the push rate; zero is refused
    pub fn set_frequency(&mut self, hz: u16) -> bool {
        if hz == 0 {
            return false;
        }
        self.frequency_hz = hz;
        true
    }

    /// Ask for one round; only meaningful in pull modes
    pub fn request_data(&mut self) -> bool {
        if !self.data_mode.is_pull() {
            return false;
        }
        self.data_requested = true;
        true
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frequency_hz))
    }

    /// A round should be built this cycle
    pub fn is_due(&self, now: Instant) -> bool {
        if self.auth_pending || self.closing.is_some() || self.outbox.is_saturated() {
            return false;
        }
        if self.data_mode.is_pull() {
            return self.data_requested;
        }
        if !self.data_mode.is_periodic() {
            return false;
        }
        match self.last_round {
            None => true,
            Some(last) => now.saturating_duration_since(last) + DUE_SLACK >= self.period(),
        }
    }

    /// Time until the next periodic round, if this session has one.
    /// A session that cannot take a round right now has none.
    pub fn until_due(&self, now: Instant) -> Option<Duration> {
        if self.auth_pending
            || self.closing.is_some()
            || self.outbox.is_saturated()
            || !self.data_mode.is_periodic()
        {
            return None;
        }
        Some(match self.last_round {
            None => Duration::ZERO,
            Some(last) => (last + self.period()).saturating_duration_since(now),
        })
    }

    // ===== output =====

    /// Queue one data frame per readable subscription followed by SYNCH.
    /// Returns the number of data frames queued.
    pub fn build_round(&mut self, table: &DeviceTable, now: Instant, scratch: &mut [u8]) -> usize {
        let only_new = self.data_mode.only_new();
        let mut queued = 0;
        for (address, sub) in self.subscriptions.iter_mut() {
            if !sub.access.can_read() {
                continue;
            }
            let Some(port) = table.port(*address) else {
                continue;
            };
            let Some(sample) = port.get_data(scratch) else {
                continue;
            };
            if only_new && sub.last_sent == Some(sample.timestamp) {
                continue;
            }
            let frame = Frame::data(*address, sample.timestamp, scratch[..sample.len].to_vec());
            if self.outbox.push_data(frame.encode()) {
                sub.last_sent = Some(sample.timestamp);
                queued += 1;
            }
        }
        self.outbox.push_marker(Frame::synch().encode());

        self.last_round = Some(now);
        self.data_requested = false;
        queued
    }

    /// Queue the latest sample of `address` for a PushAsync session
    pub fn push_async(&mut self, table: &DeviceTable, address: DeviceAddress, scratch: &mut [u8]) -> bool {
        if self.data_mode != DataMode::PushAsync || self.auth_pending || self.closing.is_some() {
            return false;
        }
        let Some(sub) = self.subscriptions.get_mut(&address) else {
            return false;
        };
        if !sub.access.can_read() {
            return false;
        }
        let Some(sample) = table.port(address).and_then(|p| p.get_data(scratch)) else {
            return false;
        };
        if sub.last_sent == Some(sample.timestamp) {
            return false;
        }
        let frame = Frame::data(address, sample.timestamp, scratch[..sample.len].to_vec());
        if self.outbox.push_data(frame.encode()) {
            sub.last_sent = Some(sample.timestamp);
            return true;
        }
        false
    }

    /// Queue a reply or announcement
    pub fn queue_reply(&mut self, frame: Frame) {
        self.queue_reliable(frame.encode());
    }

    fn queue_reliable(&mut self, bytes: Vec<u8>) {
        if let Err(e) = self.outbox.push_reliable(bytes) {
            self.close(e.to_string());
        }
    }

    /// Write as much queued output as the transport accepts
    pub fn flush(&mut self) {
        if self.outbox.is_empty() {
            return;
        }
        let was_saturated = self.outbox.is_saturated();
        match self.outbox.flush(self.transport.as_mut()) {
            Ok(_) => {}
            Err(Error::Disconnected) => self.close("disconnected"),
            Err(e) => self.close(format!("write error: {}", e)),
        }
        // readiness seen while paused was not acted on
        if was_saturated && !self.outbox.is_saturated() {
            self.input_pending = true;
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            id: self.id,
            peer: self.peer.clone(),
            data_mode: self.data_mode,
            frequency_hz: self.frequency_hz,
            subscriptions: self.subscriptions.len(),
            queued_bytes: self.outbox.queued_bytes(),
            queued_frames: self.outbox.queued_frames(),
            dropped_frames: self.outbox.dropped(),
            authenticated: !self.auth_pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::{Driver, DriverCell};
    use crate::core::port::{DevicePort, DevicePorts};
    use crate::core::types::Interface;
    use crate::protocol::frame::{BANNER_LEN, MessageType};
    use crate::server::outbox::OverflowPolicy;
    use crate::transport::MockTransport;

    const SONAR: DeviceAddress = DeviceAddress::new(Interface::SONAR, 0);

    struct Quiet;

    impl Driver for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }

        fn setup(&mut self, _ports: &DevicePorts) -> crate::error::Result<()> {
            Ok(())
        }

        fn shutdown(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn sonar_table() -> (DeviceTable, DevicePort) {
        let table = DeviceTable::default();
        let port = DevicePort::new(SONAR, None, None);
        table
            .add_device(SONAR, AccessMode::Read, DriverCell::new(Box::new(Quiet)), port.clone())
            .unwrap();
        (table, port)
    }

    fn session_with(capacity: usize, overflow: OverflowPolicy) -> (ClientSession, MockTransport) {
        let mock = MockTransport::new();
        let settings = SessionConfig {
            data_mode: DataMode::PushAll,
            frequency_hz: 10,
            outbox_capacity: capacity,
            overflow,
        };
        let session = ClientSession::new(1, Box::new(mock.clone()), &settings, 1024, false);
        (session, mock)
    }

    fn session(mode: DataMode) -> (ClientSession, MockTransport) {
        let mock = MockTransport::new();
        let settings = SessionConfig {
            data_mode: mode,
            frequency_hz: 10,
            ..SessionConfig::default()
        };
        let session = ClientSession::new(1, Box::new(mock.clone()), &settings, 1024, false);
        (session, mock)
    }

    #[test]
    fn test_banner_queued_first() {
        let (mut session, mock) = session(DataMode::PushNew);
        session.flush();
        let written = mock.get_written();
        assert_eq!(written.len(), BANNER_LEN);
        assert!(written.starts_with(b"Sabha v."));
    }

    #[test]
    fn test_push_schedule() {
        let (session, _) = session(DataMode::PushAll);
        let t0 = Instant::now();
        assert!(session.is_due(t0));
        assert_eq!(session.until_due(t0), Some(Duration::ZERO));

        let mut session = session;
        let table = DeviceTable::default();
        let mut scratch = [0u8; 64];
        session.build_round(&table, t0, &mut scratch);
        assert!(!session.is_due(t0 + Duration::from_millis(50)));
        assert!(session.is_due(t0 + Duration::from_millis(100)));
        assert_eq!(
            session.until_due(t0 + Duration::from_millis(40)),
            Some(Duration::from_millis(60))
        );
    }

    #[test]
    fn test_pull_requires_request() {
        let (mut session, _) = session(DataMode::PullNew);
        let now = Instant::now();
        assert!(!session.is_due(now));
        assert!(session.until_due(now).is_none());
        assert!(session.request_data());
        assert!(session.is_due(now));

        session.set_data_mode(DataMode::PushNew);
        assert!(!session.request_data());
    }

    #[test]
    fn test_grants() {
        let (mut session, _) = session(DataMode::PushNew);
        let addr = DeviceAddress::new(Interface::SONAR, 0);
        assert_eq!(session.access(addr), AccessMode::Closed);
        session.set_grant(addr, AccessMode::Read);
        assert_eq!(session.access(addr), AccessMode::Read);
        session.set_grant(addr, AccessMode::Error);
        assert!(session.subscription(addr).is_none());
    }

    #[test]
    fn test_frequency_zero_refused() {
        let (mut session, _) = session(DataMode::PushNew);
        assert!(!session.set_frequency(0));
        assert!(session.set_frequency(50));
        assert_eq!(session.frequency_hz(), 50);
    }

    #[test]
    fn test_empty_round_is_synch_only() {
        let (mut session, mock) = session(DataMode::PushAll);
        session.flush();
        mock.take_written();

        let table = DeviceTable::default();
        let mut scratch = [0u8; 64];
        assert_eq!(session.build_round(&table, Instant::now(), &mut scratch), 0);
        session.flush();
        let frame = Frame::decode(&mock.get_written()).unwrap();
        assert_eq!(frame.msg_type, MessageType::Synch);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_saturated_session_has_no_round_due() {
        let (mut session, mock) = session_with(256, OverflowPolicy::Backpressure);
        let (table, port) = sonar_table();
        session.set_grant(SONAR, AccessMode::Read);
        mock.set_write_capacity(Some(0));

        let t0 = Instant::now();
        let mut scratch = [0u8; 512];
        port.put_data(&[7; 100], None);
        session.build_round(&table, t0, &mut scratch);
        port.put_data(&[8; 100], None);
        session.build_round(&table, t0 + Duration::from_millis(100), &mut scratch);
        session.flush();

        let later = t0 + Duration::from_secs(1);
        assert!(!session.is_due(later));
        assert_eq!(session.until_due(later), None);
        assert!(!session.has_pending_input());

        mock.set_write_capacity(None);
        session.flush();
        assert_eq!(session.until_due(later), Some(Duration::ZERO));
        assert!(session.has_pending_input());
    }

    #[test]
    fn test_round_marker_kept_under_pressure() {
        let (mut session, mock) = session_with(200, OverflowPolicy::DropOldest);
        session.flush();
        mock.take_written();
        let (table, port) = sonar_table();
        session.set_grant(SONAR, AccessMode::Read);
        mock.set_write_capacity(Some(0));

        let t0 = Instant::now();
        let mut scratch = [0u8; 512];
        for i in 0..3u8 {
            port.put_data(&[i; 100], None);
            session.build_round(&table, t0 + Duration::from_millis(100 * u64::from(i)), &mut scratch);
        }
        mock.set_write_capacity(None);
        session.flush();

        let mut decoder = FrameDecoder::default();
        decoder.extend(&mock.get_written());
        let frames: Vec<Frame> = decoder.frames().map(|f| f.unwrap()).collect();
        let kinds: Vec<_> = frames.iter().map(|f| f.msg_type).collect();
        assert_eq!(kinds, vec![MessageType::Synch, MessageType::Data, MessageType::Synch]);
        assert_eq!(frames[1].payload, vec![2; 100]);
    }

    #[test]
    fn test_disconnect_closes() {
        let (mut session, mock) = session(DataMode::PushNew);
        mock.close_peer();
        let mut scratch = [0u8; 64];
        session.read_available(&mut scratch, 1024);
        assert!(session.is_closing());
        assert!(!session.wants_read());
    }
}
