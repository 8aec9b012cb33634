//! Blocking client for a SabhaIO server
//!
//! One TCP connection, one thread. Requests block until the reply with the
//! matching tag arrives; data frames and access announcements that arrive in
//! the meantime are kept for [`Client::read`] and [`Client::announcements`].
//!
//! ```no_run
//! use sabha_io::client::Client;
//! use sabha_io::core::types::{AccessMode, DeviceAddress, Interface};
//!
//! let mut client = Client::connect("127.0.0.1:6665")?;
//! let laser = DeviceAddress::new(Interface::LASER, 0);
//! client.change_access(laser, AccessMode::Read)?;
//! for frame in client.read()? {
//!     println!("{} sent {} bytes", frame.address, frame.payload.len());
//! }
//! # Ok::<(), sabha_io::Error>(())
//! ```

use crate::core::types::{AccessMode, DataMode, DeviceAddress};
use crate::error::{Error, Result};
use crate::protocol::frame::{BANNER_LEN, MAX_PAYLOAD_LEN, parse_banner};
use crate::protocol::requests::{AccessReply, DeviceListReply};
use crate::protocol::{Frame, FrameDecoder, MessageType, ServerRequest};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Read timeout applied on connect
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client {
    stream: TcpStream,
    decoder: FrameDecoder,
    buffer: Vec<u8>,
    version: String,
    next_tag: u32,
    data_mode: DataMode,
    /// Frames received while waiting for a reply
    pending: VecDeque<Frame>,
    announcements: Vec<AccessReply>,
}

impl Client {
    /// Connect and check the server banner
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(DEFAULT_TIMEOUT))?;

        let mut banner = [0u8; BANNER_LEN];
        stream.read_exact(&mut banner).map_err(io_error)?;
        let version = parse_banner(&banner)
            .ok_or_else(|| Error::InvalidPacket("server did not send a Sabha banner".into()))?;
        log::debug!("Connected to Sabha server v{}", version);

        Ok(Self {
            stream,
            decoder: FrameDecoder::new(MAX_PAYLOAD_LEN),
            buffer: vec![0u8; 16 * 1024],
            version,
            next_tag: 1,
            data_mode: DataMode::default(),
            pending: VecDeque::new(),
            announcements: Vec::new(),
        })
    }

    /// Version announced in the banner
    pub fn server_version(&self) -> &str {
        &self.version
    }

    /// Read timeout for replies and data. `None` blocks forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Send a request and wait for its reply.
    ///
    /// Returns the ACK payload; NACK and ERR replies become [`Error::Rejected`].
    pub fn request(&mut self, address: DeviceAddress, payload: Vec<u8>) -> Result<Vec<u8>> {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1).max(1);
        self.send(&Frame::request(address, tag, payload))?;

        loop {
            let frame = self.next_frame()?;
            if frame.msg_type.is_response() && frame.tag == tag {
                return match frame.msg_type {
                    MessageType::RespAck => Ok(frame.payload),
                    MessageType::RespNack => Err(Error::Rejected(format!("{} refused the request", address))),
                    _ => Err(Error::Rejected(format!("{} could not queue the request", address))),
                };
            }
            self.stash(frame);
        }
    }

    /// Configuration request to a device's driver
    pub fn configure(&mut self, address: DeviceAddress, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.request(address, payload)
    }

    fn server_request(&mut self, request: ServerRequest) -> Result<Vec<u8>> {
        self.request(DeviceAddress::SERVER, request.encode())
    }

    /// Ask for access to a device; returns what was granted
    pub fn change_access(&mut self, address: DeviceAddress, mode: AccessMode) -> Result<AccessReply> {
        let payload = self.server_request(ServerRequest::ChangeAccess { address, mode })?;
        let reply = AccessReply::decode(&payload)?;
        if reply.granted != mode {
            log::debug!("Asked for {} on {}, got {}", mode, address, reply.granted);
        }
        Ok(reply)
    }

    pub fn device_list(&mut self) -> Result<Vec<DeviceAddress>> {
        let payload = self.server_request(ServerRequest::DeviceList)?;
        Ok(DeviceListReply::decode(&payload)?.0)
    }

    /// Switch data mode. Rounds buffered under the previous mode are discarded.
    pub fn set_data_mode(&mut self, mode: DataMode) -> Result<()> {
        self.server_request(ServerRequest::SetDataMode(mode))?;
        self.data_mode = mode;
        self.pending.clear();
        Ok(())
    }

    pub fn set_frequency(&mut self, hz: u16) -> Result<()> {
        self.server_request(ServerRequest::SetFrequency(hz))?;
        Ok(())
    }

    /// Ask for one round; only accepted in the pull modes
    pub fn request_data(&mut self) -> Result<()> {
        self.server_request(ServerRequest::RequestData)?;
        Ok(())
    }

    pub fn authenticate(&mut self, key: &str) -> Result<()> {
        self.server_request(ServerRequest::Authenticate(key.to_string()))?;
        Ok(())
    }

    /// Fire-and-forget command; the server drops it without a write grant
    pub fn send_command(&mut self, address: DeviceAddress, payload: Vec<u8>) -> Result<()> {
        self.send(&Frame::command(address, payload))
    }

    /// Block until the next round completes and return its data frames.
    ///
    /// In [`DataMode::PushAsync`] there are no rounds: each call returns a
    /// single data frame.
    pub fn read(&mut self) -> Result<Vec<Frame>> {
        let mut round = Vec::new();
        loop {
            let frame = match self.pending.pop_front() {
                Some(frame) => frame,
                None => self.next_frame()?,
            };
            match frame.msg_type {
                MessageType::Data => {
                    round.push(frame);
                    if self.data_mode == DataMode::PushAsync {
                        return Ok(round);
                    }
                }
                MessageType::Synch => {
                    if self.data_mode != DataMode::PushAsync {
                        return Ok(round);
                    }
                }
                _ => self.stash(frame),
            }
        }
    }

    /// Access changes the server announced since the last call
    pub fn announcements(&mut self) -> Vec<AccessReply> {
        std::mem::take(&mut self.announcements)
    }

    fn send(&mut self, frame: &Frame) -> Result<()> {
        self.stream.write_all(&frame.encode()).map_err(io_error)?;
        Ok(())
    }

    /// Keep a frame that is not what the caller is waiting for
    fn stash(&mut self, frame: Frame) {
        match frame.msg_type {
            MessageType::Data | MessageType::Synch => self.pending.push_back(frame),
            MessageType::RespAck if frame.tag == 0 && frame.address.is_server() => {
                match AccessReply::decode(&frame.payload) {
                    Ok(reply) => {
                        log::info!("Server changed access to {}: {}", reply.address, reply.granted);
                        self.announcements.push(reply);
                    }
                    Err(e) => log::warn!("Malformed announcement: {}", e),
                }
            }
            other => log::debug!("Ignoring unexpected {:?} from server", other),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut self.buffer).map_err(io_error)?;
            if n == 0 {
                return Err(Error::Disconnected);
            }
            self.decoder.extend(&self.buffer[..n]);
        }
    }
}

fn io_error(e: std::io::Error) -> Error {
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::TimedOut => Error::Timeout,
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            Error::Disconnected
        }
        _ => Error::Io(e),
    }
}
