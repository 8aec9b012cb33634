//! Frame header and message types

use super::ProtocolError;
use crate::core::types::{DeviceAddress, Interface, Timestamp};

/// Header sync word
pub const STX: u16 = 0x5878;
/// Fixed header size
pub const HEADER_LEN: usize = 32;
/// Largest frame (header + payload) either side may send
pub const MAX_FRAME_LEN: usize = 8192;
/// Largest payload that fits in a frame
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADER_LEN;
/// Size of the identification banner sent after accept
pub const BANNER_LEN: usize = 32;
/// Banner text before the version number
pub const BANNER_PREFIX: &str = "Sabha v.";

/// Message type carried in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    Data = 1,
    Command = 2,
    Request = 3,
    RespAck = 4,
    Synch = 5,
    RespNack = 6,
    RespErr = 7,
}

impl MessageType {
    pub fn from_wire(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Data),
            2 => Some(Self::Command),
            3 => Some(Self::Request),
            4 => Some(Self::RespAck),
            5 => Some(Self::Synch),
            6 => Some(Self::RespNack),
            7 => Some(Self::RespErr),
            _ => None,
        }
    }

    #[inline]
    pub fn as_wire(self) -> u16 {
        self as u16
    }

    /// Reply to a request
    pub fn is_response(self) -> bool {
        matches!(self, Self::RespAck | Self::RespNack | Self::RespErr)
    }
}

/// One complete wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub address: DeviceAddress,
    /// When the frame was sent
    pub time: Timestamp,
    /// When the data was produced
    pub timestamp: Timestamp,
    /// Request/reply correlation tag
    pub tag: u32,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_type: MessageType, address: DeviceAddress, payload: Vec<u8>) -> Self {
        let now = Timestamp::now();
        Self {
            msg_type,
            address,
            time: now,
            timestamp: now,
            tag: 0,
            payload,
        }
    }

    /// Data sample from a device
    pub fn data(address: DeviceAddress, timestamp: Timestamp, payload: Vec<u8>) -> Self {
        Self {
            timestamp,
            ..Self::new(MessageType::Data, address, payload)
        }
    }

    /// End-of-round marker
    pub fn synch() -> Self {
        Self::new(MessageType::Synch, DeviceAddress::SERVER, Vec::new())
    }

    pub fn command(address: DeviceAddress, payload: Vec<u8>) -> Self {
        Self::new(MessageType::Command, address, payload)
    }

    pub fn request(address: DeviceAddress, tag: u32, payload: Vec<u8>) -> Self {
        Self {
            tag,
            ..Self::new(MessageType::Request, address, payload)
        }
    }

    /// Reply with the given response type, echoing address and tag
    pub fn reply(kind: MessageType, address: DeviceAddress, tag: u32, payload: Vec<u8>) -> Self {
        debug_assert!(kind.is_response());
        Self {
            tag,
            ..Self::new(kind, address, payload)
        }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialize header and payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&STX.to_be_bytes());
        out.extend_from_slice(&self.msg_type.as_wire().to_be_bytes());
        out.extend_from_slice(&self.address.interface.code().to_be_bytes());
        out.extend_from_slice(&self.address.index.to_be_bytes());
        out.extend_from_slice(&self.time.sec.to_be_bytes());
        out.extend_from_slice(&self.time.usec.to_be_bytes());
        out.extend_from_slice(&self.timestamp.sec.to_be_bytes());
        out.extend_from_slice(&self.timestamp.usec.to_be_bytes());
        out.extend_from_slice(&self.tag.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.payload);
    }

    /// Parse exactly one frame from `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = Header::parse(bytes, MAX_PAYLOAD_LEN)?;
        let total = HEADER_LEN + header.size;
        if bytes.len() < total {
            return Err(ProtocolError::Truncated {
                needed: total,
                available: bytes.len(),
            });
        }
        Ok(header.into_frame(bytes[HEADER_LEN..total].to_vec()))
    }
}

/// Parsed frame header
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub msg_type: MessageType,
    pub address: DeviceAddress,
    pub time: Timestamp,
    pub timestamp: Timestamp,
    pub tag: u32,
    pub size: usize,
}

impl Header {
    /// Parse the first `HEADER_LEN` bytes of `bytes`
    pub fn parse(bytes: &[u8], max_payload: usize) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                needed: HEADER_LEN,
                available: bytes.len(),
            });
        }
        let u16_at = |o: usize| u16::from_be_bytes([bytes[o], bytes[o + 1]]);
        let u32_at =
            |o: usize| u32::from_be_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);

        let stx = u16_at(0);
        if stx != STX {
            return Err(ProtocolError::BadStx(stx));
        }
        let type_code = u16_at(2);
        let msg_type =
            MessageType::from_wire(type_code).ok_or(ProtocolError::UnknownMessageType(type_code))?;
        let size = u32_at(28) as usize;
        if size > max_payload {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                max: max_payload,
            });
        }

        Ok(Self {
            msg_type,
            address: DeviceAddress::new(Interface(u16_at(4)), u16_at(6)),
            time: Timestamp {
                sec: u32_at(8),
                usec: u32_at(12),
            },
            timestamp: Timestamp {
                sec: u32_at(16),
                usec: u32_at(20),
            },
            tag: u32_at(24),
            size,
        })
    }

    pub fn into_frame(self, payload: Vec<u8>) -> Frame {
        Frame {
            msg_type: self.msg_type,
            address: self.address,
            time: self.time,
            timestamp: self.timestamp,
            tag: self.tag,
            payload,
        }
    }
}

/// Identification banner sent to every new connection
pub fn banner() -> [u8; BANNER_LEN] {
    let text = format!("{}{}", BANNER_PREFIX, env!("CARGO_PKG_VERSION"));
    let mut out = [0u8; BANNER_LEN];
    let n = text.len().min(BANNER_LEN);
    out[..n].copy_from_slice(&text.as_bytes()[..n]);
    out
}

/// Version string from a banner, if it is one of ours
pub fn parse_banner(bytes: &[u8; BANNER_LEN]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(BANNER_LEN);
    let text = std::str::from_utf8(&bytes[..end]).ok()?;
    text.strip_prefix(BANNER_PREFIX).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> Frame {
        Frame {
            msg_type: MessageType::Data,
            address: DeviceAddress::new(Interface::SONAR, 1),
            time: Timestamp::new(1000, 5),
            timestamp: Timestamp::new(999, 999_000),
            tag: 0,
            payload: vec![0, 16, 1, 2, 3],
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample_frame().encode();
        assert_eq!(bytes.len(), HEADER_LEN + 5);
        assert_eq!(&bytes[0..2], &[0x58, 0x78]);
        assert_eq!(&bytes[2..4], &[0, 1]);
        assert_eq!(&bytes[4..6], &[0, 5]);
        assert_eq!(&bytes[6..8], &[0, 1]);
        assert_eq!(&bytes[8..12], &1000u32.to_be_bytes());
        assert_eq!(&bytes[20..24], &999_000u32.to_be_bytes());
        assert_eq!(&bytes[28..32], &[0, 0, 0, 5]);
        assert_eq!(&bytes[32..], &[0, 16, 1, 2, 3]);
    }

    #[test]
    fn test_decode_encode_identity() {
        let frame = sample_frame();
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn test_bad_stx() {
        let mut bytes = sample_frame().encode();
        bytes[0] = 0x12;
        assert!(matches!(Frame::decode(&bytes), Err(ProtocolError::BadStx(_))));
    }

    #[test]
    fn test_unknown_type() {
        let mut bytes = sample_frame().encode();
        bytes[3] = 42;
        assert_eq!(
            Frame::decode(&bytes),
            Err(ProtocolError::UnknownMessageType(42))
        );
    }

    #[test]
    fn test_oversized_payload() {
        let mut bytes = sample_frame().encode();
        bytes[28..32].copy_from_slice(&(MAX_PAYLOAD_LEN as u32 + 1).to_be_bytes());
        assert!(matches!(
            Frame::decode(&bytes),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_reply_echoes_tag() {
        let reply = Frame::reply(
            MessageType::RespNack,
            DeviceAddress::new(Interface::LASER, 0),
            77,
            Vec::new(),
        );
        assert_eq!(reply.tag, 77);
        assert!(reply.msg_type.is_response());
    }

    #[test]
    fn test_banner() {
        let b = banner();
        assert!(b.starts_with(BANNER_PREFIX.as_bytes()));
        assert_eq!(parse_banner(&b).as_deref(), Some(env!("CARGO_PKG_VERSION")));
        assert_eq!(parse_banner(&[b'x'; BANNER_LEN]), None);
    }
}
