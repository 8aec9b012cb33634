//! Requests handled by the server itself (interface `server`)
//!
//! Every payload starts with a big-endian u16 subtype. Malformed payloads and
//! unknown subtypes are answered with NACK.

use super::bytes::{PayloadReader, put_fixed_str};
use crate::core::types::{AccessMode, DataMode, DeviceAddress, Interface};
use crate::error::{Error, Result};

pub const DEVICE_LIST: u16 = 1;
pub const DEVICE: u16 = 2;
pub const DATA: u16 = 3;
pub const DATA_MODE: u16 = 4;
pub const DATA_FREQ: u16 = 5;
pub const AUTH: u16 = 6;

/// Width of the driver name field in access replies
pub const DRIVER_NAME_LEN: usize = 64;
/// Width of the authentication key field
pub const AUTH_KEY_LEN: usize = 32;

/// Session control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRequest {
    /// List registered devices
    DeviceList,
    /// Open, change or close access to a device
    ChangeAccess {
        address: DeviceAddress,
        mode: AccessMode,
    },
    /// Deliver one round (pull modes only)
    RequestData,
    SetDataMode(DataMode),
    /// Push rate in Hz
    SetFrequency(u16),
    /// Present the server key
    Authenticate(String),
}

impl ServerRequest {
    pub fn subtype(&self) -> u16 {
        match self {
            Self::DeviceList => DEVICE_LIST,
            Self::ChangeAccess { .. } => DEVICE,
            Self::RequestData => DATA,
            Self::SetDataMode(_) => DATA_MODE,
            Self::SetFrequency(_) => DATA_FREQ,
            Self::Authenticate(_) => AUTH,
        }
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let subtype = r.u16()?;
        let request = match subtype {
            DEVICE_LIST => Self::DeviceList,
            DEVICE => {
                let interface = Interface(r.u16()?);
                let index = r.u16()?;
                let raw = r.u8()?;
                let mode = AccessMode::from_byte(raw).ok_or_else(|| {
                    Error::InvalidPacket(format!("unknown access mode {:#04x}", raw))
                })?;
                Self::ChangeAccess {
                    address: DeviceAddress::new(interface, index),
                    mode,
                }
            }
            DATA => Self::RequestData,
            DATA_MODE => {
                let raw = r.u8()?;
                Self::SetDataMode(
                    DataMode::from_wire(raw)
                        .ok_or_else(|| Error::InvalidPacket(format!("unknown data mode {}", raw)))?,
                )
            }
            DATA_FREQ => Self::SetFrequency(r.u16()?),
            AUTH => Self::Authenticate(r.fixed_str(AUTH_KEY_LEN)?),
            other => {
                return Err(Error::InvalidPacket(format!(
                    "unknown server request subtype {}",
                    other
                )));
            }
        };
        r.finish()?;
        Ok(request)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.subtype().to_be_bytes().to_vec();
        match self {
            Self::DeviceList | Self::RequestData => {}
            Self::ChangeAccess { address, mode } => {
                out.extend_from_slice(&address.interface.code().to_be_bytes());
                out.extend_from_slice(&address.index.to_be_bytes());
                out.push(mode.as_byte());
            }
            Self::SetDataMode(mode) => out.push(mode.as_wire()),
            Self::SetFrequency(hz) => out.extend_from_slice(&hz.to_be_bytes()),
            Self::Authenticate(key) => put_fixed_str(&mut out, key, AUTH_KEY_LEN),
        }
        out
    }
}

/// Reply to [`ServerRequest::DeviceList`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceListReply(pub Vec<DeviceAddress>);

impl DeviceListReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.0.len() * 4);
        out.extend_from_slice(&DEVICE_LIST.to_be_bytes());
        out.extend_from_slice(&(self.0.len() as u16).to_be_bytes());
        for addr in &self.0 {
            out.extend_from_slice(&addr.interface.code().to_be_bytes());
            out.extend_from_slice(&addr.index.to_be_bytes());
        }
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        expect_subtype(&mut r, DEVICE_LIST)?;
        let count = r.u16()?;
        let mut addrs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let interface = Interface(r.u16()?);
            addrs.push(DeviceAddress::new(interface, r.u16()?));
        }
        r.finish()?;
        Ok(Self(addrs))
    }
}

/// Reply to [`ServerRequest::ChangeAccess`], also used to announce revoked access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessReply {
    pub address: DeviceAddress,
    pub granted: AccessMode,
    pub driver_name: String,
}

impl AccessReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7 + DRIVER_NAME_LEN);
        out.extend_from_slice(&DEVICE.to_be_bytes());
        out.extend_from_slice(&self.address.interface.code().to_be_bytes());
        out.extend_from_slice(&self.address.index.to_be_bytes());
        out.push(self.granted.as_byte());
        put_fixed_str(&mut out, &self.driver_name, DRIVER_NAME_LEN);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        expect_subtype(&mut r, DEVICE)?;
        let interface = Interface(r.u16()?);
        let address = DeviceAddress::new(interface, r.u16()?);
        let raw = r.u8()?;
        let granted = AccessMode::from_byte(raw)
            .ok_or_else(|| Error::InvalidPacket(format!("unknown access mode {:#04x}", raw)))?;
        let driver_name = r.fixed_str(DRIVER_NAME_LEN)?;
        r.finish()?;
        Ok(Self {
            address,
            granted,
            driver_name,
        })
    }
}

/// Subtype of a server request or reply payload
pub fn subtype_of(payload: &[u8]) -> Option<u16> {
    (payload.len() >= 2).then(|| u16::from_be_bytes([payload[0], payload[1]]))
}

fn expect_subtype(r: &mut PayloadReader<'_>, expected: u16) -> Result<()> {
    let subtype = r.u16()?;
    if subtype != expected {
        return Err(Error::InvalidPacket(format!(
            "expected reply subtype {}, got {}",
            expected, subtype
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_access_layout() {
        let req = ServerRequest::ChangeAccess {
            address: DeviceAddress::new(Interface::SONAR, 2),
            mode: AccessMode::Read,
        };
        let bytes = req.encode();
        assert_eq!(bytes, vec![0, 2, 0, 5, 0, 2, b'r']);
        assert_eq!(ServerRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn test_decode_session_settings() {
        assert_eq!(
            ServerRequest::decode(&[0, 4, 3]).unwrap(),
            ServerRequest::SetDataMode(DataMode::PullNew)
        );
        assert_eq!(
            ServerRequest::decode(&[0, 5, 0, 25]).unwrap(),
            ServerRequest::SetFrequency(25)
        );
        assert_eq!(
            ServerRequest::decode(&[0, 3]).unwrap(),
            ServerRequest::RequestData
        );
    }

    #[test]
    fn test_malformed_requests_rejected() {
        // unknown subtype
        assert!(ServerRequest::decode(&[0, 99]).is_err());
        // wrong sizes
        assert!(ServerRequest::decode(&[0, 5, 1]).is_err());
        assert!(ServerRequest::decode(&[0, 1, 0]).is_err());
        assert!(ServerRequest::decode(&[0]).is_err());
        // unknown access byte and data mode
        assert!(ServerRequest::decode(&[0, 2, 0, 4, 0, 0, b'z']).is_err());
        assert!(ServerRequest::decode(&[0, 4, 7]).is_err());
    }

    #[test]
    fn test_auth_key_padded() {
        let req = ServerRequest::Authenticate("secret".into());
        let bytes = req.encode();
        assert_eq!(bytes.len(), 2 + AUTH_KEY_LEN);
        assert_eq!(ServerRequest::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn test_access_reply() {
        let reply = AccessReply {
            address: DeviceAddress::new(Interface::POSITION, 0),
            granted: AccessMode::All,
            driver_name: "sim_position".into(),
        };
        let bytes = reply.encode();
        assert_eq!(bytes.len(), 7 + DRIVER_NAME_LEN);
        assert_eq!(subtype_of(&bytes), Some(DEVICE));
        assert_eq!(AccessReply::decode(&bytes).unwrap(), reply);
    }

    #[test]
    fn test_device_list_reply() {
        let reply = DeviceListReply(vec![
            DeviceAddress::new(Interface::POSITION, 0),
            DeviceAddress::new(Interface::LASER, 0),
        ]);
        let bytes = reply.encode();
        assert_eq!(&bytes[..4], &[0, 1, 0, 2]);
        assert_eq!(DeviceListReply::decode(&bytes).unwrap(), reply);
        assert!(AccessReply::decode(&bytes).is_err());
    }
}
