//! Core types shared by the device table, drivers and client sessions

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Device interface code, the "type" half of a device address.
///
/// Codes are fixed by the wire protocol. Unknown codes are carried opaquely
/// so a driver can serve an interface the server has no name for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interface(pub u16);

impl Interface {
    pub const SERVER: Self = Self(1);
    pub const POWER: Self = Self(2);
    pub const GRIPPER: Self = Self(3);
    pub const POSITION: Self = Self(4);
    pub const SONAR: Self = Self(5);
    pub const LASER: Self = Self(6);
    pub const BLOBFINDER: Self = Self(7);
    pub const PTZ: Self = Self(8);
    pub const AUDIO: Self = Self(9);
    pub const FIDUCIAL: Self = Self(10);
    pub const COMMS: Self = Self(11);
    pub const SPEECH: Self = Self(12);
    pub const GPS: Self = Self(13);
    pub const BUMPER: Self = Self(14);
    pub const TRUTH: Self = Self(15);
    pub const IDARTURRET: Self = Self(16);
    pub const IDAR: Self = Self(17);
    pub const DESCARTES: Self = Self(18);
    pub const MOTE: Self = Self(19);
    pub const DIO: Self = Self(20);
    pub const AIO: Self = Self(21);

    const NAMES: [(Interface, &'static str); 21] = [
        (Self::SERVER, "server"),
        (Self::POWER, "power"),
        (Self::GRIPPER, "gripper"),
        (Self::POSITION, "position"),
        (Self::SONAR, "sonar"),
        (Self::LASER, "laser"),
        (Self::BLOBFINDER, "blobfinder"),
        (Self::PTZ, "ptz"),
        (Self::AUDIO, "audio"),
        (Self::FIDUCIAL, "fiducial"),
        (Self::COMMS, "comms"),
        (Self::SPEECH, "speech"),
        (Self::GPS, "gps"),
        (Self::BUMPER, "bumper"),
        (Self::TRUTH, "truth"),
        (Self::IDARTURRET, "idarturret"),
        (Self::IDAR, "idar"),
        (Self::DESCARTES, "descartes"),
        (Self::MOTE, "mote"),
        (Self::DIO, "dio"),
        (Self::AIO, "aio"),
    ];

    /// Wire code
    #[inline]
    pub fn code(self) -> u16 {
        self.0
    }

    /// Human readable name, if the code is a known interface
    pub fn name(self) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .find(|(iface, _)| *iface == self)
            .map(|(_, name)| *name)
    }

    /// Look up an interface by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(iface, _)| *iface)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "interface#{}", self.0),
        }
    }
}

/// Unique key of a device: interface code plus index.
///
/// Textual form is `name:index`, e.g. `position:0`. A numeric interface
/// code is accepted in place of the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceAddress {
    pub interface: Interface,
    pub index: u16,
}

impl DeviceAddress {
    /// Address of the server pseudo-device that handles session requests
    pub const SERVER: Self = Self::new(Interface::SERVER, 0);

    pub const fn new(interface: Interface, index: u16) -> Self {
        Self { interface, index }
    }

    /// True for any address on the server interface, regardless of index
    #[inline]
    pub fn is_server(&self) -> bool {
        self.interface == Interface::SERVER
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.interface, self.index)
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (iface, index) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidParameter(format!("device address '{}': expected name:index", s)))?;
        let interface = Interface::from_name(iface.trim())
            .or_else(|| iface.trim().parse::<u16>().ok().map(Interface))
            .ok_or_else(|| Error::InvalidParameter(format!("unknown interface '{}'", iface)))?;
        let index = index
            .trim()
            .parse::<u16>()
            .map_err(|e| Error::InvalidParameter(format!("device index '{}': {}", index, e)))?;
        Ok(Self::new(interface, index))
    }
}

impl TryFrom<String> for DeviceAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DeviceAddress> for String {
    fn from(value: DeviceAddress) -> Self {
        value.to_string()
    }
}

/// Access mode of a device or of a session's subscription.
///
/// `Error` is the explicit "denied" grant returned by negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    #[serde(alias = "c")]
    Closed,
    #[serde(alias = "r")]
    Read,
    #[serde(alias = "w")]
    Write,
    #[serde(alias = "a")]
    All,
    #[serde(alias = "e")]
    Error,
}

impl AccessMode {
    /// Build a mode from read/write capability bits (`Closed` when neither)
    pub fn from_parts(read: bool, write: bool) -> Self {
        match (read, write) {
            (true, true) => Self::All,
            (true, false) => Self::Read,
            (false, true) => Self::Write,
            (false, false) => Self::Closed,
        }
    }

    #[inline]
    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::All)
    }

    #[inline]
    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::All)
    }

    /// True when the mode grants any access
    #[inline]
    pub fn is_open(self) -> bool {
        self.can_read() || self.can_write()
    }

    /// Capabilities present in both modes
    pub fn intersect(self, other: Self) -> Self {
        Self::from_parts(
            self.can_read() && other.can_read(),
            self.can_write() && other.can_write(),
        )
    }

    /// Wire representation (one ASCII byte)
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Closed => b'c',
            Self::Read => b'r',
            Self::Write => b'w',
            Self::All => b'a',
            Self::Error => b'e',
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'c' => Some(Self::Closed),
            b'r' => Some(Self::Read),
            b'w' => Some(Self::Write),
            b'a' => Some(Self::All),
            b'e' => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_byte() as char)
    }
}

/// How a session receives data from its subscribed devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMode {
    /// Every sample, at the session frequency
    PushAll,
    /// Every sample, once per client data request
    PullAll,
    /// Changed samples only, at the session frequency
    #[default]
    PushNew,
    /// Changed samples only, once per client data request
    PullNew,
    /// Each new sample as soon as the driver publishes it
    PushAsync,
}

impl DataMode {
    pub fn as_wire(self) -> u8 {
        match self {
            Self::PushAll => 0,
            Self::PullAll => 1,
            Self::PushNew => 2,
            Self::PullNew => 3,
            Self::PushAsync => 4,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PushAll),
            1 => Some(Self::PullAll),
            2 => Some(Self::PushNew),
            3 => Some(Self::PullNew),
            4 => Some(Self::PushAsync),
            _ => None,
        }
    }

    /// Rounds sent on a timer
    #[inline]
    pub fn is_periodic(self) -> bool {
        matches!(self, Self::PushAll | Self::PushNew)
    }

    /// Rounds sent on client request
    #[inline]
    pub fn is_pull(self) -> bool {
        matches!(self, Self::PullAll | Self::PullNew)
    }

    /// Samples already delivered are suppressed
    #[inline]
    pub fn only_new(self) -> bool {
        matches!(self, Self::PushNew | Self::PullNew | Self::PushAsync)
    }
}

/// Wall-clock time with microsecond resolution, as carried in frame headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub sec: u32,
    pub usec: u32,
}

impl Timestamp {
    pub const ZERO: Self = Self { sec: 0, usec: 0 };

    pub fn new(sec: u32, usec: u32) -> Self {
        Self::from_micros(sec as u64 * 1_000_000 + usec as u64)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: elapsed.as_secs() as u32,
            usec: elapsed.subsec_micros(),
        }
    }

    pub fn from_micros(micros: u64) -> Self {
        Self {
            sec: (micros / 1_000_000) as u32,
            usec: (micros % 1_000_000) as u32,
        }
    }

    pub fn as_micros(self) -> u64 {
        self.sec as u64 * 1_000_000 + self.usec as u64
    }

    /// `self`, bumped forward if needed so it is strictly after `previous`
    pub fn after(self, previous: Self) -> Self {
        if self > previous {
            self
        } else {
            Self::from_micros(previous.as_micros() + 1)
        }
    }

    pub fn is_zero(self) -> bool {
        self == Self::ZERO
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.sec, self.usec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parse_and_display() {
        let addr: DeviceAddress = "position:0".parse().unwrap();
        assert_eq!(addr, DeviceAddress::new(Interface::POSITION, 0));
        assert_eq!(addr.to_string(), "position:0");

        let numeric: DeviceAddress = "6:2".parse().unwrap();
        assert_eq!(numeric, DeviceAddress::new(Interface::LASER, 2));

        let unknown = DeviceAddress::new(Interface(400), 1);
        assert_eq!(unknown.to_string(), "interface#400:1");
    }

    #[test]
    fn test_address_parse_errors() {
        assert!("position".parse::<DeviceAddress>().is_err());
        assert!("teleporter:0".parse::<DeviceAddress>().is_err());
        assert!("sonar:-1".parse::<DeviceAddress>().is_err());
    }

    #[test]
    fn test_access_mode_bytes() {
        for mode in [
            AccessMode::Closed,
            AccessMode::Read,
            AccessMode::Write,
            AccessMode::All,
            AccessMode::Error,
        ] {
            assert_eq!(AccessMode::from_byte(mode.as_byte()), Some(mode));
        }
        assert_eq!(AccessMode::from_byte(b'x'), None);
    }

    #[test]
    fn test_access_mode_capabilities() {
        assert_eq!(AccessMode::from_parts(true, true), AccessMode::All);
        assert_eq!(AccessMode::from_parts(false, false), AccessMode::Closed);
        assert!(!AccessMode::Error.is_open());
        assert_eq!(AccessMode::All.intersect(AccessMode::Read), AccessMode::Read);
        assert_eq!(AccessMode::Write.intersect(AccessMode::Read), AccessMode::Closed);
    }

    #[test]
    fn test_data_mode_wire() {
        assert_eq!(DataMode::from_wire(2), Some(DataMode::PushNew));
        assert_eq!(DataMode::from_wire(4), Some(DataMode::PushAsync));
        assert_eq!(DataMode::from_wire(9), None);
        assert_eq!(DataMode::default(), DataMode::PushNew);
        assert!(DataMode::PullNew.only_new());
        assert!(!DataMode::PushAll.only_new());
    }

    #[test]
    fn test_timestamp_after() {
        let t = Timestamp::new(10, 999_999);
        let bumped = t.after(t);
        assert_eq!(bumped, Timestamp::new(11, 0));
        assert_eq!(Timestamp::new(12, 0).after(t), Timestamp::new(12, 0));
    }
}
