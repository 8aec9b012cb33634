//! Error types for SabhaIO

use crate::core::types::DeviceAddress;
use crate::protocol::ProtocolError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// SabhaIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be written
    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Wire protocol violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A device with this address is already registered
    #[error("Duplicate device address: {0}")]
    DuplicateAddress(DeviceAddress),

    /// No device registered under this address
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceAddress),

    /// Driver name not known to the driver factory
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),

    /// Driver setup failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Command rejected because its size does not match the device's command struct
    #[error("Command size mismatch on {address}: expected {expected} bytes, got {actual}")]
    CommandSize {
        /// Target device
        address: DeviceAddress,
        /// Size the driver accepts
        expected: usize,
        /// Size the client sent
        actual: usize,
    },

    /// Device does not take commands
    #[error("Device does not accept commands: {0}")]
    NotWritable(DeviceAddress),

    /// Invalid packet or payload
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Bounded queue is full
    #[error("Queue full: {0}")]
    QueueFull(&'static str),

    /// Peer closed the connection
    #[error("Disconnected")]
    Disconnected,

    /// Communication timeout
    #[error("Communication timeout")]
    Timeout,

    /// Server refused a request
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
