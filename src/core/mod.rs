//! Core abstractions: device addressing, driver contract and device table

pub mod device_table;
pub mod driver;
pub mod port;
pub mod types;

pub use device_table::{DeviceTable, Grant, PendingRequest, SessionId};
pub use driver::{ConfigReply, Driver, DriverCell, DriverRef, DriverThread, StopFlag};
pub use port::{DataSample, DevicePort, DevicePorts};
pub use types::{AccessMode, DataMode, DeviceAddress, Interface, Timestamp};
