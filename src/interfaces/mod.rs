//! Typed payloads of the device interfaces
//!
//! The frame codec treats payloads as opaque bytes. Drivers and clients use
//! these types to agree on what a device's data, commands and configuration
//! requests look like. All fields are big-endian; variable-length arrays are
//! preceded by their count. Configuration requests start with a one-byte
//! subtype.

pub mod gripper;
pub mod laser;
pub mod position;
pub mod power;
pub mod sonar;
pub mod speech;

use crate::error::Result;

/// Fixed binary layout of one payload type
pub trait Payload: Sized {
    fn encode(&self) -> Vec<u8>;
    fn decode(payload: &[u8]) -> Result<Self>;
}

pub use gripper::{GripperCommand, GripperData};
pub use laser::{LaserConfig, LaserData, LaserGeometry, LaserRequest};
pub use position::{PositionCommand, PositionData, PositionGeometry, PositionRequest};
pub use power::PowerData;
pub use sonar::{SonarData, SonarGeometry, SonarRequest};
pub use speech::SpeechCommand;
