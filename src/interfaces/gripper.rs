//! `gripper` interface: paddle gripper with lift

use super::Payload;
use crate::error::Result;
use crate::protocol::bytes::PayloadReader;

pub const OPEN: u8 = 1;
pub const CLOSE: u8 = 2;
pub const STOP: u8 = 3;
pub const LIFT_UP: u8 = 4;
pub const LIFT_DOWN: u8 = 5;
pub const LIFT_STOP: u8 = 6;
pub const STORE: u8 = 7;
pub const DEPLOY: u8 = 8;
pub const HALT: u8 = 15;

/// Bits of [`GripperData::state`]
pub mod state {
    pub const OPEN: u8 = 0x01;
    pub const CLOSED: u8 = 0x02;
    pub const MOVING: u8 = 0x04;
    pub const ERROR: u8 = 0x08;
    pub const LIFT_UP: u8 = 0x10;
    pub const LIFT_DOWN: u8 = 0x20;
    pub const LIFT_MOVING: u8 = 0x40;
    pub const LIFT_ERROR: u8 = 0x80;
}

/// Bits of [`GripperData::beams`]
pub mod beams {
    pub const LEFT_PADDLE: u8 = 0x01;
    pub const RIGHT_PADDLE: u8 = 0x02;
    pub const INNER: u8 = 0x04;
    pub const OUTER: u8 = 0x08;
}

/// `cmd` is one of the command codes, `arg` is used by some of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GripperCommand {
    pub cmd: u8,
    pub arg: u8,
}

impl GripperCommand {
    pub fn new(cmd: u8) -> Self {
        Self { cmd, arg: 0 }
    }
}

impl Payload for GripperCommand {
    fn encode(&self) -> Vec<u8> {
        vec![self.cmd, self.arg]
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let cmd = Self {
            cmd: r.u8()?,
            arg: r.u8()?,
        };
        r.finish()?;
        Ok(cmd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GripperData {
    pub state: u8,
    pub beams: u8,
}

impl GripperData {
    pub fn has(&self, bit: u8) -> bool {
        self.state & bit != 0
    }
}

impl Payload for GripperData {
    fn encode(&self) -> Vec<u8> {
        vec![self.state, self.beams]
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let data = Self {
            state: r.u8()?,
            beams: r.u8()?,
        };
        r.finish()?;
        Ok(data)
    }
}
