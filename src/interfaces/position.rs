//! `position` interface: mobile base odometry and velocity control
//!
//! Units are mm, mm/s, degrees and degrees/s.

use super::Payload;
use crate::error::{Error, Result};
use crate::protocol::bytes::PayloadReader;

pub const COMMAND_LEN: usize = 24;
pub const DATA_LEN: usize = 25;

pub const GET_GEOMETRY: u8 = 1;
pub const MOTOR_POWER: u8 = 2;
pub const VELOCITY_MODE: u8 = 3;
pub const RESET_ODOMETRY: u8 = 4;

/// Pose and velocity fields shared by command and data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionCommand {
    pub xpos: i32,
    pub ypos: i32,
    pub yaw: i32,
    pub xspeed: i32,
    pub yspeed: i32,
    pub yawspeed: i32,
}

impl PositionCommand {
    /// Velocity command with zero pose fields
    pub fn velocity(xspeed: i32, yspeed: i32, yawspeed: i32) -> Self {
        Self {
            xspeed,
            yspeed,
            yawspeed,
            ..Self::default()
        }
    }

    fn fields(&self) -> [i32; 6] {
        [self.xpos, self.ypos, self.yaw, self.xspeed, self.yspeed, self.yawspeed]
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            xpos: r.i32()?,
            ypos: r.i32()?,
            yaw: r.i32()?,
            xspeed: r.i32()?,
            yspeed: r.i32()?,
            yawspeed: r.i32()?,
        })
    }
}

impl Payload for PositionCommand {
    fn encode(&self) -> Vec<u8> {
        self.fields().iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let cmd = Self::read(&mut r)?;
        r.finish()?;
        Ok(cmd)
    }
}

/// Odometry sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionData {
    pub xpos: i32,
    pub ypos: i32,
    /// Heading in degrees, 0..360
    pub yaw: i32,
    pub xspeed: i32,
    pub yspeed: i32,
    pub yawspeed: i32,
    pub stall: bool,
}

impl Payload for PositionData {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(DATA_LEN);
        for v in [self.xpos, self.ypos, self.yaw, self.xspeed, self.yspeed, self.yawspeed] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.push(u8::from(self.stall));
        out
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let pose = PositionCommand::read(&mut r)?;
        let stall = r.u8()? != 0;
        r.finish()?;
        Ok(Self {
            xpos: pose.xpos,
            ypos: pose.ypos,
            yaw: pose.yaw,
            xspeed: pose.xspeed,
            yspeed: pose.yspeed,
            yawspeed: pose.yawspeed,
            stall,
        })
    }
}

/// Geometry reply: base pose in robot coordinates and footprint (mm, mm, deg)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionGeometry {
    pub pose: [u16; 3],
    pub size: [u16; 2],
}

impl Payload for PositionGeometry {
    fn encode(&self) -> Vec<u8> {
        let mut out = vec![GET_GEOMETRY];
        for v in self.pose.iter().chain(self.size.iter()) {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        if r.u8()? != GET_GEOMETRY {
            return Err(Error::InvalidPacket("not a position geometry reply".into()));
        }
        let geom = Self {
            pose: [r.u16()?, r.u16()?, r.u16()?],
            size: [r.u16()?, r.u16()?],
        };
        r.finish()?;
        Ok(geom)
    }
}

/// Configuration requests understood by position devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionRequest {
    GetGeometry,
    MotorPower(bool),
    /// 0 = direct wheel velocities, 1 = separate translation and rotation
    VelocityMode(u8),
    ResetOdometry,
}

impl Payload for PositionRequest {
    fn encode(&self) -> Vec<u8> {
        match *self {
            Self::GetGeometry => vec![GET_GEOMETRY],
            Self::MotorPower(on) => vec![MOTOR_POWER, u8::from(on)],
            Self::VelocityMode(mode) => vec![VELOCITY_MODE, mode],
            Self::ResetOdometry => vec![RESET_ODOMETRY],
        }
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let request = match r.u8()? {
            GET_GEOMETRY => Self::GetGeometry,
            MOTOR_POWER => Self::MotorPower(r.u8()? != 0),
            VELOCITY_MODE => Self::VelocityMode(r.u8()?),
            RESET_ODOMETRY => Self::ResetOdometry,
            other => {
                return Err(Error::InvalidPacket(format!(
                    "unknown position request {}",
                    other
                )));
            }
        };
        r.finish()?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_layout() {
        let cmd = PositionCommand::velocity(200, 0, -15);
        let bytes = cmd.encode();
        assert_eq!(bytes.len(), COMMAND_LEN);
        assert_eq!(&bytes[12..16], &200i32.to_be_bytes());
        assert_eq!(&bytes[20..24], &(-15i32).to_be_bytes());
        assert_eq!(PositionCommand::decode(&bytes).unwrap(), cmd);
        assert!(PositionCommand::decode(&bytes[..23]).is_err());
    }

    #[test]
    fn test_data_stall_flag() {
        let data = PositionData {
            xpos: -1000,
            yaw: 270,
            stall: true,
            ..Default::default()
        };
        let bytes = data.encode();
        assert_eq!(bytes.len(), DATA_LEN);
        assert_eq!(bytes[24], 1);
        assert_eq!(PositionData::decode(&bytes).unwrap(), data);
    }

    #[test]
    fn test_requests() {
        assert_eq!(PositionRequest::MotorPower(true).encode(), vec![2, 1]);
        assert_eq!(
            PositionRequest::decode(&[4]).unwrap(),
            PositionRequest::ResetOdometry
        );
        assert!(PositionRequest::decode(&[9]).is_err());
        assert!(PositionRequest::decode(&[2]).is_err());
        assert!(PositionRequest::decode(&[1, 0]).is_err());
    }
}
