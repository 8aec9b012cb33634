//! `laser` interface: scanning range finder
//!
//! Angles are in hundredths of a degree, ranges in mm.

use super::Payload;
use crate::error::{Error, Result};
use crate::protocol::bytes::PayloadReader;

pub const MAX_SAMPLES: usize = 401;

pub const GET_GEOMETRY: u8 = 1;
pub const SET_CONFIG: u8 = 2;
pub const GET_CONFIG: u8 = 3;

/// Widest scan a device may be configured for
pub const MAX_ANGLE: i16 = 9000;
/// Resolutions a device may be configured for
pub const RESOLUTIONS: [u16; 3] = [25, 50, 100];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaserData {
    pub min_angle: i16,
    pub max_angle: i16,
    pub resolution: u16,
    pub ranges: Vec<u16>,
    /// Empty, or one value per range
    pub intensity: Vec<u8>,
}

impl Payload for LaserData {
    fn encode(&self) -> Vec<u8> {
        let count = self.ranges.len().min(MAX_SAMPLES);
        let mut out = Vec::with_capacity(8 + 3 * count);
        out.extend_from_slice(&self.min_angle.to_be_bytes());
        out.extend_from_slice(&self.max_angle.to_be_bytes());
        out.extend_from_slice(&self.resolution.to_be_bytes());
        out.extend_from_slice(&(count as u16).to_be_bytes());
        for r in &self.ranges[..count] {
            out.extend_from_slice(&r.to_be_bytes());
        }
        for i in 0..count {
            out.push(self.intensity.get(i).copied().unwrap_or(0));
        }
        out
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let min_angle = r.i16()?;
        let max_angle = r.i16()?;
        let resolution = r.u16()?;
        let count = usize::from(r.u16()?);
        if count > MAX_SAMPLES {
            return Err(Error::InvalidPacket(format!(
                "{} laser samples, at most {} allowed",
                count, MAX_SAMPLES
            )));
        }
        let ranges = (0..count).map(|_| r.u16()).collect::<Result<_>>()?;
        let intensity = r.bytes(count)?.to_vec();
        r.finish()?;
        Ok(Self {
            min_angle,
            max_angle,
            resolution,
            ranges,
            intensity,
        })
    }
}

/// Scan configuration, both the set request body and the get reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaserConfig {
    pub min_angle: i16,
    pub max_angle: i16,
    pub resolution: u16,
    pub intensity: bool,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            min_angle: -9000,
            max_angle: 9000,
            resolution: 50,
            intensity: true,
        }
    }
}

impl LaserConfig {
    /// Check angle bounds and resolution
    pub fn validate(&self) -> Result<()> {
        if self.min_angle < -MAX_ANGLE || self.max_angle > MAX_ANGLE || self.min_angle > self.max_angle {
            return Err(Error::InvalidParameter(format!(
                "scan {}..{} outside -{}..{}",
                self.min_angle, self.max_angle, MAX_ANGLE, MAX_ANGLE
            )));
        }
        if !RESOLUTIONS.contains(&self.resolution) {
            return Err(Error::InvalidParameter(format!(
                "resolution {} not one of {:?}",
                self.resolution, RESOLUTIONS
            )));
        }
        if self.sample_count() > MAX_SAMPLES {
            return Err(Error::InvalidParameter(format!(
                "{} samples per scan, at most {}",
                self.sample_count(),
                MAX_SAMPLES
            )));
        }
        Ok(())
    }

    /// Samples in one scan
    pub fn sample_count(&self) -> usize {
        let span = i32::from(self.max_angle) - i32::from(self.min_angle);
        (span / i32::from(self.resolution.max(1))) as usize + 1
    }

    fn encode_with(&self, subtype: u8) -> Vec<u8> {
        let mut out = vec![subtype];
        out.extend_from_slice(&self.min_angle.to_be_bytes());
        out.extend_from_slice(&self.max_angle.to_be_bytes());
        out.extend_from_slice(&self.resolution.to_be_bytes());
        out.push(u8::from(self.intensity));
        out
    }

    fn read(r: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            min_angle: r.i16()?,
            max_angle: r.i16()?,
            resolution: r.u16()?,
            intensity: r.u8()? != 0,
        })
    }
}

impl Payload for LaserConfig {
    /// Encoded as a get-config reply
    fn encode(&self) -> Vec<u8> {
        self.encode_with(GET_CONFIG)
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let subtype = r.u8()?;
        if subtype != GET_CONFIG && subtype != SET_CONFIG {
            return Err(Error::InvalidPacket("not a laser config packet".into()));
        }
        let config = Self::read(&mut r)?;
        r.finish()?;
        Ok(config)
    }
}

/// Pose in robot coordinates and dimensions of the scanner (mm)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaserGeometry {
    pub pose: [i16; 3],
    pub size: [i16; 2],
}

impl Payload for LaserGeometry {
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
            return Err(Error::InvalidPacket("not a laser geometry reply".into()));
        }
        let geom = Self {
            pose: [r.i16()?, r.i16()?, r.i16()?],
            size: [r.i16()?, r.i16()?],
        };
        r.finish()?;
        Ok(geom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaserRequest {
    GetGeometry,
    SetConfig(LaserConfig),
    GetConfig,
}

impl Payload for LaserRequest {
    fn encode(&self) -> Vec<u8> {
        match self {
            Self::GetGeometry => vec![GET_GEOMETRY],
            Self::SetConfig(config) => config.encode_with(SET_CONFIG),
            Self::GetConfig => vec![GET_CONFIG],
        }
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let request = match r.u8()? {
            GET_GEOMETRY => Self::GetGeometry,
            SET_CONFIG => Self::SetConfig(LaserConfig::read(&mut r)?),
            GET_CONFIG => Self::GetConfig,
            other => {
                return Err(Error::InvalidPacket(format!("unknown laser request {}", other)));
            }
        };
        r.finish()?;
        Ok(request)
    }
}
