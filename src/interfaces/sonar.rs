//! `sonar` interface: fixed ring of range finders (mm)

use super::Payload;
use crate::error::{Error, Result};
use crate::protocol::bytes::PayloadReader;

pub const MAX_SAMPLES: usize = 32;

pub const GET_GEOMETRY: u8 = 1;
pub const POWER: u8 = 2;

fn check_count(count: usize) -> Result<()> {
    if count > MAX_SAMPLES {
        return Err(Error::InvalidPacket(format!(
            "{} sonar samples, at most {} allowed",
            count, MAX_SAMPLES
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SonarData {
    pub ranges: Vec<u16>,
}

impl Payload for SonarData {
    fn encode(&self) -> Vec<u8> {
        let count = self.ranges.len().min(MAX_SAMPLES);
        let mut out = Vec::with_capacity(2 + 2 * count);
        out.extend_from_slice(&(count as u16).to_be_bytes());
        for r in &self.ranges[..count] {
            out.extend_from_slice(&r.to_be_bytes());
        }
        out
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let count = usize::from(r.u16()?);
        check_count(count)?;
        let ranges = (0..count).map(|_| r.u16()).collect::<Result<_>>()?;
        r.finish()?;
        Ok(Self { ranges })
    }
}

/// Pose of each transducer in robot coordinates (mm, mm, degrees)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SonarGeometry {
    pub poses: Vec<[i16; 3]>,
}

impl Payload for SonarGeometry {
    fn encode(&self) -> Vec<u8> {
        let count = self.poses.len().min(MAX_SAMPLES);
        let mut out = vec![GET_GEOMETRY];
        out.extend_from_slice(&(count as u16).to_be_bytes());
        for pose in &self.poses[..count] {
            for v in pose {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        out
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        if r.u8()? != GET_GEOMETRY {
            return Err(Error::InvalidPacket("not a sonar geometry reply".into()));
        }
        let count = usize::from(r.u16()?);
        check_count(count)?;
        let poses = (0..count)
            .map(|_| Ok([r.i16()?, r.i16()?, r.i16()?]))
            .collect::<Result<_>>()?;
        r.finish()?;
        Ok(Self { poses })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SonarRequest {
    GetGeometry,
    Power(bool),
}

impl Payload for SonarRequest {
    fn encode(&self) -> Vec<u8> {
        match *self {
            Self::GetGeometry => vec![GET_GEOMETRY],
            Self::Power(on) => vec![POWER, u8::from(on)],
        }
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let request = match r.u8()? {
            GET_GEOMETRY => Self::GetGeometry,
            POWER => Self::Power(r.u8()? != 0),
            other => {
                return Err(Error::InvalidPacket(format!("unknown sonar request {}", other)));
            }
        };
        r.finish()?;
        Ok(request)
    }
}
