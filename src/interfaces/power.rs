//! `power` interface: battery charge

use super::Payload;
use crate::error::Result;
use crate::protocol::bytes::PayloadReader;

/// Battery charge in decivolts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerData {
    pub charge: u16,
}

impl PowerData {
    pub fn from_volts(volts: f32) -> Self {
        Self {
            charge: (volts * 10.0).round().clamp(0.0, f32::from(u16::MAX)) as u16,
        }
    }

    pub fn volts(&self) -> f32 {
        f32::from(self.charge) / 10.0
    }
}

impl Payload for PowerData {
    fn encode(&self) -> Vec<u8> {
        self.charge.to_be_bytes().to_vec()
    }

    fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = PayloadReader::new(payload);
        let charge = r.u16()?;
        r.finish()?;
        Ok(Self { charge })
    }
}
