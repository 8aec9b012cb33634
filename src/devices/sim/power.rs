//! Simulated battery
//!
//! Polled by the client manager while subscribed: the charge drains with
//! elapsed time and is published once per `period_ms`. An empty battery is
//! swapped for a full one.

use crate::core::driver::Driver;
use crate::core::port::{DevicePort, DevicePorts};
use crate::core::types::Interface;
use crate::error::{Error, Result};
use crate::interfaces::Payload;
use crate::interfaces::power::PowerData;
use serde::Deserialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimPowerParams {
    pub full_volts: f32,
    pub empty_volts: f32,
    /// Drain rate in volts per second
    pub drain: f32,
    /// Publish period
    pub period_ms: u64,
}

impl Default for SimPowerParams {
    fn default() -> Self {
        Self {
            full_volts: 13.0,
            empty_volts: 11.0,
            drain: 0.001,
            period_ms: 1000,
        }
    }
}

pub struct SimPower {
    params: SimPowerParams,
    port: Option<DevicePort>,
    volts: f32,
    last_update: Option<Instant>,
    last_publish: Option<Instant>,
}

impl SimPower {
    pub fn new(params: SimPowerParams) -> Result<Self> {
        if params.empty_volts >= params.full_volts || params.drain < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "sim_power needs empty_volts < full_volts and a non-negative drain, got {} / {} / {}",
                params.empty_volts, params.full_volts, params.drain
            )));
        }
        Ok(Self {
            volts: params.full_volts,
            params,
            port: None,
            last_update: None,
            last_publish: None,
        })
    }

    /// Advance the simulation to `now`
    fn step(&mut self, now: Instant) {
        let Some(port) = &self.port else {
            return;
        };
        if let Some(last) = self.last_update {
            self.volts -= self.params.drain * now.duration_since(last).as_secs_f32();
            if self.volts <= self.params.empty_volts {
                log::info!("sim_power: battery empty, swapped");
                self.volts = self.params.full_volts;
            }
        }
        self.last_update = Some(now);

        let due = self
            .last_publish
            .is_none_or(|t| now.duration_since(t) >= Duration::from_millis(self.params.period_ms));
        if due {
            port.put_data(&PowerData::from_volts(self.volts).encode(), None);
            self.last_publish = Some(now);
        }
    }
}

impl Driver for SimPower {
    fn name(&self) -> &str {
        "sim_power"
    }

    fn setup(&mut self, ports: &DevicePorts) -> Result<()> {
        self.port = Some(ports.require(Interface::POWER)?);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    fn update(&mut self) {
        self.step(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DeviceAddress;

    fn charge(port: &DevicePort) -> u16 {
        let mut buf = [0u8; 2];
        let sample = port.get_data(&mut buf).unwrap();
        PowerData::decode(&buf[..sample.len]).unwrap().charge
    }

    #[test]
    fn test_drains_and_publishes_per_period() {
        let mut driver = SimPower::new(SimPowerParams {
            drain: 0.1,
            ..Default::default()
        })
        .unwrap();
        let port = DevicePort::new(DeviceAddress::new(Interface::POWER, 0), None, None);
        driver.setup(&DevicePorts::new(vec![port.clone()])).unwrap();

        let t0 = Instant::now();
        driver.step(t0);
        assert_eq!(charge(&port), 130);
        let first = port.timestamp();

        driver.step(t0 + Duration::from_millis(500));
        assert_eq!(port.timestamp(), first);

        driver.step(t0 + Duration::from_secs(2));
        assert_eq!(charge(&port), 128);
        assert_ne!(port.timestamp(), first);
    }

    #[test]
    fn test_empty_battery_swapped() {
        let mut driver = SimPower::new(SimPowerParams {
            drain: 1.0,
            period_ms: 0,
            ..Default::default()
        })
        .unwrap();
        let port = DevicePort::new(DeviceAddress::new(Interface::POWER, 0), None, None);
        driver.setup(&DevicePorts::new(vec![port.clone()])).unwrap();
        let t0 = Instant::now();
        driver.step(t0);
        driver.step(t0 + Duration::from_secs(3));
        assert_eq!(charge(&port), 130);
    }

    #[test]
    fn test_no_port_no_panic() {
        let mut driver = SimPower::new(SimPowerParams::default()).unwrap();
        driver.update();
        assert!(SimPower::new(SimPowerParams {
            empty_volts: 14.0,
            ..Default::default()
        })
        .is_err());
    }
}
