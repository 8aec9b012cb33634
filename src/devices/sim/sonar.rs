//! Simulated sonar ring
//!
//! Transducers are spread evenly around a circle. Every reading is the
//! configured base range plus Gaussian noise. While powered off the ring
//! publishes nothing, so subscribers see no fresh data.

use super::noise::NoiseGenerator;
use super::tick_period;
use crate::core::driver::{ConfigReply, Driver, DriverThread, StopFlag};
use crate::core::port::{DevicePort, DevicePorts};
use crate::core::types::{DeviceAddress, Interface};
use crate::error::{Error, Result};
use crate::interfaces::Payload;
use crate::interfaces::sonar::{MAX_SAMPLES, SonarData, SonarGeometry, SonarRequest};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimSonarParams {
    pub rate_hz: f64,
    /// Number of transducers
    pub count: usize,
    /// Mean reading (mm)
    pub range: f64,
    /// Reading standard deviation (mm)
    pub noise: f64,
    /// Longest reading reported (mm)
    pub max_range: u16,
    /// Radius of the ring (mm)
    pub ring_radius: f64,
    /// 0 = fresh entropy each run
    pub seed: u64,
}

impl Default for SimSonarParams {
    fn default() -> Self {
        Self {
            rate_hz: 10.0,
            count: 16,
            range: 2000.0,
            noise: 20.0,
            max_range: 5000,
            ring_radius: 200.0,
            seed: 0,
        }
    }
}

pub struct SimSonar {
    params: SimSonarParams,
    period: Duration,
    powered: Arc<AtomicBool>,
    thread: Option<DriverThread>,
}

impl SimSonar {
    pub fn new(params: SimSonarParams) -> Result<Self> {
        if params.count == 0 || params.count > MAX_SAMPLES {
            return Err(Error::InvalidParameter(format!(
                "sim_sonar count must be 1 to {}, got {}",
                MAX_SAMPLES, params.count
            )));
        }
        Ok(Self {
            period: tick_period("sim_sonar", params.rate_hz)?,
            params,
            powered: Arc::new(AtomicBool::new(true)),
            thread: None,
        })
    }

    fn geometry(&self) -> SonarGeometry {
        let count = self.params.count;
        let poses = (0..count)
            .map(|i| {
                let deg = 360.0 * i as f64 / count as f64;
                let rad = deg.to_radians();
                let yaw = if deg > 180.0 { deg - 360.0 } else { deg };
                [
                    (self.params.ring_radius * rad.cos()).round() as i16,
                    (self.params.ring_radius * rad.sin()).round() as i16,
                    yaw.round() as i16,
                ]
            })
            .collect();
        SonarGeometry { poses }
    }
}

impl Driver for SimSonar {
    fn name(&self) -> &str {
        "sim_sonar"
    }

    fn setup(&mut self, ports: &DevicePorts) -> Result<()> {
        let port = ports.require(Interface::SONAR)?;
        let params = self.params.clone();
        let period = self.period;
        let powered = Arc::clone(&self.powered);
        self.thread = Some(DriverThread::spawn("sim-sonar", move |stop| {
            simulate(port, params, period, powered, stop)
        })?);
        log::info!(
            "sim_sonar started: {} transducers at {} Hz",
            self.params.count,
            self.params.rate_hz
        );
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            log::info!("sim_sonar stopped");
        }
        Ok(())
    }

    fn handle_config(&mut self, _address: DeviceAddress, request: &[u8]) -> ConfigReply {
        match SonarRequest::decode(request) {
            Ok(SonarRequest::GetGeometry) => ConfigReply::Ack(self.geometry().encode()),
            Ok(SonarRequest::Power(on)) => {
                self.powered.store(on, Ordering::Relaxed);
                log::info!("sim_sonar: power {}", if on { "on" } else { "off" });
                ConfigReply::Ack(Vec::new())
            }
            Err(e) => {
                log::debug!("sim_sonar: {}", e);
                ConfigReply::Nack
            }
        }
    }

    fn describe(&self) -> String {
        format!("sim_sonar x{} @ {} Hz", self.params.count, self.params.rate_hz)
    }
}

fn simulate(
    port: DevicePort,
    params: SimSonarParams,
    period: Duration,
    powered: Arc<AtomicBool>,
    stop: StopFlag,
) {
    let mut noise = NoiseGenerator::new(params.seed);
    while stop.sleep(period) {
        if !powered.load(Ordering::Relaxed) {
            continue;
        }
        let ranges = (0..params.count)
            .map(|_| noise.range_mm(params.range, params.noise, params.max_range))
            .collect();
        port.put_data(&SonarData { ranges }.encode(), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const ADDR: DeviceAddress = DeviceAddress::new(Interface::SONAR, 0);

    fn params() -> SimSonarParams {
        SimSonarParams {
            rate_hz: 200.0,
            count: 8,
            noise: 0.0,
            range: 1500.0,
            seed: 3,
            ..Default::default()
        }
    }

    fn wait_for_data(port: &DevicePort) -> Option<SonarData> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 128];
        while Instant::now() < deadline {
            if let Some(sample) = port.get_data(&mut buf) {
                return SonarData::decode(&buf[..sample.len]).ok();
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_publishes_ranges() {
        let mut driver = SimSonar::new(params()).unwrap();
        let port = DevicePort::new(ADDR, None, None);
        driver.setup(&DevicePorts::new(vec![port.clone()])).unwrap();
        let data = wait_for_data(&port).unwrap();
        assert_eq!(data.ranges, vec![1500; 8]);
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_power_off_stops_fresh_data() {
        let mut driver = SimSonar::new(params()).unwrap();
        let port = DevicePort::new(ADDR, None, None);
        driver.setup(&DevicePorts::new(vec![port.clone()])).unwrap();
        wait_for_data(&port).unwrap();

        let off = SonarRequest::Power(false).encode();
        assert_eq!(driver.handle_config(ADDR, &off), ConfigReply::Ack(Vec::new()));
        // let an in-flight tick finish
        std::thread::sleep(Duration::from_millis(30));
        let stamp = port.timestamp();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(port.timestamp(), stamp);
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_geometry_ring() {
        let mut driver = SimSonar::new(params()).unwrap();
        let ConfigReply::Ack(bytes) = driver.handle_config(ADDR, &SonarRequest::GetGeometry.encode())
        else {
            panic!("geometry refused");
        };
        let geom = SonarGeometry::decode(&bytes).unwrap();
        assert_eq!(geom.poses.len(), 8);
        assert_eq!(geom.poses[0], [200, 0, 0]);
        assert_eq!(geom.poses[2], [0, 200, 90]);
        assert_eq!(geom.poses[6], [0, -200, -90]);
    }

    #[test]
    fn test_bad_params() {
        let too_many = SimSonarParams {
            count: 33,
            ..Default::default()
        };
        assert!(SimSonar::new(too_many).is_err());
    }
}
