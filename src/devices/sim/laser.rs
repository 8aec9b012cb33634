//! Simulated scanning laser in a rectangular room
//!
//! The scanner sits at a fixed pose inside an empty axis-aligned room; each
//! beam reports the distance to the first wall plus Gaussian noise. The east
//! wall is reflective and returns intensity 1 when intensity is enabled.

use super::noise::NoiseGenerator;
use super::tick_period;
use crate::core::driver::{ConfigReply, Driver, DriverThread, StopFlag};
use crate::core::port::{DevicePort, DevicePorts};
use crate::core::types::{DeviceAddress, Interface};
use crate::error::{Error, Result};
use crate::interfaces::Payload;
use crate::interfaces::laser::{LaserConfig, LaserData, LaserGeometry, LaserRequest};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimLaserParams {
    pub rate_hz: f64,
    /// Room extent along x and y (mm)
    pub room: [f64; 2],
    /// Scanner pose in the room (mm, mm, degrees)
    pub pose: [f64; 3],
    /// Range standard deviation (mm)
    pub noise: f64,
    /// Longest reading reported (mm)
    pub max_range: u16,
    /// 0 = fresh entropy each run
    pub seed: u64,
}

impl Default for SimLaserParams {
    fn default() -> Self {
        Self {
            rate_hz: 5.0,
            room: [8000.0, 6000.0],
            pose: [2000.0, 3000.0, 0.0],
            noise: 10.0,
            max_range: 8000,
            seed: 0,
        }
    }
}

impl SimLaserParams {
    fn validate(&self) -> Result<()> {
        let [w, h] = self.room;
        let [x, y, _] = self.pose;
        if !(w > 0.0 && h > 0.0) || !(0.0..=w).contains(&x) || !(0.0..=h).contains(&y) {
            return Err(Error::InvalidParameter(format!(
                "sim_laser pose ({}, {}) outside room {}x{}",
                x, y, w, h
            )));
        }
        Ok(())
    }
}

pub struct SimLaser {
    params: SimLaserParams,
    period: Duration,
    config: Arc<Mutex<LaserConfig>>,
    thread: Option<DriverThread>,
}

impl SimLaser {
    pub fn new(params: SimLaserParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            period: tick_period("sim_laser", params.rate_hz)?,
            params,
            config: Arc::new(Mutex::new(LaserConfig::default())),
            thread: None,
        })
    }
}

impl Driver for SimLaser {
    fn name(&self) -> &str {
        "sim_laser"
    }

    fn setup(&mut self, ports: &DevicePorts) -> Result<()> {
        let port = ports.require(Interface::LASER)?;
        let params = self.params.clone();
        let period = self.period;
        let config = Arc::clone(&self.config);
        self.thread = Some(DriverThread::spawn("sim-laser", move |stop| {
            simulate(port, params, period, config, stop)
        })?);
        log::info!("sim_laser started at {} Hz", self.params.rate_hz);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            log::info!("sim_laser stopped");
        }
        Ok(())
    }

    fn handle_config(&mut self, _address: DeviceAddress, request: &[u8]) -> ConfigReply {
        match LaserRequest::decode(request) {
            Ok(LaserRequest::GetGeometry) => ConfigReply::Ack(
                LaserGeometry {
                    pose: [0, 0, 0],
                    size: [155, 185],
                }
                .encode(),
            ),
            Ok(LaserRequest::GetConfig) => ConfigReply::Ack(self.config.lock().encode()),
            Ok(LaserRequest::SetConfig(config)) => match config.validate() {
                Ok(()) => {
                    *self.config.lock() = config;
                    log::info!(
                        "sim_laser: scan {}..{} step {}",
                        config.min_angle,
                        config.max_angle,
                        config.resolution
                    );
                    ConfigReply::Ack(request.to_vec())
                }
                Err(e) => {
                    log::warn!("sim_laser: {}", e);
                    ConfigReply::Nack
                }
            },
            Err(e) => {
                log::debug!("sim_laser: {}", e);
                ConfigReply::Nack
            }
        }
    }
}

/// Distance from (x, y) along `theta` to the first wall of a `w` x `h` room,
/// and whether that wall is the east one (x = w)
fn room_range(x: f64, y: f64, theta: f64, w: f64, h: f64) -> (f64, bool) {
    const EPS: f64 = 1e-12;
    let (dx, dy) = (theta.cos(), theta.sin());
    let tx = if dx > EPS {
        (w - x) / dx
    } else if dx < -EPS {
        -x / dx
    } else {
        f64::INFINITY
    };
    let ty = if dy > EPS {
        (h - y) / dy
    } else if dy < -EPS {
        -y / dy
    } else {
        f64::INFINITY
    };
    if tx <= ty {
        (tx, dx > 0.0)
    } else {
        (ty, false)
    }
}

fn scan(params: &SimLaserParams, config: &LaserConfig, noise: &mut NoiseGenerator) -> LaserData {
    let [x, y, yaw] = params.pose;
    let [w, h] = params.room;
    let count = config.sample_count();
    let mut ranges = Vec::with_capacity(count);
    let mut intensity = Vec::with_capacity(count);
    for i in 0..count {
        let hundredths = f64::from(config.min_angle) + (i * usize::from(config.resolution)) as f64;
        let theta = (yaw + hundredths / 100.0).to_radians();
        let (distance, reflective) = room_range(x, y, theta, w, h);
        ranges.push(noise.range_mm(distance, params.noise, params.max_range));
        intensity.push(u8::from(config.intensity && reflective));
    }
    LaserData {
        min_angle: config.min_angle,
        max_angle: config.max_angle,
        resolution: config.resolution,
        ranges,
        intensity,
    }
}

fn simulate(
    port: DevicePort,
    params: SimLaserParams,
    period: Duration,
    config: Arc<Mutex<LaserConfig>>,
    stop: StopFlag,
) {
    let mut noise = NoiseGenerator::new(params.seed);
    while stop.sleep(period) {
        let current = *config.lock();
        let data = scan(&params, &current, &mut noise);
        port.put_data(&data.encode(), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const ADDR: DeviceAddress = DeviceAddress::new(Interface::LASER, 0);

    fn exact() -> SimLaserParams {
        SimLaserParams {
            rate_hz: 100.0,
            noise: 0.0,
            seed: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_room_geometry() {
        let params = exact();
        let mut noise = NoiseGenerator::new(1);
        let data = scan(&params, &LaserConfig::default(), &mut noise);
        assert_eq!(data.ranges.len(), 361);
        // -90°, 0°, +90° from (2000, 3000) facing +x in an 8000 x 6000 room
        assert_eq!(data.ranges[0], 3000);
        assert_eq!(data.ranges[180], 6000);
        assert_eq!(data.ranges[360], 3000);
        assert_eq!(data.intensity[180], 1);
        assert_eq!(data.intensity[0], 0);
    }

    #[test]
    fn test_far_wall_clamped() {
        let params = SimLaserParams {
            max_range: 4000,
            ..exact()
        };
        let mut noise = NoiseGenerator::new(1);
        let data = scan(&params, &LaserConfig::default(), &mut noise);
        assert_eq!(data.ranges[180], 4000);
    }

    #[test]
    fn test_set_config_changes_scan() {
        let mut driver = SimLaser::new(exact()).unwrap();
        let port = DevicePort::new(ADDR, None, None);
        driver.setup(&DevicePorts::new(vec![port.clone()])).unwrap();

        let narrow = LaserConfig {
            min_angle: -4500,
            max_angle: 4500,
            resolution: 100,
            intensity: false,
        };
        let request = LaserRequest::SetConfig(narrow).encode();
        assert_eq!(driver.handle_config(ADDR, &request), ConfigReply::Ack(request.clone()));
        match driver.handle_config(ADDR, &LaserRequest::GetConfig.encode()) {
            ConfigReply::Ack(bytes) => assert_eq!(LaserConfig::decode(&bytes).unwrap(), narrow),
            ConfigReply::Nack => panic!("get config refused"),
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = vec![0u8; 4096];
        let mut seen = None;
        while Instant::now() < deadline && seen.is_none() {
            if let Some(sample) = port.get_data(&mut buf) {
                let data = LaserData::decode(&buf[..sample.len]).unwrap();
                if data.ranges.len() == 91 {
                    seen = Some(data);
                }
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let data = seen.unwrap();
        assert_eq!(data.min_angle, -4500);
        assert!(data.intensity.iter().all(|&i| i == 0));
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_invalid_config_refused() {
        let mut driver = SimLaser::new(exact()).unwrap();
        let bad = LaserConfig {
            resolution: 33,
            ..LaserConfig::default()
        };
        assert_eq!(
            driver.handle_config(ADDR, &LaserRequest::SetConfig(bad).encode()),
            ConfigReply::Nack
        );
        assert!(SimLaser::new(SimLaserParams {
            pose: [9000.0, 0.0, 0.0],
            ..Default::default()
        })
        .is_err());
    }
}
