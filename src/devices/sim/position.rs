//! Simulated mobile base
//!
//! A producer thread integrates the commanded forward and turn speeds with a
//! differential drive model and publishes odometry at `rate_hz`. Speeds are
//! clamped to the configured limits; with the motors off the base holds
//! still whatever it is told.

use super::kinematics::DiffDrive;
use super::tick_period;
use crate::core::driver::{ConfigReply, Driver, DriverThread, StopFlag};
use crate::core::port::{DevicePort, DevicePorts};
use crate::core::types::{DeviceAddress, Interface};
use crate::error::Result;
use crate::interfaces::Payload;
use crate::interfaces::position::{
    COMMAND_LEN, PositionCommand, PositionData, PositionGeometry, PositionRequest,
};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimPositionParams {
    /// Odometry publish rate
    pub rate_hz: f64,
    /// Forward speed limit (mm/s)
    pub max_speed: i32,
    /// Turn rate limit (deg/s)
    pub max_turn_rate: i32,
    /// Footprint (mm, mm)
    pub size: [u16; 2],
    /// Distance between the wheels (mm), used in direct wheel velocity mode
    pub wheel_base: f64,
    /// Motors powered at startup
    pub motors_on: bool,
}

impl Default for SimPositionParams {
    fn default() -> Self {
        Self {
            rate_hz: 10.0,
            max_speed: 1000,
            max_turn_rate: 180,
            size: [445, 400],
            wheel_base: 330.0,
            motors_on: true,
        }
    }
}

/// Flags set by configuration requests, read by the producer thread
struct Control {
    motors_on: AtomicBool,
    reset_odometry: AtomicBool,
    velocity_mode: AtomicU8,
}

pub struct SimPosition {
    params: SimPositionParams,
    period: Duration,
    control: Arc<Control>,
    thread: Option<DriverThread>,
}

impl SimPosition {
    pub fn new(params: SimPositionParams) -> Result<Self> {
        Ok(Self {
            period: tick_period("sim_position", params.rate_hz)?,
            control: Arc::new(Control {
                motors_on: AtomicBool::new(params.motors_on),
                reset_odometry: AtomicBool::new(false),
                velocity_mode: AtomicU8::new(1),
            }),
            params,
            thread: None,
        })
    }
}

impl Driver for SimPosition {
    fn name(&self) -> &str {
        "sim_position"
    }

    fn command_size(&self, interface: Interface) -> Option<usize> {
        (interface == Interface::POSITION).then_some(COMMAND_LEN)
    }

    fn setup(&mut self, ports: &DevicePorts) -> Result<()> {
        let port = ports.require(Interface::POSITION)?;
        let params = self.params.clone();
        let control = Arc::clone(&self.control);
        let period = self.period;
        self.thread = Some(DriverThread::spawn("sim-position", move |stop| {
            simulate(port, params, period, control, stop)
        })?);
        log::info!("sim_position started at {} Hz", self.params.rate_hz);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            log::info!("sim_position stopped");
        }
        Ok(())
    }

    fn handle_config(&mut self, _address: DeviceAddress, request: &[u8]) -> ConfigReply {
        let request = match PositionRequest::decode(request) {
            Ok(request) => request,
            Err(e) => {
                log::debug!("sim_position: {}", e);
                return ConfigReply::Nack;
            }
        };
        match request {
            PositionRequest::GetGeometry => ConfigReply::Ack(
                PositionGeometry {
                    pose: [0, 0, 0],
                    size: self.params.size,
                }
                .encode(),
            ),
            PositionRequest::MotorPower(on) => {
                self.control.motors_on.store(on, Ordering::Relaxed);
                log::info!("sim_position: motors {}", if on { "on" } else { "off" });
                ConfigReply::Ack(Vec::new())
            }
            PositionRequest::VelocityMode(mode) if mode <= 1 => {
                self.control.velocity_mode.store(mode, Ordering::Relaxed);
                ConfigReply::Ack(Vec::new())
            }
            PositionRequest::VelocityMode(_) => ConfigReply::Nack,
            PositionRequest::ResetOdometry => {
                self.control.reset_odometry.store(true, Ordering::Relaxed);
                ConfigReply::Ack(Vec::new())
            }
        }
    }

    fn stop_command(&self, interface: Interface) -> Option<Vec<u8>> {
        (interface == Interface::POSITION).then(|| PositionCommand::default().encode())
    }

    fn describe(&self) -> String {
        format!("sim_position @ {} Hz", self.params.rate_hz)
    }
}

fn simulate(
    port: DevicePort,
    params: SimPositionParams,
    period: Duration,
    control: Arc<Control>,
    stop: StopFlag,
) {
    let mut drive = DiffDrive::default();
    let mut command = PositionCommand::default();
    let mut last = Instant::now();

    while stop.sleep(period) {
        if let Some(bytes) = port.take_command() {
            match PositionCommand::decode(&bytes) {
                Ok(c) => command = c,
                Err(e) => log::warn!("sim_position: bad command: {}", e),
            }
        }
        if control.reset_odometry.swap(false, Ordering::Relaxed) {
            drive.reset();
            log::info!("sim_position: odometry reset");
        }

        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64();
        last = now;

        let (speed, turn) = if !control.motors_on.load(Ordering::Relaxed) {
            (0, 0)
        } else if control.velocity_mode.load(Ordering::Relaxed) == 0 {
            // xspeed and yspeed carry the left and right wheel speeds
            let (left, right) = (f64::from(command.xspeed), f64::from(command.yspeed));
            let turn = ((right - left) / params.wheel_base).to_degrees();
            (
                clamp_speed(((left + right) / 2.0).round(), params.max_speed),
                clamp_speed(turn.round(), params.max_turn_rate),
            )
        } else {
            (
                command.xspeed.clamp(-params.max_speed, params.max_speed),
                command.yawspeed.clamp(-params.max_turn_rate, params.max_turn_rate),
            )
        };
        drive.integrate(dt, f64::from(speed), f64::from(turn).to_radians());

        let data = PositionData {
            xpos: drive.x.round() as i32,
            ypos: drive.y.round() as i32,
            yaw: drive.yaw_degrees(),
            xspeed: speed,
            yspeed: 0,
            yawspeed: turn,
            stall: false,
        };
        port.put_data(&data.encode(), None);
    }
}

fn clamp_speed(value: f64, limit: i32) -> i32 {
    value.clamp(-f64::from(limit), f64::from(limit)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: DeviceAddress = DeviceAddress::new(Interface::POSITION, 0);

    fn start(params: SimPositionParams) -> (SimPosition, DevicePort) {
        let mut driver = SimPosition::new(params).unwrap();
        let port = DevicePort::new(ADDR, driver.command_size(Interface::POSITION), None);
        driver.setup(&DevicePorts::new(vec![port.clone()])).unwrap();
        (driver, port)
    }

    fn fast() -> SimPositionParams {
        SimPositionParams {
            rate_hz: 200.0,
            ..Default::default()
        }
    }

    fn latest(port: &DevicePort) -> Option<PositionData> {
        let mut buf = [0u8; 64];
        let sample = port.get_data(&mut buf)?;
        PositionData::decode(&buf[..sample.len]).ok()
    }

    fn wait_for(port: &DevicePort, pred: impl Fn(&PositionData) -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if latest(port).is_some_and(|d| pred(&d)) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_drives_forward_on_command() {
        let (mut driver, port) = start(fast());
        port.put_command(&PositionCommand::velocity(500, 0, 0).encode()).unwrap();
        assert!(wait_for(&port, |d| d.xpos > 20 && d.xspeed == 500));
        assert!(latest(&port).unwrap().ypos.abs() <= 1);

        port.put_command(&driver.stop_command(Interface::POSITION).unwrap()).unwrap();
        assert!(wait_for(&port, |d| d.xspeed == 0));
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_speed_clamped() {
        let (mut driver, port) = start(fast());
        port.put_command(&PositionCommand::velocity(5000, 0, -900).encode()).unwrap();
        assert!(wait_for(&port, |d| d.xspeed == 1000 && d.yawspeed == -180));
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_motor_power_and_reset() {
        let (mut driver, port) = start(fast());
        let off = PositionRequest::MotorPower(false).encode();
        assert_eq!(driver.handle_config(ADDR, &off), ConfigReply::Ack(Vec::new()));
        port.put_command(&PositionCommand::velocity(500, 0, 0).encode()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(wait_for(&port, |d| d.xpos == 0 && d.xspeed == 0));

        driver.handle_config(ADDR, &PositionRequest::MotorPower(true).encode());
        assert!(wait_for(&port, |d| d.xpos > 20));
        driver.handle_config(ADDR, &PositionRequest::MotorPower(false).encode());
        driver.handle_config(ADDR, &PositionRequest::ResetOdometry.encode());
        assert!(wait_for(&port, |d| d.xpos == 0));
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_direct_wheel_mode() {
        let (mut driver, port) = start(fast());
        let direct = PositionRequest::VelocityMode(0).encode();
        assert_eq!(driver.handle_config(ADDR, &direct), ConfigReply::Ack(Vec::new()));
        // equal wheel speeds: straight ahead
        port.put_command(&PositionCommand::velocity(300, 300, 0).encode()).unwrap();
        assert!(wait_for(&port, |d| d.xspeed == 300 && d.yawspeed == 0));
        // opposite wheel speeds: turn on the spot
        port.put_command(&PositionCommand::velocity(-100, 100, 0).encode()).unwrap();
        assert!(wait_for(&port, |d| d.xspeed == 0 && d.yawspeed > 0));
        driver.shutdown().unwrap();
    }

    #[test]
    fn test_config_requests() {
        let mut driver = SimPosition::new(SimPositionParams::default()).unwrap();
        match driver.handle_config(ADDR, &PositionRequest::GetGeometry.encode()) {
            ConfigReply::Ack(bytes) => {
                let geom = PositionGeometry::decode(&bytes).unwrap();
                assert_eq!(geom.size, [445, 400]);
            }
            ConfigReply::Nack => panic!("geometry refused"),
        }
        assert_eq!(
            driver.handle_config(ADDR, &PositionRequest::VelocityMode(7).encode()),
            ConfigReply::Nack
        );
        assert_eq!(driver.handle_config(ADDR, &[42]), ConfigReply::Nack);
    }

    #[test]
    fn test_missing_port_fails_setup() {
        let mut driver = SimPosition::new(SimPositionParams::default()).unwrap();
        let sonar = DevicePort::new(DeviceAddress::new(Interface::SONAR, 0), None, None);
        assert!(driver.setup(&DevicePorts::new(vec![sonar])).is_err());
        assert!(driver.shutdown().is_ok());
        assert!(SimPosition::new(SimPositionParams { rate_hz: 0.0, ..Default::default() }).is_err());
    }
}
