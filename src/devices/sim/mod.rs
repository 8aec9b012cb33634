//! Simulated devices
//!
//! | Driver         | Interface | Producer            |
//! |----------------|-----------|---------------------|
//! | `sim_position` | position  | own thread          |
//! | `sim_sonar`    | sonar     | own thread          |
//! | `sim_laser`    | laser     | own thread          |
//! | `sim_power`    | power     | manager `update()`  |
//! | `sim_gripper`  | gripper   | manager `update()`  |
//! | `sim_speech`   | speech    | manager `update()`  |
//!
//! Parameters come from the `params` table of the driver's configuration
//! section; anything left out takes the defaults of the `Sim*Params` types.

mod kinematics;
mod noise;

pub mod gripper;
pub mod laser;
pub mod position;
pub mod power;
pub mod sonar;
pub mod speech;

pub use gripper::{SimGripper, SimGripperParams};
pub use laser::{SimLaser, SimLaserParams};
pub use position::{SimPosition, SimPositionParams};
pub use power::{SimPower, SimPowerParams};
pub use sonar::{SimSonar, SimSonarParams};
pub use speech::{SimSpeech, SimSpeechParams};

use crate::error::{Error, Result};
use std::time::Duration;

/// Tick period for a publish rate in Hz
fn tick_period(driver: &str, rate_hz: f64) -> Result<Duration> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "{} rate_hz must be positive, got {}",
            driver, rate_hz
        )));
    }
    Ok(Duration::from_secs_f64(1.0 / rate_hz))
}
