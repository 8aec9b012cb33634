//! Device drivers
//!
//! Only simulated devices ship with the server. Other drivers implement
//! [`Driver`] the same way and are registered with
//! [`ServerBuilder::driver`](crate::server::ServerBuilder::driver).

pub mod sim;

use crate::config::DriverConfig;
use crate::core::driver::Driver;
use crate::error::{Error, Result};
use sim::{SimGripper, SimLaser, SimPosition, SimPower, SimSonar, SimSpeech};

/// Create a driver from its configuration section
pub fn create_driver(config: &DriverConfig) -> Result<Box<dyn Driver>> {
    log::info!("Creating driver {} for {:?}", config.name, config.provides);
    let driver: Box<dyn Driver> = match config.name.as_str() {
        "sim_position" => Box::new(SimPosition::new(config.params()?)?),
        "sim_sonar" => Box::new(SimSonar::new(config.params()?)?),
        "sim_laser" => Box::new(SimLaser::new(config.params()?)?),
        "sim_power" => Box::new(SimPower::new(config.params()?)?),
        "sim_gripper" => Box::new(SimGripper::new(config.params()?)),
        "sim_speech" => Box::new(SimSpeech::new(config.params()?)),
        other => return Err(Error::UnknownDriver(other.to_string())),
    };
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::types::{DeviceAddress, Interface};

    #[test]
    fn test_every_default_driver_builds() {
        for driver_config in Config::simulation_defaults().drivers {
            let driver = create_driver(&driver_config).unwrap();
            assert_eq!(driver.name(), driver_config.name);
        }
    }

    #[test]
    fn test_params_applied_and_checked() {
        let addr = DeviceAddress::new(Interface::SONAR, 0);
        let mut config = DriverConfig::new("sim_sonar", &[addr]);
        config.params.insert("count".into(), toml::Value::Integer(4));
        let driver = create_driver(&config).unwrap();
        assert!(driver.describe().contains("x4"));

        config.params.insert("count".into(), toml::Value::Integer(64));
        assert!(matches!(create_driver(&config), Err(Error::InvalidParameter(_))));

        config.params.clear();
        config.params.insert("colour".into(), toml::Value::from("red"));
        assert!(matches!(create_driver(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_driver() {
        let config = DriverConfig::new("flux_capacitor", &[]);
        assert!(matches!(create_driver(&config), Err(Error::UnknownDriver(_))));
    }
}
