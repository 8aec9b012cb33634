//! Configuration for SabhaIO
//!
//! Loaded from a TOML file. Every section is optional and falls back to the
//! defaults below.
//!
//! ```toml
//! [server]
//! listen = ["0.0.0.0:6665"]
//! poll_interval_ms = 10
//!
//! [session]
//! data_mode = "push_new"
//! frequency_hz = 10
//! outbox_capacity = 262144
//! overflow = "drop_oldest"
//!
//! [logging]
//! level = "info"
//!
//! [[driver]]
//! name = "sim_position"
//! provides = ["position:0"]
//! access = "all"
//! params = { rate_hz = 20.0 }
//! ```

use crate::core::types::{AccessMode, DataMode, DeviceAddress};
use crate::error::{Error, Result};
use crate::protocol::frame::{MAX_FRAME_LEN, MAX_PAYLOAD_LEN};
use crate::protocol::requests::AUTH_KEY_LEN;
use crate::server::outbox::OverflowPolicy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 6665;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Drivers to instantiate at startup
    #[serde(default, rename = "driver")]
    pub drivers: Vec<DriverConfig>,
}

/// Listening sockets and manager loop
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Addresses to accept clients on
    ///
    /// Examples:
    /// - `0.0.0.0:6665` - all interfaces
    /// - `127.0.0.1:6665` - localhost only
    pub listen: Vec<String>,

    /// When set, clients must authenticate with this key before anything else
    pub auth_key: Option<String>,

    /// Longest the manager sleeps between cycles while a subscribed driver
    /// needs polling
    pub poll_interval_ms: u64,

    /// Pending configuration requests kept per device
    pub request_queue_len: usize,

    /// Largest payload accepted from clients
    pub max_payload: usize,

    /// Bytes read from one client per cycle
    pub read_budget: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: vec![format!("0.0.0.0:{}", DEFAULT_PORT)],
            auth_key: None,
            poll_interval_ms: 10,
            request_queue_len: 8,
            max_payload: MAX_PAYLOAD_LEN,
            read_budget: 64 * 1024,
        }
    }
}

/// Per-session defaults and queue limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Data mode of a new session
    pub data_mode: DataMode,
    /// Push rate of a new session
    pub frequency_hz: u16,
    /// Bytes of outgoing frames kept per session
    pub outbox_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            data_mode: DataMode::PushNew,
            frequency_hz: 10,
            outbox_capacity: 256 * 1024,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One driver instance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    /// Driver kind, e.g. `sim_laser`
    pub name: String,
    /// Device addresses the driver serves
    pub provides: Vec<DeviceAddress>,
    /// Initial access mode of the provided devices
    #[serde(default = "default_access")]
    pub access: AccessMode,
    /// Driver specific parameters
    #[serde(default)]
    pub params: toml::Table,
}

fn default_access() -> AccessMode {
    AccessMode::All
}

impl DriverConfig {
    pub fn new(name: &str, provides: &[DeviceAddress]) -> Self {
        Self {
            name: name.to_string(),
            provides: provides.to_vec(),
            access: AccessMode::All,
            params: toml::Table::new(),
        }
    }

    /// Deserialize `params` into the driver's parameter struct
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        toml::Value::Table(self.params.clone())
            .try_into()
            .map_err(|e| Error::Config(format!("driver {}: {}", self.name, e)))
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use sabha_io::config::Config;
    ///
    /// let config = Config::from_file("sabha.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.listen.is_empty() {
            return Err(Error::Config("server.listen must name at least one address".into()));
        }
        if self.server.max_payload == 0 || self.server.max_payload > MAX_PAYLOAD_LEN {
            return Err(Error::Config(format!(
                "server.max_payload must be between 1 and {}",
                MAX_PAYLOAD_LEN
            )));
        }
        if self.server.poll_interval_ms == 0 {
            return Err(Error::Config("server.poll_interval_ms must be positive".into()));
        }
        if let Some(key) = &self.server.auth_key
            && (key.is_empty() || key.len() > AUTH_KEY_LEN)
        {
            return Err(Error::Config(format!(
                "server.auth_key must be 1 to {} bytes",
                AUTH_KEY_LEN
            )));
        }
        if self.session.frequency_hz == 0 {
            return Err(Error::Config("session.frequency_hz must be positive".into()));
        }
        if self.session.outbox_capacity < MAX_FRAME_LEN {
            return Err(Error::Config(format!(
                "session.outbox_capacity must hold at least one {} byte frame",
                MAX_FRAME_LEN
            )));
        }
        for driver in &self.drivers {
            if driver.provides.is_empty() {
                return Err(Error::Config(format!(
                    "driver {} provides no devices",
                    driver.name
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.server.poll_interval_ms)
    }

    /// Default configuration with one of each simulated device
    pub fn simulation_defaults() -> Self {
        use crate::core::types::Interface;
        let dev = |iface, index| DeviceAddress::new(iface, index);
        let mut speech = DriverConfig::new("sim_speech", &[dev(Interface::SPEECH, 0)]);
        speech.access = AccessMode::Write;
        Self {
            drivers: vec![
                DriverConfig::new("sim_position", &[dev(Interface::POSITION, 0)]),
                DriverConfig::new("sim_sonar", &[dev(Interface::SONAR, 0)]),
                DriverConfig::new("sim_laser", &[dev(Interface::LASER, 0)]),
                DriverConfig::new("sim_power", &[dev(Interface::POWER, 0)]),
                DriverConfig::new("sim_gripper", &[dev(Interface::GRIPPER, 0)]),
                speech,
            ],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Interface;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen, vec!["0.0.0.0:6665".to_string()]);
        assert_eq!(config.session.data_mode, DataMode::PushNew);
        assert_eq!(config.session.frequency_hz, 10);
        assert_eq!(config.session.overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[server]
listen = ["127.0.0.1:7000"]
auth_key = "letmein"

[session]
data_mode = "pull_all"
overflow = "backpressure"

[[driver]]
name = "sim_laser"
provides = ["laser:0"]
access = "r"
params = { rate_hz = 2.5, noise_mm = 0 }

[[driver]]
name = "sim_position"
provides = ["position:1"]
"#;

        let config = Config::parse(toml_content).unwrap();
        assert_eq!(config.server.listen, vec!["127.0.0.1:7000".to_string()]);
        assert_eq!(config.server.auth_key.as_deref(), Some("letmein"));
        assert_eq!(config.server.poll_interval_ms, 10);
        assert_eq!(config.session.data_mode, DataMode::PullAll);
        assert_eq!(config.session.frequency_hz, 10);
        assert_eq!(config.session.overflow, OverflowPolicy::Backpressure);

        assert_eq!(config.drivers.len(), 2);
        let laser = &config.drivers[0];
        assert_eq!(laser.provides, vec![DeviceAddress::new(Interface::LASER, 0)]);
        assert_eq!(laser.access, AccessMode::Read);
        assert_eq!(laser.params.get("rate_hz").and_then(|v| v.as_float()), Some(2.5));
        assert_eq!(config.drivers[1].access, AccessMode::All);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::parse("[session]\nfrequency_hz = 0\n").is_err());
        assert!(Config::parse("[server]\nlisten = []\n").is_err());
        assert!(Config::parse("[session]\noutbox_capacity = 100\n").is_err());
        assert!(Config::parse("[[driver]]\nname = \"sim_power\"\nprovides = []\n").is_err());
        assert!(Config::parse("[[driver]]\nname = \"x\"\nprovides = [\"warp:0\"]\n").is_err());
    }

    #[test]
    fn test_driver_params() {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Params {
            rate_hz: f32,
            count: usize,
        }

        let mut driver = DriverConfig::new("sim_sonar", &[DeviceAddress::new(Interface::SONAR, 0)]);
        driver.params.insert("count".into(), toml::Value::Integer(8));
        let params: Params = driver.params().unwrap();
        assert_eq!(params.count, 8);
        assert_eq!(params.rate_hz, 0.0);

        driver.params.insert("count".into(), toml::Value::String("many".into()));
        assert!(driver.params::<Params>().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let config = Config::simulation_defaults();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sabha.toml");
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.drivers.len(), config.drivers.len());
        assert_eq!(loaded.drivers[5].access, AccessMode::Write);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        writeln!(broken, "[server").unwrap();
        assert!(matches!(
            Config::from_file(broken.path()),
            Err(Error::ConfigParse(_))
        ));
    }
}
