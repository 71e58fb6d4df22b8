//! Runtime configuration
//!
//! Built once at startup and handed down by reference. Layers, lowest
//! priority first:
//! 1. compiled defaults (the reference test-board deployment)
//! 2. a TOML file, `pload.toml` unless told otherwise
//! 3. `PLOAD_` environment variables, `__` separating nested keys,
//!    e.g. `PLOAD_CALIBRATION__VOLTAGE_REFERENCE=230`

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "pload.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PloadConfig {
    /// Prefix of the chip debug commands, `_pload` is appended to it
    pub command_prefix: String,
    /// Time given to the device to compute and print its response
    pub settle_delay_ms: u64,
    /// trace, debug, info, warn or error
    pub log_level: String,
    pub calibration: CalibrationReference,
    pub gateway: GatewayConfig,
    pub channel: ChannelConfig,
    pub output: OutputConfig,
}

/// Physical values applied to the board when the chip was calibrated.
/// The chip reports 0.6 of full scale at exactly these values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationReference {
    pub voltage_reference: f64,
    pub current_reference: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Helper that opens the Ember box ISA channels
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// Name stale helper instances are looked up by
    pub process_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub host: String,
    pub port: u16,
    /// How long to keep retrying the connection while the helper comes up
    pub connect_timeout_ms: u64,
    /// How long to wait for the first bytes of a response
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Results file holding the `voltage,current,power` record
    pub data_file: PathBuf,
    /// Trace log
    pub log_file: PathBuf,
}

impl Default for PloadConfig {
    fn default() -> Self {
        Self {
            command_prefix: "cu cs5480".to_string(),
            settle_delay_ms: 500,
            log_level: "info".to_string(),
            calibration: CalibrationReference::default(),
            gateway: GatewayConfig::default(),
            channel: ChannelConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for CalibrationReference {
    fn default() -> Self {
        Self {
            voltage_reference: 240.0,
            current_reference: 15.0,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("em3xx_load"),
            args: vec!["--isachan=all".to_string()],
            process_name: "em3xx_load".to_string(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4900,
            connect_timeout_ms: 5000,
            read_timeout_ms: 2000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("power_data.txt"),
            log_file: PathBuf::from("output.txt"),
        }
    }
}

impl PloadConfig {
    /// Load from `pload.toml` (if present) and the environment
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific TOML file (if present) and the environment
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that extract fine but can't give a meaningful reading
    pub fn validate(&self) -> Result<(), figment::Error> {
        let references = [
            ("calibration.voltage_reference", self.calibration.voltage_reference),
            ("calibration.current_reference", self.calibration.current_reference),
        ];
        for (key, value) in references {
            if !(value.is_finite() && value > 0.0) {
                return Err(format!("{} must be a positive number, got {}", key, value).into());
            }
        }
        if self.channel.read_timeout_ms == 0 {
            return Err("channel.read_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(PloadConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PLOAD_").split("__"))
    }

    /// The single command sent for every reading
    pub fn command(&self) -> String {
        crate::session::pload_command(&self.command_prefix)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl ChannelConfig {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
