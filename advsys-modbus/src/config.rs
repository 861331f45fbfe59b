//! Configuration for the gateway driver binary.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use advsys_common::LoggingConfig;

use crate::poller::PollerConfig;
use crate::transport::{RegisterType, SerialSettings};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] advsys_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete driver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// The gateway to poll
    pub device: DeviceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gateway model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Basic gateway with pulse counter
    Dm108,
    /// Parameter collector relaying an energy meter
    Dm108c,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Dm108 => "dm108",
            ModelKind::Dm108c => "dm108c",
        }
    }
}

/// Configuration of the polled gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device name (telemetry source)
    pub name: String,

    pub model: ModelKind,

    /// Modbus unit/slave ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Serial line settings
    pub connection: SerialConfig,

    /// Register table to read from
    #[serde(default)]
    pub register_type: RegisterType,

    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay after each read of a scattered poll, in milliseconds
    #[serde(default = "default_pace_delay_ms")]
    pub pace_delay_ms: u64,

    /// Wait after the transport has been reopened, in milliseconds
    #[serde(default = "default_recovery_cooldown_ms")]
    pub recovery_cooldown_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_poll_interval() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_pace_delay_ms() -> u64 {
    1000
}

fn default_recovery_cooldown_ms() -> u64 {
    2000
}

/// RS485 line configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM1")
    pub port: String,
    /// Baud rate (default: 19200)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Data bits (default: 8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

fn default_baud_rate() -> u32 {
    19200
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

impl AppConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: AppConfig = advsys_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let device = &self.device;

        if device.name.is_empty() {
            return Err(ConfigError::Validation(
                "Device name cannot be empty".to_string(),
            ));
        }

        if !(1..=247).contains(&device.unit_id) {
            return Err(ConfigError::Validation(format!(
                "Device '{}': unit_id must be 1-247",
                device.name
            )));
        }

        if device.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(format!(
                "Device '{}': poll_interval_secs must be positive",
                device.name
            )));
        }

        if device.timeout_ms == 0 {
            return Err(ConfigError::Validation(format!(
                "Device '{}': timeout_ms must be positive",
                device.name
            )));
        }

        // Line settings are checked by the same conversion the transport uses.
        device.serial_settings()?;

        Ok(())
    }
}

impl DeviceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            pace_delay: Duration::from_millis(self.pace_delay_ms),
            recovery_cooldown: Duration::from_millis(self.recovery_cooldown_ms),
        }
    }

    /// Serial line settings for the RTU transport.
    pub fn serial_settings(&self) -> Result<SerialSettings, ConfigError> {
        let connection = &self.connection;

        let parity = match connection.parity.to_lowercase().as_str() {
            "none" => tokio_serial::Parity::None,
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': invalid parity '{}' (use none, even, or odd)",
                    self.name, connection.parity
                )));
            }
        };

        let data_bits = match connection.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': invalid data_bits {} (use 5-8)",
                    self.name, other
                )));
            }
        };

        let stop_bits = match connection.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => {
                return Err(ConfigError::Validation(format!(
                    "Device '{}': invalid stop_bits {} (use 1 or 2)",
                    self.name, other
                )));
            }
        };

        Ok(SerialSettings {
            port: connection.port.clone(),
            baud_rate: connection.baud_rate,
            data_bits,
            parity,
            stop_bits,
        })
    }
}
