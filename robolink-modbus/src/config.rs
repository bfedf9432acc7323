//! Configuration for the controller poller.

use std::time::Duration;

use robolink_common::MAX_SLOT_ID;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::register_map::RegisterMap;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Modbus TCP controller gateway and poll schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Host address (IP or hostname)
    pub host: String,

    /// TCP port (default: 502)
    #[serde(default = "default_modbus_port")]
    pub port: u16,

    /// Number of device slots behind the gateway; slots 1..=slave_count are polled
    pub slave_count: u8,

    /// Poll period in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wait after a failed connection, in seconds
    #[serde(default = "default_backoff")]
    pub backoff_secs: u64,

    /// Connect and per-read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Multiplier applied to the raw OEE word
    #[serde(default = "default_oee_scale")]
    pub oee_scale: f64,

    /// Register block layout
    #[serde(default)]
    pub register_map: RegisterMap,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_poll_interval() -> u64 {
    5
}

fn default_backoff() -> u64 {
    10
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_oee_scale() -> f64 {
    1.0
}

impl ControllerConfig {
    /// Parse the controller section on its own.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "controller.host must not be empty".to_string(),
            ));
        }

        if self.slave_count == 0 || self.slave_count > MAX_SLOT_ID {
            return Err(ConfigError::Validation(format!(
                "controller.slave_count must be 1-{}, got {}",
                MAX_SLOT_ID, self.slave_count
            )));
        }

        for (name, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("backoff_secs", self.backoff_secs),
            ("timeout_ms", self.timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!(
                    "controller.{} must be greater than 0",
                    name
                )));
            }
        }

        if !self.oee_scale.is_finite() || self.oee_scale <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "controller.oee_scale must be a positive number, got {}",
                self.oee_scale
            )));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
