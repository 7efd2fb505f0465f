//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{NmeaRollupError, Result};
use crate::nmea::protocol::RMC_SENTENCE_HEADS;
use crate::nmea::record::SERIAL_DEVICE_IDS;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub transports: Vec<TransportConfig>,
}

/// Which bucket store backend to open
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    File,
}

/// Bucket store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreKind,

    #[serde(default = "default_store_path")]
    pub path: String,
}

/// Ingestion and rollup configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_rollups")]
    pub rollups: bool,

    #[serde(default = "default_tick_interval_s")]
    pub tick_interval_s: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Diagnostic stream configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_diagnostics_capacity")]
    pub capacity: usize,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily log files; empty logs to the console only
    #[serde(default)]
    pub log_dir: String,
}

/// A sentence source, selected by its `type` key
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Serial(SerialTransportConfig),
    /// Placeholder entry that opens nothing
    Empty,
}

/// Line oriented serial device
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SerialTransportConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_serial_device_id")]
    pub device_id: u32,

    /// Sentence heads to forward; empty forwards everything
    #[serde(default = "default_sentences")]
    pub sentences: Vec<String>,
}

// Default value functions
fn default_store_backend() -> StoreKind { StoreKind::File }
fn default_store_path() -> String { "./data".to_string() }

fn default_rollups() -> bool { true }
fn default_tick_interval_s() -> u64 { 60 }
fn default_queue_capacity() -> usize { 1024 }

fn default_diagnostics_capacity() -> usize { 128 }

fn default_serial_port() -> String { "/dev/ttyAMA0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_serial_device_id() -> u32 { SERIAL_DEVICE_IDS.start as u32 }
fn default_sentences() -> Vec<String> {
    RMC_SENTENCE_HEADS.iter().map(|s| s.to_string()).collect()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rollups: default_rollups(),
            tick_interval_s: default_tick_interval_s(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            capacity: default_diagnostics_capacity(),
        }
    }
}

impl Default for SerialTransportConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            device_id: default_serial_device_id(),
            sentences: default_sentences(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nmea_rollup::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.store.backend == StoreKind::File && self.store.path.is_empty() {
            return Err(invalid("store path cannot be empty for the file backend"));
        }

        if self.engine.tick_interval_s == 0 || self.engine.tick_interval_s > 3600 {
            return Err(invalid("tick_interval_s must be between 1 and 3600"));
        }

        if self.engine.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be greater than 0"));
        }

        if self.diagnostics.capacity == 0 {
            return Err(invalid("diagnostics capacity must be greater than 0"));
        }

        for transport in &self.transports {
            if let TransportConfig::Serial(serial) = transport {
                if serial.port.is_empty() {
                    return Err(invalid("serial port cannot be empty"));
                }
                if serial.baud_rate == 0 {
                    return Err(invalid("serial baud_rate must be greater than 0"));
                }
                if !SERIAL_DEVICE_IDS.contains(&u64::from(serial.device_id)) {
                    return Err(invalid(format!(
                        "serial device_id {} outside serial id range {}..{}",
                        serial.device_id, SERIAL_DEVICE_IDS.start, SERIAL_DEVICE_IDS.end
                    )));
                }
            }
        }

        Ok(())
    }
}

fn invalid(message: impl std::fmt::Display) -> NmeaRollupError {
    NmeaRollupError::Config(toml::de::Error::custom(message))
}
