//! # Error Types
//!
//! Custom error types for NMEA Rollup using `thiserror`.

use thiserror::Error;

use crate::nmea::decoder::DecodeError;

/// Main error type for NMEA Rollup
#[derive(Debug, Error)]
pub enum NmeaRollupError {
    /// Sentence could not be decoded
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Bucket store errors (unreachable, rejected operation)
    #[error("store error: {0}")]
    Store(String),

    /// Collection name unusable as a store key
    #[error("invalid collection name: {0:?}")]
    CollectionName(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Journal encoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// No serial device could be opened
    #[error("Serial port not found, tried: {0}")]
    SerialPortNotFound(String),

    /// The receiving end of an internal channel is gone
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Result type alias for NMEA Rollup
pub type Result<T> = std::result::Result<T, NmeaRollupError>;
