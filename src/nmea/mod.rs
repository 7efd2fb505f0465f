//! # NMEA Module
//!
//! Sentence handling for onboard telemetry.
//!
//! This module handles:
//! - The canonical [`record::Record`] and device id partition
//! - Decoding `$--PAD`, RMC and generic numeric sentences

pub mod protocol;
pub mod record;
pub mod decoder;

pub use decoder::{decode, decode_at, DecodeError};
pub use record::{FieldMap, Record};
