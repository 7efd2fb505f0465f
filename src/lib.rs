//! # NMEA Rollup Library
//!
//! Ingest NMEA-style sentences from GPS receivers and environmental sensors,
//! store them in per-second buckets and keep minute, hour and day averages.
//!
//! Data flows from a transport through the sentence decoder into the
//! ingestion engine, which writes second buckets to the bucket store. The
//! rollup scheduler reads those buckets back and writes the averages through
//! the same write path.

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod nmea;
pub mod store;
pub mod transport;
