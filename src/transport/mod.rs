//! # Transport Module
//!
//! Boundary between sentence sources and the engine.
//!
//! This module handles:
//! - Reading sentences from serial GPS receivers (8N1, configured baud)
//! - Filtering on the configured sentence heads
//! - Decoding and forwarding records to the engine's record stream
//!
//! Decode failures are reported `Low` and the sentence is dropped. Only a
//! closed record stream stops a transport with an error.

pub mod line_source;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::{SerialTransportConfig, TransportConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{NmeaRollupError, Result};
use crate::nmea::decoder::decode;
use crate::nmea::protocol::NMEA_FIELD_SEPARATOR;
use crate::nmea::Record;

pub use line_source::{open_serial, LineReader, LineSource, SerialLineSource};

/// Source tag of serial transport diagnostics
pub const SERIAL_SOURCE: &str = "serial";

/// Decode one sentence and hand the record to the engine
///
/// # Arguments
///
/// * `sentence` - Raw sentence text
/// * `device_id` - Id of the device it came from
/// * `records` - Engine record stream
/// * `diagnostics` - Where decode failures are reported
///
/// # Returns
///
/// * `Result<bool>` - false if the sentence was dropped as undecodable
///
/// # Errors
///
/// Returns `ChannelClosed` if the record stream has no receiver.
pub async fn forward_sentence(
    sentence: &str,
    device_id: u32,
    records: &mpsc::Sender<Record>,
    diagnostics: &Diagnostics,
) -> Result<bool> {
    match decode(sentence, device_id) {
        Ok(record) => {
            records
                .send(record)
                .await
                .map_err(|_| NmeaRollupError::ChannelClosed("record stream".to_string()))?;
            Ok(true)
        }
        Err(e) => {
            diagnostics.low(format!(
                "dropping sentence from device {}: {}",
                device_id, e
            ));
            Ok(false)
        }
    }
}

/// Whether `line` starts with one of the `accepted` heads (empty accepts all)
pub fn accepts_sentence(accepted: &[String], line: &str) -> bool {
    if accepted.is_empty() {
        return true;
    }
    let head = line.split(NMEA_FIELD_SEPARATOR).next().unwrap_or_default();
    accepted.iter().any(|a| a == head)
}

/// Forward every accepted line of `source` until it ends
///
/// # Errors
///
/// Returns error (after a `Low` diagnostic) if reading fails, or
/// `ChannelClosed` if the record stream has no receiver.
pub async fn run_line_transport<S: LineSource>(
    mut source: S,
    device_id: u32,
    accepted: &[String],
    records: mpsc::Sender<Record>,
    diagnostics: Diagnostics,
) -> Result<()> {
    loop {
        match source.next_line().await {
            Ok(Some(line)) => {
                if line.is_empty() || !accepts_sentence(accepted, &line) {
                    continue;
                }
                forward_sentence(&line, device_id, &records, &diagnostics).await?;
            }
            Ok(None) => {
                info!("Sentence source for device {} ended", device_id);
                return Ok(());
            }
            Err(e) => {
                diagnostics.low(format!("read for device {} failed: {}", device_id, e));
                return Err(e.into());
            }
        }
    }
}

async fn run_serial(
    config: SerialTransportConfig,
    records: mpsc::Sender<Record>,
    diagnostics: Diagnostics,
) {
    let source = match open_serial(&config) {
        Ok(source) => source,
        Err(e) => {
            diagnostics.high(e.to_string());
            return;
        }
    };
    diagnostics.debug(format!(
        "connected to {} at {} baud",
        config.port, config.baud_rate
    ));

    let result =
        run_line_transport(source, config.device_id, &config.sentences, records, diagnostics).await;
    if let Err(e) = result {
        debug!("Serial transport on {} stopped: {}", config.port, e);
    }
}

/// Start one task per configured transport
///
/// Each task holds a clone of `records`; the engine's ingest loop finishes
/// once every transport has stopped and the caller dropped its sender.
pub fn spawn_transports(
    configs: &[TransportConfig],
    records: &mpsc::Sender<Record>,
    diagnostics: &Diagnostics,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for config in configs {
        match config {
            TransportConfig::Serial(serial) => {
                handles.push(tokio::spawn(run_serial(
                    serial.clone(),
                    records.clone(),
                    diagnostics.with_source(SERIAL_SOURCE),
                )));
            }
            TransportConfig::Empty => debug!("Skipping empty transport entry"),
        }
    }
    handles
}
