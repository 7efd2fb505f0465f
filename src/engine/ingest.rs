//! Ingestion write path.
//!
//! Every record goes to the collection named by its type, into the bucket
//! keyed by its timestamp. A device contributes at most once per bucket;
//! later deliveries for the same (second, device) are absorbed silently.

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error};

use super::Engine;
use crate::error::{NmeaRollupError, Result};
use crate::nmea::Record;
use crate::store::{validate_collection_name, PushOutcome};

impl Engine {
    /// Write one record into its second bucket
    ///
    /// # Returns
    ///
    /// * `Result<PushOutcome>` - `Duplicate` if the device already contributed
    ///
    /// # Errors
    ///
    /// Returns error (after a `Low` diagnostic) if the record type is not a
    /// usable collection name or the store write fails. Nothing is retried.
    pub async fn ingest(&self, record: &Record) -> Result<PushOutcome> {
        if record.is_malformed() {
            self.diagnostics.low(format!(
                "dropping malformed record from device {}",
                record.device_id()
            ));
            return Err(NmeaRollupError::CollectionName(record.kind.clone()));
        }

        if let Err(e) = validate_collection_name(&record.kind) {
            self.diagnostics.low(format!(
                "dropping record from device {}: {}",
                record.device_id(),
                e
            ));
            return Err(e);
        }

        self.write(record, &record.kind).await.map_err(|e| {
            self.diagnostics.low(format!(
                "failed to write {} record at {} from device {}: {}",
                record.kind,
                record.timestamp,
                record.device_id(),
                e
            ));
            e
        })
    }

    /// Shared write path for raw and rollup records
    pub(crate) async fn write(&self, record: &Record, collection: &str) -> Result<PushOutcome> {
        let outcome = self
            .store
            .push_entry(collection, record.timestamp, record.device_id(), &record.fields)
            .await?;
        if outcome == PushOutcome::Duplicate {
            debug!(
                "Dismissed duplicate {} entry at {} from device {}",
                collection,
                record.timestamp,
                record.device_id()
            );
        }
        Ok(outcome)
    }

    /// Consume records, one concurrent write per record
    ///
    /// Returns once the stream is closed and every write has finished.
    pub(crate) async fn ingest_loop(self, mut records: mpsc::Receiver<Record>) {
        self.diagnostics.debug("data routine started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                record = records.recv() => match record {
                    Some(record) => {
                        let engine = self.clone();
                        in_flight.spawn(async move {
                            // Failures are already reported as diagnostics
                            let _ = engine.ingest(&record).await;
                        });
                    }
                    None => break,
                },
                Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = finished {
                        error!("ingest write task failed: {}", e);
                    }
                }
            }
        }

        while let Some(finished) = in_flight.join_next().await {
            if let Err(e) = finished {
                error!("ingest write task failed: {}", e);
            }
        }
        self.diagnostics.debug("record stream closed, data routine finished");
    }
}
