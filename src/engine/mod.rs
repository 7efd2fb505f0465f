//! # Engine Module
//!
//! Ingestion and rollup engine.
//!
//! This module handles:
//! - Consuming the record stream and writing each record into its
//!   second bucket, first write per (second, device) wins
//! - Maintaining minute/hour/day averages over the second buckets
//! - The periodic rollup dispatch and the full recompute
//!
//! [`Engine`] is a cheap-to-clone handle holding the store, the diagnostic
//! stream and the settings; every task works on its own clone.

pub mod ingest;
pub mod rollup;
pub mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::nmea::Record;
use crate::store::BucketStore;

use scheduler::DispatchLocks;

pub use rollup::{average, is_rollup_collection, Interval};

/// Source tag of engine diagnostics
pub const ENGINE_SOURCE: &str = "engine";

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Period of the rollup dispatch ticker
    pub tick_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.tick_interval_s),
        }
    }
}

/// Ingestion and rollup engine handle
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn BucketStore>,
    diagnostics: Diagnostics,
    settings: EngineSettings,
    locks: DispatchLocks,
}

impl Engine {
    pub fn new(
        store: Arc<dyn BucketStore>,
        diagnostics: Diagnostics,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            diagnostics: diagnostics.with_source(ENGINE_SOURCE),
            settings,
            locks: DispatchLocks::default(),
        }
    }

    /// Check the store, reporting `High` if it is unreachable
    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await.map_err(|e| {
            self.diagnostics.high(format!("store unreachable: {}", e));
            e
        })
    }

    /// Start consuming `records`, and the rollup ticker if requested
    ///
    /// The ingest task ends once every sender of `records` is dropped and all
    /// in-flight writes have finished. The rollup ticker runs until
    /// [`RunHandle::stop_rollups`] or process exit.
    ///
    /// # Errors
    ///
    /// Returns error (after a `High` diagnostic) if the store is unreachable.
    pub async fn run(
        &self,
        records: mpsc::Receiver<Record>,
        enable_rollups: bool,
    ) -> Result<RunHandle> {
        self.ping().await?;

        let ingest = tokio::spawn(self.clone().ingest_loop(records));
        let rollups = enable_rollups.then(|| tokio::spawn(self.clone().rollup_loop()));

        self.diagnostics.debug(format!(
            "engine running (rollups {})",
            if enable_rollups { "enabled" } else { "disabled" }
        ));
        Ok(RunHandle { ingest, rollups })
    }
}

/// Tasks started by [`Engine::run`]
#[derive(Debug)]
pub struct RunHandle {
    ingest: JoinHandle<()>,
    rollups: Option<JoinHandle<()>>,
}

impl RunHandle {
    /// Wait until the record stream is closed and drained
    pub async fn join_ingest(&mut self) {
        if let Err(e) = (&mut self.ingest).await {
            tracing::error!("ingest task failed: {}", e);
        }
    }

    pub fn rollups_enabled(&self) -> bool {
        self.rollups.is_some()
    }

    /// Stop the rollup ticker; a dispatch already in progress completes
    pub fn stop_rollups(&mut self) {
        if let Some(rollups) = self.rollups.take() {
            rollups.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::diagnostics::Diagnostic;
    use crate::store::MemoryStore;

    pub(crate) fn memory_engine() -> (Engine, MemoryStore, mpsc::Receiver<Diagnostic>) {
        let store = MemoryStore::new();
        let (diagnostics, rx) = Diagnostics::channel(1024);
        let engine = Engine::new(Arc::new(store.clone()), diagnostics, EngineSettings::default());
        (engine, store, rx)
    }

    pub(crate) fn drain(rx: &mut mpsc::Receiver<Diagnostic>) -> Vec<Diagnostic> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}
