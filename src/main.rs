//! # NMEA Rollup
//!
//! Collect NMEA sentences from serial GPS receivers, store them per second
//! and keep minute, hour and day averages.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use nmea_rollup::config::{Config, LoggingConfig};
use nmea_rollup::diagnostics::{spawn_forwarder, Diagnostics};
use nmea_rollup::engine::{Engine, EngineSettings};
use nmea_rollup::store::StoreBackend;
use nmea_rollup::transport::spawn_transports;

/// Configuration file used when none is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// File name prefix of the daily log files
const LOG_FILE_PREFIX: &str = "nmea-rollup.log";

/// How long shutdown waits for queued diagnostics to be logged
const DIAGNOSTICS_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Set up console logging, plus a daily log file if `log_dir` is set
///
/// The returned guard flushes the file writer when dropped and must live
/// until the process exits.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer());

    if config.log_dir.is_empty() {
        registry.init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

/// Main entry point for NMEA Rollup
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument or `config/default.toml`)
///    - Set up logging and the diagnostic forwarder
///    - Open the bucket store
///
/// 2. **Run**
///    - Start the engine (ingestion, and rollups if enabled)
///    - Start one task per configured transport
///    - Wait for Ctrl+C
///
/// 3. **Graceful Shutdown**
///    - Stop transports and let in-flight writes finish
///    - Stop the rollup ticker
///    - Flush queued diagnostics
///
/// # Errors
///
/// Returns error if the configuration cannot be loaded, the store cannot be
/// opened, or the store is unreachable at startup.
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);
    info!("NMEA Rollup v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let (diagnostics, diagnostic_rx) = Diagnostics::channel(config.diagnostics.capacity);
    let forwarder = spawn_forwarder(diagnostic_rx);

    let store = match StoreBackend::open(&config.store).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            diagnostics.fatal(format!("could not open store at {}: {}", config.store.path, e));
            drop(diagnostics);
            let _ = timeout(DIAGNOSTICS_FLUSH_TIMEOUT, forwarder).await;
            return Err(e).context("Failed to open bucket store");
        }
    };

    let engine = Engine::new(store, diagnostics.clone(), EngineSettings::from(&config.engine));
    let (records_tx, records_rx) = mpsc::channel(config.engine.queue_capacity);
    let mut run = engine
        .run(records_rx, config.engine.rollups)
        .await
        .context("Engine failed to start")?;

    let transports = spawn_transports(&config.transports, &records_tx, &diagnostics);
    info!("{} transport(s) started", transports.len());
    info!("Press Ctrl+C to exit");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C, shutting down...");

    for transport in &transports {
        transport.abort();
    }
    drop(records_tx);
    run.join_ingest().await;
    run.stop_rollups();

    drop(engine);
    drop(diagnostics);
    if timeout(DIAGNOSTICS_FLUSH_TIMEOUT, forwarder).await.is_err() {
        warn!("Rollup pass still running at exit, remaining diagnostics dropped");
    }

    info!("Shutdown complete");
    Ok(())
}
