//! # Diagnostics Module
//!
//! Leveled diagnostic events emitted by the engine and transports.
//!
//! Emitters hold a cloneable [`Diagnostics`] handle backed by a bounded
//! channel. Sending never waits: when the buffer is full the event is
//! logged through `tracing` directly and dropped from the channel.
//! [`spawn_forwarder`] drains the channel into `tracing`.

use std::fmt;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Diagnostic severity, ascending
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Trace level, e.g. successful connects
    Debug,
    Info,
    Warning,
    /// Recoverable per-operation failure (one decode, one write)
    Low,
    /// Subsystem failure (store unreachable)
    High,
    /// Unrecoverable startup failure
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARN",
            Severity::Low => "LOW",
            Severity::High => "HIGH",
            Severity::Fatal => "FATAL",
        };
        f.write_str(label)
    }
}

/// One diagnostic event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Optional source tag, rendered as a `[tag]` prefix
    pub source: Option<&'static str>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            Some(source) => write!(f, "[{}] {}", source, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Non-blocking handle to the diagnostic stream
#[derive(Debug, Clone)]
pub struct Diagnostics {
    tx: mpsc::Sender<Diagnostic>,
    source: Option<&'static str>,
}

impl Diagnostics {
    /// Create a handle and the receiving end of its stream
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events buffered before new ones bypass the channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Diagnostic>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, source: None }, rx)
    }

    /// Same stream, events tagged with `source`
    pub fn with_source(&self, source: &'static str) -> Self {
        Self {
            tx: self.tx.clone(),
            source: Some(source),
        }
    }

    /// Emit an event without waiting
    pub fn emit(&self, severity: Severity, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            severity,
            message: message.into(),
            source: self.source,
        };
        if let Err(err) = self.tx.try_send(diagnostic) {
            let diagnostic = match err {
                mpsc::error::TrySendError::Full(d) => d,
                mpsc::error::TrySendError::Closed(d) => d,
            };
            warn!("diagnostic stream unavailable, logging directly");
            log_diagnostic(&diagnostic);
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(Severity::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(Severity::Info, message);
    }

    pub fn low(&self, message: impl Into<String>) {
        self.emit(Severity::Low, message);
    }

    pub fn high(&self, message: impl Into<String>) {
        self.emit(Severity::High, message);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.emit(Severity::Fatal, message);
    }
}

/// Write one diagnostic to `tracing` at the matching level
pub fn log_diagnostic(diagnostic: &Diagnostic) {
    let severity = diagnostic.severity;
    match severity {
        Severity::Debug => debug!(%severity, "{}", diagnostic),
        Severity::Info => info!(%severity, "{}", diagnostic),
        Severity::Warning | Severity::Low => warn!(%severity, "{}", diagnostic),
        Severity::High | Severity::Fatal => error!(%severity, "{}", diagnostic),
    }
}

/// Drain the diagnostic stream into `tracing` until every handle is dropped
pub fn spawn_forwarder(mut rx: mpsc::Receiver<Diagnostic>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(diagnostic) = rx.recv().await {
            log_diagnostic(&diagnostic);
        }
        debug!("diagnostic stream closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Low);
        assert!(Severity::Low < Severity::High);
        assert!(Severity::High < Severity::Fatal);
    }

    #[test]
    fn test_severity_labels() {
        assert_eq!(Severity::Low.to_string(), "LOW");
        assert_eq!(Severity::Warning.to_string(), "WARN");
    }

    #[test]
    fn test_diagnostic_display_with_source() {
        let d = Diagnostic {
            severity: Severity::Low,
            message: "write failed".to_string(),
            source: Some("store"),
        };
        assert_eq!(d.to_string(), "[store] write failed");
    }

    #[tokio::test]
    async fn test_emit_delivers_tagged_event() {
        let (diagnostics, mut rx) = Diagnostics::channel(4);
        diagnostics.with_source("engine").high("store unreachable");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.message, "store unreachable");
        assert_eq!(event.source, Some("engine"));
    }

    #[tokio::test]
    async fn test_emit_never_blocks_when_full() {
        let (diagnostics, mut rx) = Diagnostics::channel(1);
        diagnostics.info("first");
        // Buffer is full; these must return immediately
        diagnostics.info("second");
        diagnostics.low("third");

        assert_eq!(rx.recv().await.unwrap().message, "first");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped() {
        let (diagnostics, rx) = Diagnostics::channel(1);
        drop(rx);
        diagnostics.fatal("nobody is listening");
    }

    #[tokio::test]
    async fn test_forwarder_stops_when_handles_dropped() {
        let (diagnostics, rx) = Diagnostics::channel(8);
        let forwarder = spawn_forwarder(rx);
        diagnostics.debug("hello");
        drop(diagnostics);
        tokio_test::assert_ok!(forwarder.await);
    }
}
