//! Audit and alert infrastructure
//!
//! - [`JsonlAuditSink`]: append-only JSON-lines journal on disk - the audit
//!   trail the engine writes and never reads.
//! - [`MemoryAuditSink`]: in-memory journal for tests.
//! - [`LogAlertSink`]: alerts to the log, for runs without a notifier.
//! - [`QueuedAlertSink`]: bounded fire-and-forget queue feeding an external
//!   notifier; a full queue drops the alert with a log line rather than ever
//!   blocking the trading path.

use async_trait::async_trait;
use kestrel_ports::{Alert, AlertLevel, AlertSink, AuditError, AuditEvent, AuditResult, AuditSink};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Append-only JSON-lines audit journal
pub struct JsonlAuditSink {
    file: Mutex<File>,
}

impl JsonlAuditSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, event: AuditEvent) -> AuditResult {
        let line =
            serde_json::to_string(&event).map_err(|e| AuditError::Write(e.to_string()))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| AuditError::Write("journal lock poisoned".to_string()))?;
        writeln!(file, "{}", line).map_err(|e| AuditError::Write(e.to_string()))?;
        Ok(())
    }
}

/// In-memory audit journal for tests
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) -> AuditResult {
        self.events
            .lock()
            .map_err(|_| AuditError::Write("journal lock poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

/// Alerts straight to the log
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn notify(&self, alert: Alert) {
        let symbol = alert.symbol.as_deref().unwrap_or("-");
        match alert.level {
            AlertLevel::Info => log::info!("[ALERT] {:?} {} {}", alert.kind, symbol, alert.message),
            AlertLevel::Warning => {
                log::warn!("[ALERT] {:?} {} {}", alert.kind, symbol, alert.message)
            }
            AlertLevel::Critical => {
                log::error!("[ALERT] {:?} {} {}", alert.kind, symbol, alert.message)
            }
        }
    }
}

/// Bounded queue in front of an external notifier (Telegram, pager, ...).
/// Delivery is somebody else's job; this sink only ever enqueues or drops.
pub struct QueuedAlertSink {
    tx: mpsc::Sender<Alert>,
}

impl QueuedAlertSink {
    /// Returns the sink and the receiving end for the notifier task
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl AlertSink for QueuedAlertSink {
    fn notify(&self, alert: Alert) {
        if let Err(err) = self.tx.try_send(alert) {
            // Dropping an alert is acceptable; blocking the trading path is not
            log::warn!("[ALERT] queue full or closed, alert dropped: {}", err);
        }
    }
}
