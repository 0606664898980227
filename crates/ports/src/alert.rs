//! Alerting port
//!
//! Fire-and-forget operational notifications: rejections, halts, retry
//! exhaustion, position closes. Delivery failure must never block or fail
//! the trading path, so the sink interface is synchronous and infallible -
//! implementations queue or drop, they do not wait.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        }
    }
}

/// What kind of event the alert describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    DecisionRejected,
    OrderRejected,
    RetryExhausted,
    ReconciliationConflict,
    Halt,
    PositionClosed,
    SystemError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub kind: AlertKind,
    pub symbol: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            level,
            kind,
            symbol: None,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn info(kind: AlertKind, message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Info, kind, message)
    }

    pub fn warning(kind: AlertKind, message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Warning, kind, message)
    }

    pub fn critical(kind: AlertKind, message: impl Into<String>) -> Self {
        Self::new(AlertLevel::Critical, kind, message)
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }
}

/// Fire-and-forget alert channel
pub trait AlertSink: Send + Sync {
    /// Deliver (or enqueue) an alert. Must return promptly; never blocks on
    /// downstream delivery.
    fn notify(&self, alert: Alert);
}
