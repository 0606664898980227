//! Audit journal port
//!
//! Every order transition, position lifecycle event, and risk decision
//! (including rejections, with their reasons) is appended to the audit
//! journal. The engine only ever writes this store - it never reads it back
//! to make decisions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kestrel_core::{CloseReason, Direction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone)]
pub enum AuditError {
    #[error("audit write failed: {0}")]
    Write(String),
}

pub type AuditResult = std::result::Result<(), AuditError>;

/// One record in the append-only audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A sizing decision that passed all checks
    Decision {
        symbol: String,
        direction: Direction,
        size: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
        target_price: Decimal,
        risk_reward_ratio: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// A sizing decision vetoed by policy - reason is machine-readable
    DecisionRejected {
        symbol: String,
        reason: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },
    /// An order state transition
    OrderTransition {
        client_key: String,
        symbol: String,
        state: String,
        filled_size: Decimal,
        avg_fill_price: Option<Decimal>,
        detail: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// A new lot was opened
    PositionOpened {
        position_id: Uuid,
        symbol: String,
        direction: Direction,
        size: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
        target_price: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// A stop or target level moved (trailing, breakeven)
    PositionAdjusted {
        position_id: Uuid,
        symbol: String,
        field: String,
        from: Decimal,
        to: Decimal,
        timestamp: DateTime<Utc>,
    },
    /// A lot (or a slice of one) was closed
    PositionClosed {
        position_id: Uuid,
        symbol: String,
        quantity: Decimal,
        exit_price: Decimal,
        pnl: Decimal,
        reason: CloseReason,
        timestamp: DateTime<Utc>,
    },
    /// Trading was halted
    Halt {
        reason: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A halt was lifted by explicit reset or override
    HaltLifted { timestamp: DateTime<Utc> },
}

/// Append-only audit journal
///
/// A failing sink is a system-serious condition: callers escalate to a halt
/// plus alert rather than degrading silently.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> AuditResult;
}
