//! Exchange capability port
//!
//! The engine never speaks an exchange-specific wire protocol. Everything it
//! needs from a venue is behind [`ExchangePort`]: submit, cancel, status
//! query keyed on the client's idempotent key, and an event subscription for
//! fills/rejects/cancels.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kestrel_core::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Exchange-facing errors, split by retry semantics
#[derive(Error, Debug, Clone)]
pub enum ExchangeError {
    /// Worth retrying with backoff (rate limit, timeout, busy venue)
    #[error("transient exchange error: {0}")]
    Transient(String),

    /// Retrying cannot help (invalid size, insufficient balance, halted symbol)
    #[error("structural exchange error: {0}")]
    Structural(String),

    /// The call's outcome is unknown - reconcile by querying the client key
    /// before assuming failure
    #[error("exchange unreachable: {0}")]
    Disconnected(String),

    /// No order known under the given client key
    #[error("unknown order: {0}")]
    UnknownOrder(String),
}

impl ExchangeError {
    /// Should the caller retry the same idempotent submission?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Transient(_) | ExchangeError::Disconnected(_)
        )
    }

    /// Did the call possibly take effect despite the error?
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, ExchangeError::Disconnected(_))
    }
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Order submission request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-assigned idempotent key; resubmitting the same key must never
    /// create a second live order
    pub client_key: String,
    /// Instrument to trade
    pub symbol: String,
    /// Buy or sell
    pub side: Side,
    /// Quantity to trade
    pub quantity: Decimal,
    /// Limit price; `None` means market
    pub price: Option<Decimal>,
}

impl OrderRequest {
    /// Create a limit order request
    pub fn limit(
        client_key: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            client_key: client_key.into(),
            symbol: symbol.into(),
            side,
            quantity,
            price: Some(price),
        }
    }

    /// Create a market order request
    pub fn market(
        client_key: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
    ) -> Self {
        Self {
            client_key: client_key.into(),
            symbol: symbol.into(),
            side,
            quantity,
            price: None,
        }
    }

    pub fn is_market(&self) -> bool {
        self.price.is_none()
    }
}

/// Acknowledgment of an accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAck {
    /// Echo of the client key
    pub client_key: String,
    /// Exchange-assigned order id
    pub exchange_order_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgment of a cancel request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAck {
    pub client_key: String,
    /// Quantity that had filled before the cancel took effect
    pub filled_quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Exchange-reported order status, used for reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportedStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl ReportedStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportedStatus::Filled | ReportedStatus::Cancelled | ReportedStatus::Rejected
        )
    }
}

/// Point-in-time order state as the exchange sees it
///
/// During reconciliation this report is authoritative: local state is
/// corrected to match it, never the other way around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub client_key: String,
    pub exchange_order_id: Option<String>,
    pub status: ReportedStatus,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub reject_reason: Option<String>,
}

/// Asynchronous events pushed by the exchange
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    /// A (possibly partial) fill for the order under `client_key`
    Fill(kestrel_core::Fill),
    /// The order was rejected after acceptance
    Rejected {
        client_key: String,
        reason: String,
        structural: bool,
    },
    /// The order was cancelled (explicitly or by expiry)
    Cancelled { client_key: String },
    /// The event stream dropped; events may have been lost. Consumers must
    /// reconcile open orders via `query_order` once reconnected.
    Disconnected,
}

impl ExchangeEvent {
    /// Client key this event belongs to, if any
    pub fn client_key(&self) -> Option<&str> {
        match self {
            ExchangeEvent::Fill(fill) => Some(&fill.client_key),
            ExchangeEvent::Rejected { client_key, .. } => Some(client_key),
            ExchangeEvent::Cancelled { client_key } => Some(client_key),
            ExchangeEvent::Disconnected => None,
        }
    }
}

/// Capability interface to a trading venue
#[async_trait]
pub trait ExchangePort: Send + Sync {
    /// Submit an order. Implementations must treat `client_key` as
    /// idempotent: a repeated key returns the original acknowledgment
    /// instead of creating a second order.
    async fn submit_order(&self, request: &OrderRequest) -> ExchangeResult<SubmitAck>;

    /// Cancel an order by client key
    async fn cancel_order(&self, client_key: &str) -> ExchangeResult<CancelAck>;

    /// Query current order state by client key (reconciliation path)
    async fn query_order(&self, client_key: &str) -> ExchangeResult<OrderStatusReport>;

    /// Subscribe to the venue's event stream
    fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent>;
}
