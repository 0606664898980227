//! Order entity and its state machine
//!
//! Transitions are applied through the `mark_*`/`apply_fill` methods, which
//! enforce the one rule that matters: a terminal order (filled, rejected,
//! cancelled) never becomes non-terminal again. Violating events are logged
//! and dropped.

use chrono::{DateTime, Utc};
use kestrel_core::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Created locally, not yet acknowledged
    PendingSubmit,
    /// Acknowledged by the exchange, no fills yet
    Submitted,
    /// Some quantity filled, remainder still working
    PartiallyFilled,
    /// Fully filled - terminal
    Filled,
    /// Rejected by the exchange or by retry exhaustion - terminal
    Rejected,
    /// Cancelled (explicitly, by expiry, or by halt) - terminal
    Cancelled,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Rejected | OrderState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::PendingSubmit => "pending_submit",
            OrderState::Submitted => "submitted",
            OrderState::PartiallyFilled => "partially_filled",
            OrderState::Filled => "filled",
            OrderState::Rejected => "rejected",
            OrderState::Cancelled => "cancelled",
        }
    }
}

/// A single order submission, owned by the executor until terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Client-assigned idempotent key
    pub client_key: String,
    /// Venue-assigned id, known after acknowledgment
    pub exchange_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub requested_size: Decimal,
    pub filled_size: Decimal,
    /// Size-weighted mean of fill prices
    pub avg_fill_price: Option<Decimal>,
    pub state: OrderState,
    pub retry_count: u32,
    pub last_error: Option<String>,
    /// Highest fill sequence applied; lower sequences are dropped
    pub last_fill_sequence: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(symbol: impl Into<String>, side: Side, requested_size: Decimal) -> Self {
        Self {
            client_key: format!("ord-{}", Uuid::new_v4()),
            exchange_order_id: None,
            symbol: symbol.into(),
            side,
            requested_size,
            filled_size: Decimal::ZERO,
            avg_fill_price: None,
            state: OrderState::PendingSubmit,
            retry_count: 0,
            last_error: None,
            last_fill_sequence: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn remaining_size(&self) -> Decimal {
        (self.requested_size - self.filled_size).max(Decimal::ZERO)
    }

    pub fn has_fills(&self) -> bool {
        self.filled_size > Decimal::ZERO
    }

    /// Exchange acknowledged the submission
    pub fn mark_submitted(&mut self, exchange_order_id: impl Into<String>) {
        if self.is_terminal() {
            log::warn!(
                "[ORDER] {} ignoring ack in terminal state {}",
                self.client_key,
                self.state.as_str()
            );
            return;
        }
        self.exchange_order_id = Some(exchange_order_id.into());
        if self.state == OrderState::PendingSubmit {
            self.state = OrderState::Submitted;
        }
    }

    /// Apply a fill event. Returns false when the fill was dropped
    /// (terminal state, or a stale/duplicate sequence number).
    pub fn apply_fill(&mut self, quantity: Decimal, price: Decimal, sequence: u64) -> bool {
        if self.is_terminal() {
            log::warn!(
                "[ORDER] {} dropping fill in terminal state {}",
                self.client_key,
                self.state.as_str()
            );
            return false;
        }
        if let Some(last) = self.last_fill_sequence {
            if sequence <= last {
                log::warn!(
                    "[ORDER] {} dropping out-of-order fill seq {} (last {})",
                    self.client_key,
                    sequence,
                    last
                );
                return false;
            }
        }

        let prev_notional = self.filled_size * self.avg_fill_price.unwrap_or(Decimal::ZERO);
        self.filled_size += quantity;
        if self.filled_size > Decimal::ZERO {
            self.avg_fill_price = Some((prev_notional + quantity * price) / self.filled_size);
        }
        self.last_fill_sequence = Some(sequence);

        self.state = if self.filled_size >= self.requested_size {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        true
    }

    /// Exchange rejected the order, or retries were exhausted
    pub fn mark_rejected(&mut self, reason: impl Into<String>) {
        if self.is_terminal() {
            log::warn!(
                "[ORDER] {} ignoring reject in terminal state {}",
                self.client_key,
                self.state.as_str()
            );
            return;
        }
        self.last_error = Some(reason.into());
        self.state = OrderState::Rejected;
    }

    /// The order was cancelled; any fills already applied stand
    pub fn mark_cancelled(&mut self) {
        if self.is_terminal() {
            log::warn!(
                "[ORDER] {} ignoring cancel in terminal state {}",
                self.client_key,
                self.state.as_str()
            );
            return;
        }
        self.state = OrderState::Cancelled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::new("XMR-USDT", Side::Buy, dec!(10))
    }

    #[test]
    fn test_lifecycle_to_filled() {
        let mut order = order();
        assert_eq!(order.state, OrderState::PendingSubmit);

        order.mark_submitted("ex-1");
        assert_eq!(order.state, OrderState::Submitted);

        assert!(order.apply_fill(dec!(4), dec!(100), 1));
        assert_eq!(order.state, OrderState::PartiallyFilled);
        assert_eq!(order.remaining_size(), dec!(6));

        assert!(order.apply_fill(dec!(6), dec!(102), 2));
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.filled_size, dec!(10));
        // Size-weighted: (4*100 + 6*102) / 10
        assert_eq!(order.avg_fill_price, Some(dec!(101.2)));
    }

    #[test]
    fn test_terminal_states_are_immune() {
        let mut order = order();
        order.mark_submitted("ex-1");
        order.apply_fill(dec!(10), dec!(100), 1);
        assert_eq!(order.state, OrderState::Filled);

        // No event may leave a terminal state
        order.mark_cancelled();
        assert_eq!(order.state, OrderState::Filled);
        order.mark_rejected("late reject");
        assert_eq!(order.state, OrderState::Filled);
        assert!(!order.apply_fill(dec!(1), dec!(100), 2));
        assert_eq!(order.filled_size, dec!(10));

        let mut cancelled = Order::new("XMR-USDT", Side::Buy, dec!(10));
        cancelled.mark_submitted("ex-2");
        cancelled.mark_cancelled();
        assert!(!cancelled.apply_fill(dec!(1), dec!(100), 1));
        assert_eq!(cancelled.state, OrderState::Cancelled);
    }

    #[test]
    fn test_stale_sequence_dropped() {
        let mut order = order();
        order.mark_submitted("ex-1");
        assert!(order.apply_fill(dec!(2), dec!(100), 5));
        assert!(!order.apply_fill(dec!(2), dec!(100), 5)); // duplicate
        assert!(!order.apply_fill(dec!(2), dec!(100), 3)); // reordered
        assert_eq!(order.filled_size, dec!(2));

        assert!(order.apply_fill(dec!(2), dec!(100), 6));
        assert_eq!(order.filled_size, dec!(4));
    }

    #[test]
    fn test_cancel_keeps_partial_fills() {
        let mut order = order();
        order.mark_submitted("ex-1");
        order.apply_fill(dec!(3), dec!(100), 1);
        order.mark_cancelled();

        assert_eq!(order.state, OrderState::Cancelled);
        assert_eq!(order.filled_size, dec!(3));
        assert!(order.has_fills());
    }

    #[test]
    fn test_reject_records_reason() {
        let mut order = order();
        order.mark_submitted("ex-1");
        order.mark_rejected("insufficient balance");

        assert_eq!(order.state, OrderState::Rejected);
        assert_eq!(order.last_error.as_deref(), Some("insufficient balance"));
    }
}
