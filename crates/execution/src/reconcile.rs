//! Reconciliation against exchange-reported state
//!
//! After a reconnect (or any ambiguous failure) the venue's view of an order
//! is queried by its idempotent client key and applied over the local view.
//! The exchange is authoritative for fills and terminal outcomes, with one
//! exception: a locally terminal order is never reopened - if the venue
//! still reports it working we keep our terminal state, sync the fill
//! quantities, and flag the disagreement.

use crate::order::{Order, OrderState};
use kestrel_ports::{OrderStatusReport, ReportedStatus};

/// Apply an exchange status report to the local order.
///
/// Returns `true` when the report disagreed with local state (a
/// reconciliation conflict the caller should alert on).
pub fn apply_report(order: &mut Order, report: &OrderStatusReport) -> bool {
    let mut conflict = false;

    if report.filled_quantity != order.filled_size {
        log::warn!(
            "[RECONCILE] {} local filled {} != exchange filled {}, trusting exchange",
            order.client_key,
            order.filled_size,
            report.filled_quantity
        );
        order.filled_size = report.filled_quantity;
        order.avg_fill_price = report.avg_fill_price.or(order.avg_fill_price);
        conflict = true;
    }

    if let Some(id) = &report.exchange_order_id {
        if order.exchange_order_id.is_none() {
            order.exchange_order_id = Some(id.clone());
        }
    }

    let reported_state = match report.status {
        ReportedStatus::Open => OrderState::Submitted,
        ReportedStatus::PartiallyFilled => OrderState::PartiallyFilled,
        ReportedStatus::Filled => OrderState::Filled,
        ReportedStatus::Cancelled => OrderState::Cancelled,
        ReportedStatus::Rejected => OrderState::Rejected,
    };

    if reported_state != order.state {
        if order.is_terminal() && !reported_state.is_terminal() {
            // Never reopen a terminal order; keep ours, note the disagreement
            log::warn!(
                "[RECONCILE] {} exchange reports {} but order is terminal {}, keeping local",
                order.client_key,
                reported_state.as_str(),
                order.state.as_str()
            );
            conflict = true;
        } else {
            if order.is_terminal() {
                // Terminal-to-terminal correction (e.g. Cancelled -> Filled)
                log::warn!(
                    "[RECONCILE] {} correcting terminal state {} -> {}",
                    order.client_key,
                    order.state.as_str(),
                    reported_state.as_str()
                );
                conflict = true;
            }
            order.state = reported_state;
            if reported_state == OrderState::Rejected {
                order.last_error = report
                    .reject_reason
                    .clone()
                    .or_else(|| Some("rejected by exchange".to_string()));
            }
        }
    }

    conflict
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::Side;
    use rust_decimal_macros::dec;

    fn report(status: ReportedStatus, filled: rust_decimal::Decimal) -> OrderStatusReport {
        OrderStatusReport {
            client_key: "k".to_string(),
            exchange_order_id: Some("ex-1".to_string()),
            status,
            filled_quantity: filled,
            avg_fill_price: Some(dec!(100)),
            reject_reason: None,
        }
    }

    #[test]
    fn test_partial_fill_corrected_to_full() {
        // Partially filled 40%, disconnect, exchange reports fully filled
        let mut order = Order::new("XMR-USDT", Side::Buy, dec!(10));
        order.mark_submitted("ex-1");
        order.apply_fill(dec!(4), dec!(100), 1);
        assert_eq!(order.state, OrderState::PartiallyFilled);

        let conflict = apply_report(&mut order, &report(ReportedStatus::Filled, dec!(10)));
        assert!(conflict);
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.filled_size, dec!(10));
    }

    #[test]
    fn test_matching_report_is_quiet() {
        let mut order = Order::new("XMR-USDT", Side::Buy, dec!(10));
        order.mark_submitted("ex-1");
        order.apply_fill(dec!(4), dec!(100), 1);

        let conflict = apply_report(
            &mut order,
            &report(ReportedStatus::PartiallyFilled, dec!(4)),
        );
        assert!(!conflict);
        assert_eq!(order.state, OrderState::PartiallyFilled);
    }

    #[test]
    fn test_terminal_order_never_reopened() {
        let mut order = Order::new("XMR-USDT", Side::Buy, dec!(10));
        order.mark_submitted("ex-1");
        order.mark_cancelled();

        let conflict = apply_report(&mut order, &report(ReportedStatus::Open, dec!(0)));
        assert!(conflict);
        assert_eq!(order.state, OrderState::Cancelled);
    }

    #[test]
    fn test_cancelled_corrected_to_filled() {
        // We cancelled, but the fill won the race at the venue
        let mut order = Order::new("XMR-USDT", Side::Buy, dec!(10));
        order.mark_submitted("ex-1");
        order.mark_cancelled();

        let conflict = apply_report(&mut order, &report(ReportedStatus::Filled, dec!(10)));
        assert!(conflict);
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.filled_size, dec!(10));
    }

    #[test]
    fn test_rejected_report_records_reason() {
        let mut order = Order::new("XMR-USDT", Side::Buy, dec!(10));
        order.mark_submitted("ex-1");

        let mut rep = report(ReportedStatus::Rejected, dec!(0));
        rep.reject_reason = Some("symbol halted".to_string());
        apply_report(&mut order, &rep);

        assert_eq!(order.state, OrderState::Rejected);
        assert_eq!(order.last_error.as_deref(), Some("symbol halted"));
    }
}
