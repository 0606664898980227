//! Order executor
//!
//! Drives one order submission from `PendingSubmit` to a terminal state:
//! retried submission, fill collection, limit-expiry fallback to market, and
//! cooperative cancellation. The executor talks to the venue only through
//! [`ExchangePort`] and never holds any lock across an await - each symbol
//! runs its own executor inside its own task.

use crate::backoff::{Backoff, BackoffConfig};
use crate::order::{Order, OrderState};
use crate::reconcile;
use kestrel_core::Side;
use kestrel_ports::{ExchangeError, ExchangeEvent, ExchangePort, OrderRequest};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// Executor policy, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Total submission attempts before `retry_exhausted`
    pub max_attempts: u32,
    /// Backoff between retries
    pub backoff: BackoffConfig,
    /// How long a limit order may work before the market fallback
    pub limit_fill_window_ms: u64,
    /// How long to wait for market-order fills before reconciling
    pub market_fill_window_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: BackoffConfig::default(),
            limit_fill_window_ms: 30_000,
            market_fill_window_ms: 10_000,
        }
    }
}

/// Outcome of one entry attempt: the primary order plus the one-shot market
/// fallback, if the limit order expired unfilled
#[derive(Debug)]
pub struct EntryResult {
    pub primary: Order,
    pub fallback: Option<Order>,
    /// Reconciliation conflicts found along the way (alert-worthy)
    pub conflicts: u32,
}

impl EntryResult {
    /// Quantity filled across primary and fallback
    pub fn total_filled(&self) -> Decimal {
        self.primary.filled_size
            + self
                .fallback
                .as_ref()
                .map(|o| o.filled_size)
                .unwrap_or(Decimal::ZERO)
    }

    /// Size-weighted average fill price across primary and fallback
    pub fn avg_fill_price(&self) -> Option<Decimal> {
        let total = self.total_filled();
        if total.is_zero() {
            return None;
        }
        let mut notional = self.primary.filled_size
            * self.primary.avg_fill_price.unwrap_or(Decimal::ZERO);
        if let Some(fb) = &self.fallback {
            notional += fb.filled_size * fb.avg_fill_price.unwrap_or(Decimal::ZERO);
        }
        Some(notional / total)
    }

    pub fn has_fills(&self) -> bool {
        self.total_filled() > Decimal::ZERO
    }

    /// Did either leg die from retry exhaustion?
    pub fn retry_exhausted(&self) -> bool {
        let exhausted = |o: &Order| {
            o.state == OrderState::Rejected && o.last_error.as_deref() == Some("retry_exhausted")
        };
        exhausted(&self.primary) || self.fallback.as_ref().map(exhausted).unwrap_or(false)
    }

    /// The entry failed outright (no fills, ended rejected)
    pub fn rejected(&self) -> bool {
        !self.has_fills()
            && (self.primary.state == OrderState::Rejected
                || self
                    .fallback
                    .as_ref()
                    .map(|o| o.state == OrderState::Rejected)
                    .unwrap_or(false))
    }
}

enum WaitOutcome {
    /// Order reached a terminal state
    Terminal,
    /// Fill window expired with the order still working
    TimedOut,
    /// Cancellation was requested while waiting
    CancelRequested,
}

/// Resolves when cancellation is requested; never resolves if the sender is
/// gone (cancellation can no longer arrive)
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Drives orders against an exchange port
pub struct OrderExecutor<E: ExchangePort> {
    exchange: Arc<E>,
    config: ExecutorConfig,
    backoff: Backoff,
}

impl<E: ExchangePort> OrderExecutor<E> {
    pub fn new(exchange: Arc<E>, config: ExecutorConfig) -> Self {
        let backoff = Backoff::new(config.backoff.clone());
        Self {
            exchange,
            config,
            backoff,
        }
    }

    /// Run one order to a terminal state.
    ///
    /// With a limit price the order falls back to a market order for the
    /// residual, once, if the fill window expires. `cancel` flipping to true
    /// requests cooperative cancellation: any in-flight exchange call is
    /// awaited and its result applied before the order is cancelled.
    pub async fn execute(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
        limit_price: Option<Decimal>,
        cancel: &mut watch::Receiver<bool>,
    ) -> EntryResult {
        // Subscribe before submitting so no fill can slip past
        let mut events = self.exchange.subscribe();
        let mut conflicts = 0u32;

        let mut order = Order::new(symbol, side, size);
        let request = match limit_price {
            Some(price) => {
                OrderRequest::limit(&order.client_key, symbol, side, size, price)
            }
            None => OrderRequest::market(&order.client_key, symbol, side, size),
        };

        self.submit_with_retry(&mut order, &request, cancel, &mut conflicts)
            .await;
        if order.is_terminal() {
            return EntryResult {
                primary: order,
                fallback: None,
                conflicts,
            };
        }

        let window = if limit_price.is_some() {
            Duration::from_millis(self.config.limit_fill_window_ms)
        } else {
            Duration::from_millis(self.config.market_fill_window_ms)
        };

        match self
            .await_fills(&mut order, &mut events, window, cancel, &mut conflicts)
            .await
        {
            WaitOutcome::Terminal => {}
            WaitOutcome::CancelRequested => {
                self.cancel_and_reconcile(&mut order, &mut conflicts).await;
            }
            WaitOutcome::TimedOut => {
                self.cancel_and_reconcile(&mut order, &mut conflicts).await;

                let residual = order.remaining_size();
                if limit_price.is_some() && residual > Decimal::ZERO && !*cancel.borrow() {
                    log::info!(
                        "[EXEC] {} limit window expired with {} residual, falling back to market",
                        order.client_key,
                        residual
                    );
                    let fallback = self
                        .run_market_fallback(symbol, side, residual, &mut events, cancel, &mut conflicts)
                        .await;
                    return EntryResult {
                        primary: order,
                        fallback: Some(fallback),
                        conflicts,
                    };
                }
            }
        }

        EntryResult {
            primary: order,
            fallback: None,
            conflicts,
        }
    }

    /// The one-shot market fallback after a limit order expires unfilled
    async fn run_market_fallback(
        &self,
        symbol: &str,
        side: Side,
        size: Decimal,
        events: &mut broadcast::Receiver<ExchangeEvent>,
        cancel: &mut watch::Receiver<bool>,
        conflicts: &mut u32,
    ) -> Order {
        let mut order = Order::new(symbol, side, size);
        let request = OrderRequest::market(&order.client_key, symbol, side, size);

        self.submit_with_retry(&mut order, &request, cancel, conflicts)
            .await;
        if order.is_terminal() {
            return order;
        }

        let window = Duration::from_millis(self.config.market_fill_window_ms);
        match self
            .await_fills(&mut order, events, window, cancel, conflicts)
            .await
        {
            WaitOutcome::Terminal => {}
            WaitOutcome::CancelRequested | WaitOutcome::TimedOut => {
                // No second fallback: cancel whatever is left
                self.cancel_and_reconcile(&mut order, conflicts).await;
            }
        }
        order
    }

    /// Submit with bounded, jittered retries. Ambiguous failures reconcile
    /// on the idempotent key before counting as failures.
    async fn submit_with_retry(
        &self,
        order: &mut Order,
        request: &OrderRequest,
        cancel: &mut watch::Receiver<bool>,
        conflicts: &mut u32,
    ) {
        let mut attempt = 0u32;
        loop {
            if *cancel.borrow() {
                order.mark_cancelled();
                return;
            }

            match self.exchange.submit_order(request).await {
                Ok(ack) => {
                    log::debug!(
                        "[EXEC] {} accepted as {}",
                        order.client_key,
                        ack.exchange_order_id
                    );
                    order.mark_submitted(ack.exchange_order_id);
                    return;
                }
                Err(err) if err.is_ambiguous() => {
                    // Outcome unknown. The idempotent key lets us ask instead
                    // of guessing - a blind retry could not duplicate the
                    // order either, but the query may spare us the wait.
                    match self.exchange.query_order(&request.client_key).await {
                        Ok(report) => {
                            if reconcile::apply_report(order, &report) {
                                *conflicts += 1;
                            }
                            if order.state != OrderState::PendingSubmit {
                                log::info!(
                                    "[EXEC] {} survived ambiguous failure, state {}",
                                    order.client_key,
                                    order.state.as_str()
                                );
                                return;
                            }
                        }
                        Err(ExchangeError::UnknownOrder(_)) => {
                            // Never arrived; a clean retry
                        }
                        Err(query_err) => {
                            log::warn!(
                                "[EXEC] {} status query failed after ambiguous submit: {}",
                                order.client_key,
                                query_err
                            );
                        }
                    }
                    order.retry_count += 1;
                    order.last_error = Some(err.to_string());
                }
                Err(ExchangeError::Transient(reason)) => {
                    log::warn!(
                        "[EXEC] {} transient submit failure: {}",
                        order.client_key,
                        reason
                    );
                    order.retry_count += 1;
                    order.last_error = Some(reason);
                }
                Err(err) => {
                    // Structural (or unknown-order, which submit should never
                    // see): retrying cannot help
                    log::warn!("[EXEC] {} rejected: {}", order.client_key, err);
                    order.mark_rejected(err.to_string());
                    return;
                }
            }

            attempt += 1;
            if attempt >= self.config.max_attempts {
                log::error!(
                    "[EXEC] {} retry budget exhausted after {} attempts",
                    order.client_key,
                    attempt
                );
                order.mark_rejected("retry_exhausted");
                return;
            }

            // Backoff; a cancel request ends the wait early, but never an
            // in-flight call
            let delay = self.backoff.delay(attempt - 1);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_cancelled(cancel) => {
                    order.mark_cancelled();
                    return;
                }
            }
        }
    }

    /// Collect fills until the order is terminal, the window expires, or a
    /// cancel is requested. Fills for other orders are ignored; a dropped
    /// stream triggers reconciliation rather than guesswork.
    async fn await_fills(
        &self,
        order: &mut Order,
        events: &mut broadcast::Receiver<ExchangeEvent>,
        window: Duration,
        cancel: &mut watch::Receiver<bool>,
        conflicts: &mut u32,
    ) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + window;

        loop {
            if order.is_terminal() {
                return WaitOutcome::Terminal;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return WaitOutcome::TimedOut;
                }

                _ = wait_cancelled(cancel) => {
                    return WaitOutcome::CancelRequested;
                }

                event = events.recv() => match event {
                    Ok(ExchangeEvent::Fill(fill)) if fill.client_key == order.client_key => {
                        order.apply_fill(fill.quantity, fill.price, fill.sequence);
                    }
                    Ok(ExchangeEvent::Rejected { client_key, reason, .. })
                        if client_key == order.client_key =>
                    {
                        order.mark_rejected(reason);
                    }
                    Ok(ExchangeEvent::Cancelled { client_key })
                        if client_key == order.client_key =>
                    {
                        order.mark_cancelled();
                    }
                    Ok(ExchangeEvent::Disconnected) => {
                        log::warn!(
                            "[EXEC] {} event stream dropped, reconciling",
                            order.client_key
                        );
                        self.reconcile_order(order, conflicts).await;
                    }
                    Ok(_) => {} // someone else's order
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!(
                            "[EXEC] {} lagged {} events, reconciling",
                            order.client_key,
                            n
                        );
                        self.reconcile_order(order, conflicts).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.reconcile_order(order, conflicts).await;
                        if !order.is_terminal() {
                            return WaitOutcome::TimedOut;
                        }
                    }
                }
            }
        }
    }

    /// Cancel at the venue, then let the venue's answer settle what actually
    /// happened - a fill that raced the cancel is applied, not lost.
    pub async fn cancel_and_reconcile(&self, order: &mut Order, conflicts: &mut u32) {
        match self.exchange.cancel_order(&order.client_key).await {
            Ok(ack) => {
                log::debug!(
                    "[EXEC] {} cancelled ({} was filled)",
                    order.client_key,
                    ack.filled_quantity
                );
            }
            Err(err) => {
                log::warn!("[EXEC] {} cancel failed: {}", order.client_key, err);
            }
        }

        self.reconcile_order(order, conflicts).await;
        if !order.is_terminal() {
            order.mark_cancelled();
        }
    }

    async fn reconcile_order(&self, order: &mut Order, conflicts: &mut u32) {
        match self.exchange.query_order(&order.client_key).await {
            Ok(report) => {
                if reconcile::apply_report(order, &report) {
                    *conflicts += 1;
                }
            }
            Err(ExchangeError::UnknownOrder(_)) if order.state == OrderState::PendingSubmit => {
                // Was never accepted; nothing to correct
            }
            Err(err) => {
                log::warn!(
                    "[EXEC] {} reconciliation query failed: {}",
                    order.client_key,
                    err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_sim::{SimExchange, SubmitBehavior};
    use rust_decimal_macros::dec;

    fn executor(sim: &Arc<SimExchange>) -> OrderExecutor<SimExchange> {
        OrderExecutor::new(
            sim.clone(),
            ExecutorConfig {
                max_attempts: 3,
                backoff: BackoffConfig {
                    base_delay_ms: 5,
                    max_delay_ms: 20,
                    jitter_frac: 0.0,
                },
                limit_fill_window_ms: 200,
                market_fill_window_ms: 200,
            },
        )
    }

    fn no_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test]
    async fn test_market_order_fills() {
        let sim = Arc::new(SimExchange::new());
        sim.set_auto_fill(true);
        sim.set_mark_price("XMR-USDT", dec!(160));
        let exec = executor(&sim);
        let (_tx, mut cancel) = no_cancel();

        let result = exec
            .execute("XMR-USDT", Side::Buy, dec!(5), None, &mut cancel)
            .await;

        assert_eq!(result.primary.state, OrderState::Filled);
        assert_eq!(result.total_filled(), dec!(5));
        assert_eq!(result.avg_fill_price(), Some(dec!(160)));
        assert!(result.fallback.is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_fill() {
        let sim = Arc::new(SimExchange::new());
        sim.set_auto_fill(true);
        sim.set_mark_price("XMR-USDT", dec!(160));
        sim.push_submit_behavior(SubmitBehavior::FailTransient(2));
        let exec = executor(&sim);
        let (_tx, mut cancel) = no_cancel();

        let result = exec
            .execute("XMR-USDT", Side::Buy, dec!(5), None, &mut cancel)
            .await;

        assert_eq!(result.primary.state, OrderState::Filled);
        assert_eq!(result.primary.retry_count, 2);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_surfaced() {
        let sim = Arc::new(SimExchange::new());
        sim.push_submit_behavior(SubmitBehavior::FailTransient(10));
        let exec = executor(&sim);
        let (_tx, mut cancel) = no_cancel();

        let result = exec
            .execute("XMR-USDT", Side::Buy, dec!(5), None, &mut cancel)
            .await;

        assert_eq!(result.primary.state, OrderState::Rejected);
        assert!(result.retry_exhausted());
        assert!(result.rejected());
    }

    #[tokio::test]
    async fn test_structural_rejection_no_retry() {
        let sim = Arc::new(SimExchange::new());
        sim.push_submit_behavior(SubmitBehavior::RejectStructural(
            "insufficient balance".to_string(),
        ));
        let exec = executor(&sim);
        let (_tx, mut cancel) = no_cancel();

        let result = exec
            .execute("XMR-USDT", Side::Buy, dec!(5), None, &mut cancel)
            .await;

        assert_eq!(result.primary.state, OrderState::Rejected);
        assert_eq!(result.primary.retry_count, 0);
        assert!(!result.retry_exhausted());
    }

    #[tokio::test]
    async fn test_ambiguous_submit_recovers_without_duplicate() {
        let sim = Arc::new(SimExchange::new());
        sim.push_submit_behavior(SubmitBehavior::AmbiguousAccepted);
        let exec = executor(&sim);
        let (_tx, mut cancel) = no_cancel();

        let sim_bg = sim.clone();
        let handle = tokio::spawn(async move {
            // Give the executor time to hit the ambiguous failure and
            // reconcile, then fill the order it discovered
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(sim_bg.live_order_count(), 1);
            let key = {
                // the only live order
                sim_bg.live_keys().pop().expect("one live order")
            };
            sim_bg.fill_order(&key, dec!(5), dec!(160));
        });

        let result = exec
            .execute("XMR-USDT", Side::Buy, dec!(5), Some(dec!(160)), &mut cancel)
            .await;
        handle.await.expect("fill task");

        assert_eq!(result.primary.state, OrderState::Filled);
        // Exactly one order ever existed at the venue
        assert_eq!(sim.order_count(), 1);
    }

    #[tokio::test]
    async fn test_limit_expiry_falls_back_to_market_once() {
        let sim = Arc::new(SimExchange::new());
        sim.set_mark_price("XMR-USDT", dec!(161));
        let exec = executor(&sim);
        let (_tx, mut cancel) = no_cancel();

        // Limit never fills; after the window the residual goes to market.
        // Auto-fill only kicks in for orders submitted after it's enabled.
        let sim_bg = sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            sim_bg.set_auto_fill(true);
        });

        let result = exec
            .execute("XMR-USDT", Side::Buy, dec!(5), Some(dec!(150)), &mut cancel)
            .await;

        assert_eq!(result.primary.state, OrderState::Cancelled);
        let fallback = result.fallback.as_ref().expect("market fallback");
        assert_eq!(fallback.state, OrderState::Filled);
        assert_eq!(result.total_filled(), dec!(5));
        assert_eq!(result.avg_fill_price(), Some(dec!(161)));
    }

    #[tokio::test]
    async fn test_partial_fill_then_disconnect_reconciles_full() {
        let sim = Arc::new(SimExchange::new());
        let exec = executor(&sim);
        let (_tx, mut cancel) = no_cancel();

        let sim_bg = sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let key = sim_bg.live_keys().pop().expect("one live order");
            // 40% fills normally...
            sim_bg.fill_order(&key, dec!(4), dec!(160));
            tokio::time::sleep(Duration::from_millis(30)).await;
            // ...then the stream drops and the rest fills unseen
            sim_bg.fill_order_silently(&key, dec!(6), dec!(160));
            sim_bg.disconnect();
        });

        let result = exec
            .execute("XMR-USDT", Side::Buy, dec!(10), Some(dec!(160)), &mut cancel)
            .await;

        // Reconciliation must surface the full filled size, not 40%
        assert_eq!(result.primary.state, OrderState::Filled);
        assert_eq!(result.primary.filled_size, dec!(10));
        assert!(result.conflicts > 0);
    }

    #[tokio::test]
    async fn test_cancel_requested_applies_raced_fill() {
        let sim = Arc::new(SimExchange::new());
        let exec = executor(&sim);
        let (tx, mut cancel) = no_cancel();

        let sim_bg = sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let key = sim_bg.live_keys().pop().expect("one live order");
            // The fill lands just before the cancel request
            sim_bg.fill_order_silently(&key, dec!(10), dec!(160));
            tx.send(true).ok();
        });

        let result = exec
            .execute("XMR-USDT", Side::Buy, dec!(10), Some(dec!(160)), &mut cancel)
            .await;

        // Cooperative cancel: the raced fill is applied, not lost
        assert_eq!(result.primary.state, OrderState::Filled);
        assert_eq!(result.primary.filled_size, dec!(10));
    }
}
