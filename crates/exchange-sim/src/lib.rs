//! Exchange simulator
//!
//! An in-process venue implementing [`ExchangePort`] with scriptable
//! behavior, used by unit and integration tests (and paper runs):
//!
//! - Submission behaviors queue up per call: accept, structural reject,
//!   fail-N-times transiently, or drop the response while the order was (or
//!   was not) actually accepted - the ambiguous case that forces clients to
//!   reconcile on their idempotent key.
//! - Client keys are idempotent: resubmitting a known key returns the
//!   original acknowledgment and never creates a second live order.
//! - Fills are scripted (`fill_order`) or automatic (`set_auto_fill`), carry
//!   per-order sequence numbers, and can be applied silently to mimic events
//!   lost across a disconnect.

use async_trait::async_trait;
use chrono::Utc;
use kestrel_core::Fill;
use kestrel_ports::{
    CancelAck, ExchangeError, ExchangeEvent, ExchangePort, ExchangeResult, OrderRequest,
    OrderStatusReport, ReportedStatus, SubmitAck,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

/// How the simulator answers the next submission(s), FIFO
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    /// Acknowledge normally
    Accept,
    /// Reject with a non-retryable reason
    RejectStructural(String),
    /// Fail transiently this many times, then accept
    FailTransient(u32),
    /// Return `Disconnected` while the order WAS accepted venue-side
    AmbiguousAccepted,
    /// Return `Disconnected` and the order never arrived
    AmbiguousLost,
}

#[derive(Debug, Clone)]
struct SimOrder {
    request: OrderRequest,
    exchange_order_id: String,
    status: ReportedStatus,
    filled: Decimal,
    avg_price: Option<Decimal>,
    reject_reason: Option<String>,
    next_sequence: u64,
}

impl SimOrder {
    fn new(request: OrderRequest) -> Self {
        Self {
            request,
            exchange_order_id: format!("ex-{}", Uuid::new_v4().simple()),
            status: ReportedStatus::Open,
            filled: Decimal::ZERO,
            avg_price: None,
            reject_reason: None,
            next_sequence: 1,
        }
    }

    fn is_live(&self) -> bool {
        matches!(
            self.status,
            ReportedStatus::Open | ReportedStatus::PartiallyFilled
        )
    }

    fn report(&self) -> OrderStatusReport {
        OrderStatusReport {
            client_key: self.request.client_key.clone(),
            exchange_order_id: Some(self.exchange_order_id.clone()),
            status: self.status,
            filled_quantity: self.filled,
            avg_fill_price: self.avg_price,
            reject_reason: self.reject_reason.clone(),
        }
    }

    /// Apply a fill, returning the event to emit (if any)
    fn apply_fill(&mut self, quantity: Decimal, price: Decimal) -> Option<Fill> {
        if !self.is_live() {
            return None;
        }
        let prev_notional = self.filled * self.avg_price.unwrap_or(Decimal::ZERO);
        self.filled += quantity;
        self.avg_price = Some((prev_notional + quantity * price) / self.filled);
        self.status = if self.filled >= self.request.quantity {
            ReportedStatus::Filled
        } else {
            ReportedStatus::PartiallyFilled
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        Some(Fill {
            client_key: self.request.client_key.clone(),
            symbol: self.request.symbol.clone(),
            side: self.request.side,
            quantity,
            price,
            sequence,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Default)]
struct Inner {
    orders: HashMap<String, SimOrder>,
    behaviors: VecDeque<SubmitBehavior>,
    mark_prices: HashMap<String, Decimal>,
    auto_fill: bool,
}

/// Scriptable in-process exchange
pub struct SimExchange {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ExchangeEvent>,
}

impl Default for SimExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl SimExchange {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn emit(&self, event: ExchangeEvent) {
        // No subscribers is fine (tests that only poll state)
        let _ = self.events.send(event);
    }

    /// Queue a behavior for an upcoming submission (FIFO; default Accept)
    pub fn push_submit_behavior(&self, behavior: SubmitBehavior) {
        self.lock().behaviors.push_back(behavior);
    }

    /// Fill everything at submit time (market at the mark, limit at limit)
    pub fn set_auto_fill(&self, enabled: bool) {
        self.lock().auto_fill = enabled;
    }

    /// Set the price market orders fill at
    pub fn set_mark_price(&self, symbol: &str, price: Decimal) {
        self.lock().mark_prices.insert(symbol.to_string(), price);
    }

    /// Script a fill for a working order, emitting the fill event
    pub fn fill_order(&self, client_key: &str, quantity: Decimal, price: Decimal) {
        let fill = {
            let mut inner = self.lock();
            inner
                .orders
                .get_mut(client_key)
                .and_then(|o| o.apply_fill(quantity, price))
        };
        if let Some(fill) = fill {
            self.emit(ExchangeEvent::Fill(fill));
        }
    }

    /// Apply a fill without emitting its event - the fill a client misses
    /// while its event stream is down
    pub fn fill_order_silently(&self, client_key: &str, quantity: Decimal, price: Decimal) {
        let mut inner = self.lock();
        if let Some(order) = inner.orders.get_mut(client_key) {
            order.apply_fill(quantity, price);
        }
    }

    /// Script a post-acceptance rejection
    pub fn reject_order(&self, client_key: &str, reason: &str, structural: bool) {
        let rejected = {
            let mut inner = self.lock();
            match inner.orders.get_mut(client_key) {
                Some(order) if order.is_live() => {
                    order.status = ReportedStatus::Rejected;
                    order.reject_reason = Some(reason.to_string());
                    true
                }
                _ => false,
            }
        };
        if rejected {
            self.emit(ExchangeEvent::Rejected {
                client_key: client_key.to_string(),
                reason: reason.to_string(),
                structural,
            });
        }
    }

    /// Drop the event stream; clients must reconcile via `query_order`
    pub fn disconnect(&self) {
        self.emit(ExchangeEvent::Disconnected);
    }

    /// Orders currently working (open or partially filled)
    pub fn live_order_count(&self) -> usize {
        self.lock().orders.values().filter(|o| o.is_live()).count()
    }

    /// Client keys of working orders
    pub fn live_keys(&self) -> Vec<String> {
        self.lock()
            .orders
            .values()
            .filter(|o| o.is_live())
            .map(|o| o.request.client_key.clone())
            .collect()
    }

    /// Total orders ever created
    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    fn fill_price_for(inner: &Inner, request: &OrderRequest) -> Decimal {
        request.price.unwrap_or_else(|| {
            inner
                .mark_prices
                .get(&request.symbol)
                .copied()
                .unwrap_or(Decimal::ONE)
        })
    }
}

#[async_trait]
impl ExchangePort for SimExchange {
    async fn submit_order(&self, request: &OrderRequest) -> ExchangeResult<SubmitAck> {
        let (ack, auto_fill_event) = {
            let mut inner = self.lock();

            // Idempotency: a known key returns the original ack, no new order
            if let Some(existing) = inner.orders.get(&request.client_key) {
                log::debug!(
                    "[SIM] duplicate submission for {}, returning original ack",
                    request.client_key
                );
                return Ok(SubmitAck {
                    client_key: request.client_key.clone(),
                    exchange_order_id: existing.exchange_order_id.clone(),
                    timestamp: Utc::now(),
                });
            }

            match inner.behaviors.pop_front().unwrap_or(SubmitBehavior::Accept) {
                SubmitBehavior::Accept => {}
                SubmitBehavior::RejectStructural(reason) => {
                    return Err(ExchangeError::Structural(reason));
                }
                SubmitBehavior::FailTransient(times) => {
                    if times > 1 {
                        inner
                            .behaviors
                            .push_front(SubmitBehavior::FailTransient(times - 1));
                    }
                    return Err(ExchangeError::Transient("venue busy".to_string()));
                }
                SubmitBehavior::AmbiguousAccepted => {
                    let order = SimOrder::new(request.clone());
                    inner.orders.insert(request.client_key.clone(), order);
                    return Err(ExchangeError::Disconnected(
                        "response lost in flight".to_string(),
                    ));
                }
                SubmitBehavior::AmbiguousLost => {
                    return Err(ExchangeError::Disconnected(
                        "request lost in flight".to_string(),
                    ));
                }
            }

            let mut order = SimOrder::new(request.clone());
            let ack = SubmitAck {
                client_key: request.client_key.clone(),
                exchange_order_id: order.exchange_order_id.clone(),
                timestamp: Utc::now(),
            };

            let auto_fill_event = if inner.auto_fill {
                let price = Self::fill_price_for(&inner, request);
                order.apply_fill(request.quantity, price)
            } else {
                None
            };

            inner.orders.insert(request.client_key.clone(), order);
            (ack, auto_fill_event)
        };

        if let Some(fill) = auto_fill_event {
            self.emit(ExchangeEvent::Fill(fill));
        }
        Ok(ack)
    }

    async fn cancel_order(&self, client_key: &str) -> ExchangeResult<CancelAck> {
        let result = {
            let mut inner = self.lock();
            match inner.orders.get_mut(client_key) {
                Some(order) if order.is_live() => {
                    order.status = ReportedStatus::Cancelled;
                    Ok(CancelAck {
                        client_key: client_key.to_string(),
                        filled_quantity: order.filled,
                        timestamp: Utc::now(),
                    })
                }
                Some(order) => Err(ExchangeError::Structural(format!(
                    "too late to cancel: order is {:?}",
                    order.status
                ))),
                None => Err(ExchangeError::UnknownOrder(client_key.to_string())),
            }
        };

        if result.is_ok() {
            self.emit(ExchangeEvent::Cancelled {
                client_key: client_key.to_string(),
            });
        }
        result
    }

    async fn query_order(&self, client_key: &str) -> ExchangeResult<OrderStatusReport> {
        let inner = self.lock();
        inner
            .orders
            .get(client_key)
            .map(|o| o.report())
            .ok_or_else(|| ExchangeError::UnknownOrder(client_key.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<ExchangeEvent> {
        self.events.subscribe()
    }
}
