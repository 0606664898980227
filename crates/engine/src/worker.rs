//! Symbol worker
//!
//! One task per symbol, consuming that symbol's event queue. Everything a
//! symbol does - aggregating its signals, sizing a candidate, asking the
//! governor, executing the order, managing the resulting lot - happens
//! sequentially inside this task, so no two decisions for one symbol can
//! ever interleave. Waits (submission acks, fill windows, retry backoff)
//! suspend only this task; other symbols keep running.
//!
//! Halt directives arrive on the control broadcast: the worker flips the
//! entry-cancel flag (cancelling any in-flight entry cooperatively), stops
//! opening positions, and - if the directive demands it - flattens. Exits
//! remain allowed while halted.

use crate::governor_task::{ControlSignal, GovernorHandle};
use chrono::Utc;
use kestrel_core::CloseReason;
use kestrel_execution::{EntryResult, Order, OrderExecutor};
use kestrel_ledger::{LedgerAction, PositionLedger};
use kestrel_ports::{Alert, AlertKind, AlertSink, AuditEvent, AuditSink, ExchangePort};
use kestrel_risk::{DenyReason, OpenDecision, RiskDecision, RiskSizer};
use kestrel_signal::{Signal, SignalAggregator};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

/// Events routed to a symbol's worker
#[derive(Debug, Clone)]
pub enum SymbolEvent {
    /// A new opinion from some signal source
    Signal(Signal),
    /// Mark price and volatility estimate for an evaluation cycle
    MarkPrice {
        price: Decimal,
        volatility: Decimal,
    },
}

/// Per-symbol actor: owns the symbol's slice of the pipeline
pub struct SymbolWorker<E: ExchangePort> {
    symbol: String,
    use_limit_entries: bool,
    aggregator: SignalAggregator,
    sizer: RiskSizer,
    ledger: PositionLedger,
    executor: OrderExecutor<E>,
    governor: GovernorHandle,
    audit: Arc<dyn AuditSink>,
    alerts: Arc<dyn AlertSink>,
    events: mpsc::Receiver<SymbolEvent>,
    control_rx: broadcast::Receiver<ControlSignal>,
    /// Flipped on halt to cancel an in-flight entry cooperatively
    entry_cancel_tx: watch::Sender<bool>,
    entry_cancel_rx: watch::Receiver<bool>,
    halted: bool,
    /// The one open lot for this symbol, if any
    open_lot: Option<Uuid>,
    last_price: Option<Decimal>,
    last_volatility: Option<Decimal>,
}

impl<E: ExchangePort> SymbolWorker<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        config: &crate::config::EngineConfig,
        exchange: Arc<E>,
        governor: GovernorHandle,
        audit: Arc<dyn AuditSink>,
        alerts: Arc<dyn AlertSink>,
        events: mpsc::Receiver<SymbolEvent>,
        control_rx: broadcast::Receiver<ControlSignal>,
    ) -> Self {
        let (entry_cancel_tx, entry_cancel_rx) = watch::channel(false);
        Self {
            symbol,
            use_limit_entries: config.use_limit_entries,
            aggregator: SignalAggregator::new(config.aggregator.clone()),
            sizer: RiskSizer::new(config.sizer.clone()),
            ledger: PositionLedger::new(config.ledger.clone()),
            executor: OrderExecutor::new(exchange, config.executor.clone()),
            governor,
            audit,
            alerts,
            events,
            control_rx,
            entry_cancel_tx,
            entry_cancel_rx,
            halted: false,
            open_lot: None,
            last_price: None,
            last_volatility: None,
        }
    }

    /// Run until the event channel closes
    pub async fn run(mut self) {
        log::info!("[{}] worker started", self.symbol);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(SymbolEvent::Signal(signal)) => self.handle_signal(signal).await,
                    Some(SymbolEvent::MarkPrice { price, volatility }) => {
                        self.handle_price(price, volatility).await;
                    }
                    None => break,
                },

                control = self.control_rx.recv() => match control {
                    Ok(ControlSignal::Halt(directive)) => {
                        log::warn!(
                            "[{}] halt received ({}): suppressing entries",
                            self.symbol,
                            directive.reason.as_str()
                        );
                        self.halted = true;
                        let _ = self.entry_cancel_tx.send(true);
                        if directive.flatten {
                            if let Some(id) = self.open_lot {
                                self.close_position(id, CloseReason::Halt).await;
                            }
                        }
                    }
                    Ok(ControlSignal::Resume) => {
                        log::info!("[{}] halt lifted, entries re-enabled", self.symbol);
                        self.halted = false;
                        let _ = self.entry_cancel_tx.send(false);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("[{}] lagged {} control signals", self.symbol, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Engine gone; the event channel will close shortly
                    }
                },
            }
        }

        log::info!("[{}] worker stopped", self.symbol);
    }

    async fn handle_signal(&mut self, signal: Signal) {
        if signal.symbol != self.symbol {
            log::debug!(
                "[{}] ignoring misrouted signal for {}",
                self.symbol,
                signal.symbol
            );
            return;
        }
        self.aggregator.update_signal(signal);
        self.try_enter().await;
    }

    async fn handle_price(&mut self, price: Decimal, volatility: Decimal) {
        self.last_price = Some(price);
        self.last_volatility = Some(volatility);
        self.manage_position(price).await;
    }

    /// The decision pipeline: aggregate -> size -> governor -> execute
    async fn try_enter(&mut self) {
        if self.halted {
            log::debug!("[{}] halted, skipping entry evaluation", self.symbol);
            return;
        }
        if self.open_lot.is_some() {
            return;
        }
        let (Some(price), Some(volatility)) = (self.last_price, self.last_volatility) else {
            log::debug!("[{}] no market data yet, cannot evaluate", self.symbol);
            return;
        };

        let Some(aggregated) = self.aggregator.aggregate(&self.symbol) else {
            self.audit_rejection(
                "insufficient_confluence",
                "fewer live sources than required",
            )
            .await;
            return;
        };

        let Some(snapshot) = self.governor.snapshot().await else {
            log::error!("[{}] governor unavailable", self.symbol);
            return;
        };

        let decision = match self.sizer.size(&aggregated, &snapshot, price, volatility) {
            Ok(decision) => decision,
            Err(rejection) => {
                self.audit_rejection(rejection.reason.as_str(), &rejection.detail)
                    .await;
                self.alerts.notify(
                    Alert::info(AlertKind::DecisionRejected, rejection.detail)
                        .with_symbol(&self.symbol),
                );
                return;
            }
        };

        match self.governor.check_can_open(decision.clone()).await {
            OpenDecision::Allowed => self.execute_entry(decision).await,
            OpenDecision::Denied(reason) => {
                let code = match &reason {
                    DenyReason::Halted(halt) => format!("halted_{}", halt.as_str()),
                    DenyReason::ExposureCap { .. } => "exposure_cap".to_string(),
                };
                self.audit_rejection(&code, &reason.detail()).await;
                self.alerts.notify(
                    Alert::warning(AlertKind::DecisionRejected, reason.detail())
                        .with_symbol(&self.symbol),
                );
            }
        }
    }

    async fn execute_entry(&mut self, decision: RiskDecision) {
        self.record(AuditEvent::Decision {
            symbol: decision.symbol.clone(),
            direction: decision.direction,
            size: decision.size,
            entry_price: decision.entry_price,
            stop_price: decision.stop_price,
            target_price: decision.target_price,
            risk_reward_ratio: decision.risk_reward_ratio,
            timestamp: Utc::now(),
        })
        .await;

        let Some(side) = decision.direction.entry_side() else {
            return;
        };
        let limit_price = self.use_limit_entries.then_some(decision.entry_price);

        let result = self
            .executor
            .execute(
                &self.symbol,
                side,
                decision.size,
                limit_price,
                &mut self.entry_cancel_rx,
            )
            .await;

        self.audit_order(&result.primary).await;
        if let Some(fallback) = &result.fallback {
            self.audit_order(fallback).await;
        }
        self.report_execution_trouble(&result).await;

        if result.has_fills() {
            let entry_price = result.avg_fill_price().unwrap_or(decision.entry_price);
            let position = self.ledger.open(
                &self.symbol,
                decision.direction,
                result.total_filled(),
                entry_price,
                decision.stop_price,
                decision.target_price,
                Utc::now(),
            );
            self.open_lot = Some(position.position_id);
            self.record(AuditEvent::PositionOpened {
                position_id: position.position_id,
                symbol: position.symbol.clone(),
                direction: position.direction,
                size: position.size,
                entry_price: position.entry_price,
                stop_price: position.current_stop,
                target_price: position.current_target,
                timestamp: position.opened_at,
            })
            .await;
            self.governor.on_fill(position).await;
        }
    }

    /// Alerts for the ways an execution can go wrong
    async fn report_execution_trouble(&mut self, result: &EntryResult) {
        if result.conflicts > 0 {
            self.alerts.notify(
                Alert::warning(
                    AlertKind::ReconciliationConflict,
                    format!(
                        "{} reconciliation conflict(s) corrected from exchange state",
                        result.conflicts
                    ),
                )
                .with_symbol(&self.symbol),
            );
        }
        if result.retry_exhausted() {
            self.alerts.notify(
                Alert::critical(AlertKind::RetryExhausted, "submission retry budget exhausted")
                    .with_symbol(&self.symbol),
            );
            // The venue is unreachable beyond the retry budget: stand down
            self.governor
                .halt_external(format!("{}: exchange unreachable beyond retry budget", self.symbol))
                .await;
        } else if result.rejected() {
            let reason = result
                .primary
                .last_error
                .clone()
                .unwrap_or_else(|| "rejected".to_string());
            self.alerts.notify(
                Alert::warning(AlertKind::OrderRejected, reason).with_symbol(&self.symbol),
            );
        }
    }

    /// Apply ledger guidance for the open lot at a new mark price
    async fn manage_position(&mut self, price: Decimal) {
        let Some(id) = self.open_lot else {
            return;
        };

        let actions = self.ledger.update(&id, price, Utc::now());
        for action in actions {
            match action {
                LedgerAction::StopRatcheted { from, to, .. } => {
                    self.record_adjustment(id, "stop", from, to).await;
                }
                LedgerAction::TargetTrailed { from, to, .. } => {
                    self.record_adjustment(id, "target", from, to).await;
                }
                LedgerAction::PartialExit { quantity, .. } => {
                    self.partial_exit(id, quantity).await;
                }
                LedgerAction::Exit { reason, .. } => {
                    self.close_position(id, reason).await;
                    break;
                }
            }
        }
    }

    /// Reduce the lot by `quantity` at market; remainder's stop goes to
    /// breakeven inside the ledger
    async fn partial_exit(&mut self, id: Uuid, quantity: Decimal) {
        let Some(side) = self
            .ledger
            .position(&id)
            .and_then(|p| p.direction.exit_side())
        else {
            return;
        };

        let Some(result) = self.execute_exit(side, quantity).await else {
            return;
        };

        let fill_price = result
            .avg_fill_price()
            .or(self.last_price)
            .unwrap_or(Decimal::ZERO);
        if let Some(closed) =
            self.ledger
                .partial_close(&id, result.total_filled(), fill_price, Utc::now())
        {
            self.record(AuditEvent::PositionClosed {
                position_id: closed.position_id,
                symbol: closed.symbol.clone(),
                quantity: closed.quantity,
                exit_price: closed.exit_price,
                pnl: closed.pnl,
                reason: closed.reason,
                timestamp: closed.closed_at,
            })
            .await;
            self.alerts.notify(
                Alert::info(
                    AlertKind::PositionClosed,
                    format!("partial exit {} @ {} (pnl {})", closed.quantity, closed.exit_price, closed.pnl),
                )
                .with_symbol(&self.symbol),
            );
            self.governor.on_close(closed).await;
        }

        if self.ledger.position(&id).is_none() {
            self.open_lot = None;
        }
    }

    /// Close the whole remaining lot at market
    async fn close_position(&mut self, id: Uuid, reason: CloseReason) {
        let Some((side, size)) = self
            .ledger
            .position(&id)
            .and_then(|p| p.direction.exit_side().map(|s| (s, p.size)))
        else {
            return;
        };

        let Some(result) = self.execute_exit(side, size).await else {
            // The lot stays open; the next mark price will try again
            return;
        };

        let fill_price = result
            .avg_fill_price()
            .or(self.last_price)
            .unwrap_or(Decimal::ZERO);
        if let Some(closed) = self.ledger.close(&id, fill_price, reason, Utc::now()) {
            self.record(AuditEvent::PositionClosed {
                position_id: closed.position_id,
                symbol: closed.symbol.clone(),
                quantity: closed.quantity,
                exit_price: closed.exit_price,
                pnl: closed.pnl,
                reason: closed.reason,
                timestamp: closed.closed_at,
            })
            .await;
            self.alerts.notify(
                Alert::info(
                    AlertKind::PositionClosed,
                    format!(
                        "closed {} @ {} ({}, pnl {})",
                        closed.quantity,
                        closed.exit_price,
                        closed.reason.as_str(),
                        closed.pnl
                    ),
                )
                .with_symbol(&self.symbol),
            );
            self.governor.on_close(closed).await;
        }
        self.open_lot = None;
    }

    /// Run a market exit. Exits are allowed during halts, so they get their
    /// own (never-flipped) cancel flag instead of the entry one.
    async fn execute_exit(&mut self, side: kestrel_core::Side, quantity: Decimal) -> Option<EntryResult> {
        let (_exit_cancel_tx, mut exit_cancel_rx) = watch::channel(false);
        let result = self
            .executor
            .execute(&self.symbol, side, quantity, None, &mut exit_cancel_rx)
            .await;

        self.audit_order(&result.primary).await;
        if !result.has_fills() {
            log::error!(
                "[{}] failed to execute exit of {} units",
                self.symbol,
                quantity
            );
            self.alerts.notify(
                Alert::critical(
                    AlertKind::SystemError,
                    format!("unable to reduce position by {} units", quantity),
                )
                .with_symbol(&self.symbol),
            );
            return None;
        }
        Some(result)
    }

    async fn record_adjustment(&mut self, id: Uuid, field: &str, from: Decimal, to: Decimal) {
        self.record(AuditEvent::PositionAdjusted {
            position_id: id,
            symbol: self.symbol.clone(),
            field: field.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn audit_rejection(&mut self, reason: &str, detail: &str) {
        log::info!("[{}] decision rejected ({}): {}", self.symbol, reason, detail);
        self.record(AuditEvent::DecisionRejected {
            symbol: self.symbol.clone(),
            reason: reason.to_string(),
            detail: detail.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn audit_order(&mut self, order: &Order) {
        self.record(AuditEvent::OrderTransition {
            client_key: order.client_key.clone(),
            symbol: order.symbol.clone(),
            state: order.state.as_str().to_string(),
            filled_size: order.filled_size,
            avg_fill_price: order.avg_fill_price,
            detail: order.last_error.clone(),
            timestamp: Utc::now(),
        })
        .await;
    }

    /// Journal an event; a failing journal is a system-serious condition and
    /// escalates to a halt rather than degrading silently
    async fn record(&mut self, event: AuditEvent) {
        if let Err(err) = self.audit.record(event).await {
            log::error!("[{}] audit journal failure: {}", self.symbol, err);
            self.alerts.notify(
                Alert::critical(AlertKind::SystemError, format!("audit journal failure: {}", err))
                    .with_symbol(&self.symbol),
            );
            self.governor
                .halt_external("audit journal unavailable")
                .await;
        }
    }
}
