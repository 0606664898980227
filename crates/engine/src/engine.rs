//! Engine - spawns and routes
//!
//! Owns the routing table from symbol to worker queue (a `DashMap`, so
//! ingestion for different symbols never contends), the governor task, and
//! the worker join handles. Hosts push signals and mark prices in; the
//! pipeline does the rest.

use crate::config::EngineConfig;
use crate::governor_task::{spawn_governor, ControlSignal, GovernorHandle};
use crate::worker::{SymbolEvent, SymbolWorker};
use dashmap::DashMap;
use kestrel_ports::{AlertSink, AuditSink, ExchangePort};
use kestrel_risk::PortfolioRiskGovernor;
use kestrel_signal::Signal;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// A running engine
pub struct Engine {
    routes: Arc<DashMap<String, mpsc::Sender<SymbolEvent>>>,
    governor: GovernorHandle,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Wire everything up and start the governor and one worker per symbol
    pub fn start<E: ExchangePort + 'static>(
        config: EngineConfig,
        exchange: Arc<E>,
        audit: Arc<dyn AuditSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let (control_tx, _) = broadcast::channel::<ControlSignal>(64);

        let governor = spawn_governor(
            PortfolioRiskGovernor::new(config.governor.clone(), config.initial_equity),
            audit.clone(),
            alerts.clone(),
            control_tx.clone(),
            config.channel_capacity,
        );

        let routes = Arc::new(DashMap::new());
        let mut workers = Vec::with_capacity(config.symbols.len());

        for symbol in &config.symbols {
            let (tx, rx) = mpsc::channel(config.channel_capacity);
            routes.insert(symbol.clone(), tx);

            let worker = SymbolWorker::new(
                symbol.clone(),
                &config,
                exchange.clone(),
                governor.clone(),
                audit.clone(),
                alerts.clone(),
                rx,
                control_tx.subscribe(),
            );
            workers.push(tokio::spawn(worker.run()));
        }

        log::info!(
            "[ENGINE] started with {} symbol worker(s)",
            config.symbols.len()
        );

        Self {
            routes,
            governor,
            workers,
        }
    }

    /// Route a signal to its symbol's worker. Returns false for unknown
    /// symbols or a stopped worker.
    pub async fn submit_signal(&self, signal: Signal) -> bool {
        let Some(tx) = self.routes.get(&signal.symbol).map(|e| e.value().clone()) else {
            log::warn!("[ENGINE] no worker for symbol {}", signal.symbol);
            return false;
        };
        tx.send(SymbolEvent::Signal(signal)).await.is_ok()
    }

    /// Route a mark price / volatility estimate to its symbol's worker
    pub async fn mark_price(&self, symbol: &str, price: Decimal, volatility: Decimal) -> bool {
        let Some(tx) = self.routes.get(symbol).map(|e| e.value().clone()) else {
            log::warn!("[ENGINE] no worker for symbol {}", symbol);
            return false;
        };
        tx.send(SymbolEvent::MarkPrice { price, volatility })
            .await
            .is_ok()
    }

    /// Handle for governor operations (daily reset, manual override, metrics)
    pub fn governor(&self) -> &GovernorHandle {
        &self.governor
    }

    /// Close the event queues and wait for workers to drain and stop
    pub async fn shutdown(mut self) {
        self.routes.clear();
        for worker in self.workers.drain(..) {
            if let Err(err) = worker.await {
                log::error!("[ENGINE] worker task failed: {}", err);
            }
        }
        log::info!("[ENGINE] stopped");
    }
}
