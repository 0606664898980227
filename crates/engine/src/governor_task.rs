//! Governor task - the single writer of portfolio state
//!
//! Every exposure check, fill, and close from every symbol worker flows
//! through one mpsc queue into this task, which owns the
//! [`PortfolioRiskGovernor`] outright. That queue IS the serialization: no
//! lock, no racing writers, and every halt evaluation sees a consistent
//! state. Halt transitions fan back out to workers over a broadcast channel.

use kestrel_core::{ClosedPosition, Position};
use kestrel_ports::{Alert, AlertKind, AlertSink, AuditEvent, AuditSink};
use kestrel_risk::{
    AccountSnapshot, DenyReason, HaltDirective, HaltReason, OpenDecision, PortfolioMetrics,
    PortfolioRiskGovernor, RiskDecision,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Control signals fanned out to symbol workers
#[derive(Debug, Clone)]
pub enum ControlSignal {
    Halt(HaltDirective),
    /// A halt was lifted (daily reset or manual override)
    Resume,
}

/// Commands accepted by the governor task
pub enum GovernorCommand {
    CheckCanOpen {
        decision: RiskDecision,
        reply: oneshot::Sender<OpenDecision>,
    },
    Snapshot {
        reply: oneshot::Sender<AccountSnapshot>,
    },
    OnFill {
        position: Position,
    },
    OnClose {
        closed: ClosedPosition,
    },
    HaltExternal {
        message: String,
    },
    LiftHalt,
    ResetDay,
    IsHalted {
        reply: oneshot::Sender<bool>,
    },
    Metrics {
        reply: oneshot::Sender<PortfolioMetrics>,
    },
}

/// Cheap, clonable handle workers use to talk to the governor task
#[derive(Clone)]
pub struct GovernorHandle {
    tx: mpsc::Sender<GovernorCommand>,
}

impl GovernorHandle {
    /// Ask permission to open. A dead governor denies - fail safe.
    pub async fn check_can_open(&self, decision: RiskDecision) -> OpenDecision {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(GovernorCommand::CheckCanOpen { decision, reply })
            .await
            .is_err()
        {
            return OpenDecision::Denied(DenyReason::Halted(HaltReason::External));
        }
        rx.await
            .unwrap_or(OpenDecision::Denied(DenyReason::Halted(HaltReason::External)))
    }

    pub async fn snapshot(&self) -> Option<AccountSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(GovernorCommand::Snapshot { reply })
            .await
            .ok()?;
        rx.await.ok()
    }

    pub async fn on_fill(&self, position: Position) {
        let _ = self.tx.send(GovernorCommand::OnFill { position }).await;
    }

    pub async fn on_close(&self, closed: ClosedPosition) {
        let _ = self.tx.send(GovernorCommand::OnClose { closed }).await;
    }

    /// Escalate a system-serious failure into a halt
    pub async fn halt_external(&self, message: impl Into<String>) {
        let _ = self
            .tx
            .send(GovernorCommand::HaltExternal {
                message: message.into(),
            })
            .await;
    }

    /// Manual override: lift any halt
    pub async fn lift_halt(&self) {
        let _ = self.tx.send(GovernorCommand::LiftHalt).await;
    }

    /// New trading day: reset daily counters, lift daily-scoped halts
    pub async fn reset_day(&self) {
        let _ = self.tx.send(GovernorCommand::ResetDay).await;
    }

    pub async fn is_halted(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(GovernorCommand::IsHalted { reply })
            .await
            .is_err()
        {
            return true;
        }
        rx.await.unwrap_or(true)
    }

    pub async fn metrics(&self) -> Option<PortfolioMetrics> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(GovernorCommand::Metrics { reply }).await.ok()?;
        rx.await.ok()
    }
}

/// Spawn the governor task. Returns the command handle; halt/resume signals
/// go out on `control_tx`.
pub fn spawn_governor(
    mut governor: PortfolioRiskGovernor,
    audit: Arc<dyn AuditSink>,
    alerts: Arc<dyn AlertSink>,
    control_tx: broadcast::Sender<ControlSignal>,
    capacity: usize,
) -> GovernorHandle {
    let (tx, mut rx) = mpsc::channel::<GovernorCommand>(capacity);

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let mut new_halt: Option<HaltDirective> = None;

            match command {
                GovernorCommand::CheckCanOpen { decision, reply } => {
                    let _ = reply.send(governor.check_can_open(&decision));
                }
                GovernorCommand::Snapshot { reply } => {
                    let _ = reply.send(governor.snapshot());
                }
                GovernorCommand::OnFill { position } => {
                    new_halt = governor.on_fill(&position);
                }
                GovernorCommand::OnClose { closed } => {
                    new_halt = governor.on_close(&closed);
                }
                GovernorCommand::HaltExternal { message } => {
                    if !governor.state().is_halted() {
                        new_halt = Some(governor.halt_external(message));
                    }
                }
                GovernorCommand::LiftHalt => {
                    if governor.state().is_halted() {
                        governor.lift_halt();
                        announce_resume(&governor, &audit, &control_tx).await;
                    }
                }
                GovernorCommand::ResetDay => {
                    let was_halted = governor.state().is_halted();
                    governor.reset_day();
                    if was_halted && !governor.state().is_halted() {
                        announce_resume(&governor, &audit, &control_tx).await;
                    }
                }
                GovernorCommand::IsHalted { reply } => {
                    let _ = reply.send(governor.state().is_halted());
                }
                GovernorCommand::Metrics { reply } => {
                    let _ = reply.send(governor.metrics());
                }
            }

            if let Some(directive) = new_halt {
                alerts.notify(
                    Alert::critical(AlertKind::Halt, directive.message.clone()),
                );
                if let Err(err) = audit
                    .record(AuditEvent::Halt {
                        reason: directive.reason.as_str().to_string(),
                        message: directive.message.clone(),
                        timestamp: directive.at,
                    })
                    .await
                {
                    // The journal is down while we are halting anyway; all
                    // that is left is to say so loudly
                    log::error!("[GOVERNOR] failed to journal halt: {}", err);
                }
                let _ = control_tx.send(ControlSignal::Halt(directive));
            }
        }

        log::info!("[GOVERNOR] command channel closed, task exiting");
    });

    GovernorHandle { tx }
}

async fn announce_resume(
    governor: &PortfolioRiskGovernor,
    audit: &Arc<dyn AuditSink>,
    control_tx: &broadcast::Sender<ControlSignal>,
) {
    debug_assert!(!governor.state().is_halted());
    if let Err(err) = audit
        .record(AuditEvent::HaltLifted {
            timestamp: Utc::now(),
        })
        .await
    {
        log::error!("[GOVERNOR] failed to journal halt lift: {}", err);
    }
    let _ = control_tx.send(ControlSignal::Resume);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{LogAlertSink, MemoryAuditSink};
    use kestrel_core::{CloseReason, Direction};
    use kestrel_risk::GovernorConfig;
    use rust_decimal_macros::dec;

    fn spawn_default() -> (GovernorHandle, broadcast::Receiver<ControlSignal>) {
        let (control_tx, control_rx) = broadcast::channel(16);
        let governor = PortfolioRiskGovernor::new(
            GovernorConfig {
                max_daily_loss_frac: dec!(0.05),
                ..Default::default()
            },
            dec!(10000),
        );
        let handle = spawn_governor(
            governor,
            Arc::new(MemoryAuditSink::new()),
            Arc::new(LogAlertSink),
            control_tx,
            64,
        );
        (handle, control_rx)
    }

    fn losing_close(pnl: rust_decimal::Decimal) -> ClosedPosition {
        ClosedPosition {
            position_id: uuid::Uuid::new_v4(),
            symbol: "XMR-USDT".to_string(),
            direction: Direction::Long,
            quantity: dec!(1),
            entry_price: dec!(100),
            exit_price: dec!(90),
            pnl,
            return_frac: dec!(-0.1),
            opened_at: Utc::now(),
            closed_at: Utc::now(),
            reason: CloseReason::StopLoss,
        }
    }

    #[tokio::test]
    async fn test_serialized_close_triggers_halt_broadcast() {
        let (handle, mut control_rx) = spawn_default();

        handle.on_close(losing_close(dec!(-600))).await;

        match control_rx.recv().await.expect("control signal") {
            ControlSignal::Halt(directive) => {
                assert_eq!(directive.reason, kestrel_risk::HaltReason::DailyLoss);
            }
            other => panic!("expected halt, got {:?}", other),
        }
        assert!(handle.is_halted().await);
    }

    #[tokio::test]
    async fn test_reset_day_broadcasts_resume() {
        let (handle, mut control_rx) = spawn_default();

        handle.on_close(losing_close(dec!(-600))).await;
        assert!(matches!(
            control_rx.recv().await,
            Ok(ControlSignal::Halt(_))
        ));

        handle.reset_day().await;
        assert!(matches!(control_rx.recv().await, Ok(ControlSignal::Resume)));
        assert!(!handle.is_halted().await);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_fills() {
        let (handle, _control_rx) = spawn_default();

        let position = Position::new(
            "XMR-USDT",
            Direction::Long,
            dec!(10),
            dec!(100),
            dec!(95),
            dec!(110),
            Utc::now(),
        );
        handle.on_fill(position).await;

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.open_notional, dec!(1000));
        assert_eq!(snapshot.equity, dec!(10000));
    }
}
