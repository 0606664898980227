//! Portfolio Risk Governor
//!
//! Owns the single authoritative [`PortfolioState`] and enforces the
//! cross-position rules: exposure caps at entry, and halt conditions (daily
//! loss, loss streak, drawdown) evaluated after every state mutation.
//!
//! A halt suppresses new entries only - existing positions may still be
//! closed. Halts never lift on their own: only `reset_day` (new trading day)
//! or `lift_halt` (manual override) clear them, so a breached limit cannot
//! flap back to trading by the mere passage of time.
//!
//! This type is not synchronized. The engine wraps it in a single task
//! consuming a command queue, which is what makes every exposure and halt
//! check observe a consistent state.

use crate::sizer::{AccountSnapshot, RiskDecision};
use chrono::{DateTime, Utc};
use kestrel_core::{ClosedPosition, Position};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Portfolio-level limits, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Daily realized loss halting trading, as a fraction of start-of-day equity
    pub max_daily_loss_frac: Decimal,
    /// Consecutive losing closes halting trading
    pub max_consecutive_losses: u32,
    /// Drawdown from peak equity halting trading
    pub max_drawdown_frac: Decimal,
    /// Cap on total open notional as a fraction of equity
    pub max_exposure_frac: Decimal,
    /// Whether a halt also demands flattening open positions
    pub flatten_on_halt: bool,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_frac: dec!(0.05),
            max_consecutive_losses: 5,
            max_drawdown_frac: dec!(0.20),
            max_exposure_frac: dec!(0.5),
            flatten_on_halt: false,
        }
    }
}

/// Why trading was halted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    DailyLoss,
    ConsecutiveLosses,
    Drawdown,
    /// Escalated from outside (audit sink down, exchange unreachable, operator)
    External,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::DailyLoss => "daily_loss",
            HaltReason::ConsecutiveLosses => "consecutive_losses",
            HaltReason::Drawdown => "drawdown",
            HaltReason::External => "external",
        }
    }
}

/// The control signal a halt produces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltDirective {
    pub reason: HaltReason,
    pub message: String,
    /// Whether open positions should be force-closed
    pub flatten: bool,
    pub at: DateTime<Utc>,
}

/// Outcome of an entry check
#[derive(Debug, Clone)]
pub enum OpenDecision {
    Allowed,
    Denied(DenyReason),
}

impl OpenDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, OpenDecision::Allowed)
    }
}

/// Why an entry was denied
#[derive(Debug, Clone)]
pub enum DenyReason {
    Halted(HaltReason),
    ExposureCap {
        open_notional: Decimal,
        requested: Decimal,
        cap: Decimal,
    },
}

impl DenyReason {
    pub fn detail(&self) -> String {
        match self {
            DenyReason::Halted(reason) => format!("trading halted: {}", reason.as_str()),
            DenyReason::ExposureCap {
                open_notional,
                requested,
                cap,
            } => format!(
                "open notional {} + requested {} exceeds cap {}",
                open_notional, requested, cap
            ),
        }
    }
}

/// The process-wide account and position state
#[derive(Debug, Clone)]
pub struct PortfolioState {
    pub equity: Decimal,
    pub start_of_day_equity: Decimal,
    pub peak_equity: Decimal,
    pub realized_pnl_today: Decimal,
    pub consecutive_losses: u32,
    /// Open lots, keyed by position id
    pub open_positions: HashMap<Uuid, Position>,
    pub halt: Option<HaltDirective>,
    // Running trade statistics
    pub trades: u32,
    pub wins: u32,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
}

impl PortfolioState {
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            equity: initial_equity,
            start_of_day_equity: initial_equity,
            peak_equity: initial_equity,
            realized_pnl_today: Decimal::ZERO,
            consecutive_losses: 0,
            open_positions: HashMap::new(),
            halt: None,
            trades: 0,
            wins: 0,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
        }
    }

    /// Total entry notional across open lots
    pub fn open_notional(&self) -> Decimal {
        self.open_positions.values().map(|p| p.notional()).sum()
    }

    /// Current decline from peak equity (>= 0)
    pub fn drawdown_frac(&self) -> Decimal {
        if self.peak_equity > Decimal::ZERO {
            ((self.peak_equity - self.equity) / self.peak_equity).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_some()
    }
}

/// Read-only performance summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub equity: Decimal,
    pub realized_pnl_today: Decimal,
    pub drawdown_frac: Decimal,
    pub open_positions: usize,
    pub trades: u32,
    pub wins: u32,
    pub win_rate: Decimal,
    pub profit_factor: Option<Decimal>,
}

/// Enforces portfolio limits; the only writer of [`PortfolioState`]
pub struct PortfolioRiskGovernor {
    config: GovernorConfig,
    state: PortfolioState,
}

impl PortfolioRiskGovernor {
    pub fn new(config: GovernorConfig, initial_equity: Decimal) -> Self {
        Self {
            config,
            state: PortfolioState::new(initial_equity),
        }
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    /// Snapshot for the sizer
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            equity: self.state.equity,
            consecutive_losses: self.state.consecutive_losses,
            open_notional: self.state.open_notional(),
        }
    }

    /// May this candidate be entered right now?
    pub fn check_can_open(&self, candidate: &RiskDecision) -> OpenDecision {
        if let Some(halt) = &self.state.halt {
            return OpenDecision::Denied(DenyReason::Halted(halt.reason));
        }

        let cap = self.state.equity * self.config.max_exposure_frac;
        let open_notional = self.state.open_notional();
        let requested = candidate.notional();
        if open_notional + requested > cap {
            return OpenDecision::Denied(DenyReason::ExposureCap {
                open_notional,
                requested,
                cap,
            });
        }

        OpenDecision::Allowed
    }

    /// Register a newly opened (or refreshed) lot
    pub fn on_fill(&mut self, position: &Position) -> Option<HaltDirective> {
        self.state
            .open_positions
            .insert(position.position_id, position.clone());
        self.evaluate_halts()
    }

    /// Apply a close (full or partial): realize PnL, update streaks and peaks
    pub fn on_close(&mut self, closed: &ClosedPosition) -> Option<HaltDirective> {
        self.state.realized_pnl_today += closed.pnl;
        self.state.equity += closed.pnl;
        if self.state.equity > self.state.peak_equity {
            self.state.peak_equity = self.state.equity;
        }

        self.state.trades += 1;
        if closed.is_loss() {
            self.state.consecutive_losses += 1;
            self.state.gross_loss += closed.pnl.abs();
        } else {
            self.state.consecutive_losses = 0;
            self.state.wins += 1;
            self.state.gross_profit += closed.pnl;
        }

        // Shrink or drop the tracked lot
        let mut remove = false;
        if let Some(open) = self.state.open_positions.get_mut(&closed.position_id) {
            open.size -= closed.quantity;
            if open.size <= Decimal::ZERO {
                remove = true;
            }
        }
        if remove {
            self.state.open_positions.remove(&closed.position_id);
        }

        self.evaluate_halts()
    }

    /// Check halt conditions; called after every mutation. Returns a
    /// directive only on the transition into the halted state.
    pub fn evaluate_halts(&mut self) -> Option<HaltDirective> {
        if self.state.halt.is_some() {
            return None;
        }

        let daily_loss_limit = self.state.start_of_day_equity * self.config.max_daily_loss_frac;
        if self.state.realized_pnl_today < -daily_loss_limit {
            return Some(self.enter_halt(
                HaltReason::DailyLoss,
                format!(
                    "daily realized loss {} beyond limit {}",
                    self.state.realized_pnl_today, daily_loss_limit
                ),
            ));
        }

        if self.state.consecutive_losses > self.config.max_consecutive_losses {
            return Some(self.enter_halt(
                HaltReason::ConsecutiveLosses,
                format!(
                    "{} consecutive losing trades beyond limit {}",
                    self.state.consecutive_losses, self.config.max_consecutive_losses
                ),
            ));
        }

        let drawdown = self.state.drawdown_frac();
        if drawdown > self.config.max_drawdown_frac {
            return Some(self.enter_halt(
                HaltReason::Drawdown,
                format!(
                    "drawdown {:.2}% beyond limit {:.2}%",
                    drawdown * dec!(100),
                    self.config.max_drawdown_frac * dec!(100)
                ),
            ));
        }

        None
    }

    /// Halt for a reason the governor cannot see itself (persistence down,
    /// exchange unreachable, operator command)
    pub fn halt_external(&mut self, message: impl Into<String>) -> HaltDirective {
        self.enter_halt(HaltReason::External, message.into())
    }

    fn enter_halt(&mut self, reason: HaltReason, message: String) -> HaltDirective {
        log::error!("[GOVERNOR] trading halted ({}): {}", reason.as_str(), message);
        let directive = HaltDirective {
            reason,
            message,
            flatten: self.config.flatten_on_halt,
            at: Utc::now(),
        };
        self.state.halt = Some(directive.clone());
        directive
    }

    /// Manual override: lift any halt
    pub fn lift_halt(&mut self) {
        if self.state.halt.take().is_some() {
            log::info!("[GOVERNOR] halt lifted by override");
        }
    }

    /// New trading day: reset daily counters; lifts a daily-loss halt but not
    /// streak or drawdown halts, which need an explicit override
    pub fn reset_day(&mut self) {
        log::info!(
            "[GOVERNOR] daily reset: realized pnl was {}",
            self.state.realized_pnl_today
        );
        self.state.realized_pnl_today = Decimal::ZERO;
        self.state.start_of_day_equity = self.state.equity;

        if matches!(
            self.state.halt,
            Some(HaltDirective {
                reason: HaltReason::DailyLoss,
                ..
            })
        ) {
            self.state.halt = None;
            log::info!("[GOVERNOR] daily-loss halt lifted by daily reset");
        }
    }

    pub fn metrics(&self) -> PortfolioMetrics {
        let win_rate = if self.state.trades > 0 {
            Decimal::from(self.state.wins) / Decimal::from(self.state.trades)
        } else {
            Decimal::ZERO
        };
        let profit_factor = if self.state.gross_loss > Decimal::ZERO {
            Some(self.state.gross_profit / self.state.gross_loss)
        } else {
            None
        };

        PortfolioMetrics {
            equity: self.state.equity,
            realized_pnl_today: self.state.realized_pnl_today,
            drawdown_frac: self.state.drawdown_frac(),
            open_positions: self.state.open_positions.len(),
            trades: self.state.trades,
            wins: self.state.wins,
            win_rate,
            profit_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::{CloseReason, Direction};

    fn decision(size: Decimal, entry: Decimal) -> RiskDecision {
        RiskDecision {
            symbol: "XMR-USDT".to_string(),
            direction: Direction::Long,
            size,
            entry_price: entry,
            stop_price: entry - dec!(5),
            target_price: entry + dec!(10),
            risk_amount: size * dec!(5),
            risk_reward_ratio: dec!(2),
        }
    }

    fn open_lot(size: Decimal, entry: Decimal) -> Position {
        Position::new(
            "XMR-USDT",
            Direction::Long,
            size,
            entry,
            entry - dec!(5),
            entry + dec!(10),
            Utc::now(),
        )
    }

    fn losing_close(position_id: Uuid, quantity: Decimal, pnl: Decimal) -> ClosedPosition {
        ClosedPosition {
            position_id,
            symbol: "XMR-USDT".to_string(),
            direction: Direction::Long,
            quantity,
            entry_price: dec!(100),
            exit_price: dec!(95),
            pnl,
            return_frac: pnl / (quantity * dec!(100)),
            opened_at: Utc::now(),
            closed_at: Utc::now(),
            reason: CloseReason::StopLoss,
        }
    }

    #[test]
    fn test_allows_within_limits() {
        let governor = PortfolioRiskGovernor::new(GovernorConfig::default(), dec!(10000));
        assert!(governor.check_can_open(&decision(dec!(10), dec!(100))).is_allowed());
    }

    #[test]
    fn test_denies_over_exposure_cap() {
        let mut governor = PortfolioRiskGovernor::new(GovernorConfig::default(), dec!(10000));
        governor.on_fill(&open_lot(dec!(45), dec!(100))); // 4500 open

        let decision = decision(dec!(10), dec!(100)); // +1000 > 5000 cap
        match governor.check_can_open(&decision) {
            OpenDecision::Denied(DenyReason::ExposureCap { .. }) => {}
            other => panic!("expected exposure denial, got {:?}", other),
        }
    }

    #[test]
    fn test_consecutive_losses_halt_then_deny() {
        let config = GovernorConfig {
            max_consecutive_losses: 3,
            // Loss amounts here would also trip the daily limit; widen it so
            // the streak is what halts
            max_daily_loss_frac: dec!(1.0),
            ..Default::default()
        };
        let mut governor = PortfolioRiskGovernor::new(config, dec!(10000));

        let lot = open_lot(dec!(100), dec!(100));
        governor.on_fill(&lot);

        let mut directive = None;
        for _ in 0..4 {
            directive = governor.on_close(&losing_close(lot.position_id, dec!(1), dec!(-10)));
        }

        let directive = directive.expect("fourth straight loss should halt");
        assert_eq!(directive.reason, HaltReason::ConsecutiveLosses);
        assert!(governor.state().is_halted());

        match governor.check_can_open(&decision(dec!(1), dec!(100))) {
            OpenDecision::Denied(DenyReason::Halted(HaltReason::ConsecutiveLosses)) => {}
            other => panic!("expected halt denial, got {:?}", other),
        }
    }

    #[test]
    fn test_daily_loss_halt() {
        let mut governor = PortfolioRiskGovernor::new(GovernorConfig::default(), dec!(10000));
        let lot = open_lot(dec!(100), dec!(100));
        governor.on_fill(&lot);

        // 5% of 10000 = 500; a 600 loss breaches
        let directive = governor.on_close(&losing_close(lot.position_id, dec!(10), dec!(-600)));
        assert_eq!(directive.expect("halt").reason, HaltReason::DailyLoss);
    }

    #[test]
    fn test_drawdown_halt() {
        let config = GovernorConfig {
            max_daily_loss_frac: dec!(1.0), // keep daily limit out of the way
            max_consecutive_losses: 100,
            ..Default::default()
        };
        let mut governor = PortfolioRiskGovernor::new(config, dec!(10000));
        let lot = open_lot(dec!(100), dec!(100));
        governor.on_fill(&lot);

        // Lose 21% of peak equity
        let directive = governor.on_close(&losing_close(lot.position_id, dec!(50), dec!(-2100)));
        assert_eq!(directive.expect("halt").reason, HaltReason::Drawdown);
    }

    #[test]
    fn test_reset_day_lifts_daily_halt_only() {
        let mut governor = PortfolioRiskGovernor::new(GovernorConfig::default(), dec!(10000));
        let lot = open_lot(dec!(100), dec!(100));
        governor.on_fill(&lot);
        governor.on_close(&losing_close(lot.position_id, dec!(10), dec!(-600)));
        assert!(governor.state().is_halted());

        governor.reset_day();
        assert!(!governor.state().is_halted());
        assert_eq!(governor.state().realized_pnl_today, Decimal::ZERO);
    }

    #[test]
    fn test_external_halt_needs_override() {
        let mut governor = PortfolioRiskGovernor::new(GovernorConfig::default(), dec!(10000));
        governor.halt_external("audit journal unavailable");
        assert!(governor.state().is_halted());

        governor.reset_day();
        assert!(governor.state().is_halted()); // daily reset does not clear it

        governor.lift_halt();
        assert!(!governor.state().is_halted());
    }

    #[test]
    fn test_winner_resets_streak() {
        let config = GovernorConfig {
            max_daily_loss_frac: dec!(1.0),
            ..Default::default()
        };
        let mut governor = PortfolioRiskGovernor::new(config, dec!(10000));
        let lot = open_lot(dec!(100), dec!(100));
        governor.on_fill(&lot);

        governor.on_close(&losing_close(lot.position_id, dec!(1), dec!(-10)));
        governor.on_close(&losing_close(lot.position_id, dec!(1), dec!(-10)));
        assert_eq!(governor.state().consecutive_losses, 2);

        let mut win = losing_close(lot.position_id, dec!(1), dec!(25));
        win.reason = CloseReason::Target;
        governor.on_close(&win);
        assert_eq!(governor.state().consecutive_losses, 0);
    }

    #[test]
    fn test_metrics_track_closes() {
        let config = GovernorConfig {
            max_daily_loss_frac: dec!(1.0),
            ..Default::default()
        };
        let mut governor = PortfolioRiskGovernor::new(config, dec!(10000));
        let lot = open_lot(dec!(100), dec!(100));
        governor.on_fill(&lot);

        governor.on_close(&losing_close(lot.position_id, dec!(1), dec!(-50)));
        let mut win = losing_close(lot.position_id, dec!(1), dec!(100));
        win.reason = CloseReason::Target;
        governor.on_close(&win);

        let metrics = governor.metrics();
        assert_eq!(metrics.trades, 2);
        assert_eq!(metrics.wins, 1);
        assert_eq!(metrics.win_rate, dec!(0.5));
        assert_eq!(metrics.profit_factor, Some(dec!(2)));
        assert_eq!(metrics.realized_pnl_today, dec!(50));
    }

    #[test]
    fn test_closing_removes_exhausted_lot() {
        let mut governor = PortfolioRiskGovernor::new(GovernorConfig::default(), dec!(10000));
        let lot = open_lot(dec!(10), dec!(100));
        governor.on_fill(&lot);
        assert_eq!(governor.state().open_notional(), dec!(1000));

        let mut close = losing_close(lot.position_id, dec!(10), dec!(50));
        close.reason = CloseReason::Target;
        governor.on_close(&close);
        assert_eq!(governor.state().open_positions.len(), 0);
        assert_eq!(governor.state().open_notional(), dec!(0));
    }
}
