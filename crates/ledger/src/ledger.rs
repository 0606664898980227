//! Position ledger
//!
//! Lifecycle rules, applied on every mark price:
//!
//! - **Stop / target hits** emit a full exit instruction.
//! - **Trailing stop**: once unrealized profit clears the activation
//!   threshold, the stop ratchets along at the entry stop-distance - up for
//!   longs, down for shorts, never the other way.
//! - **Target trailing** (optional): in trend regimes the target may move
//!   away from entry with price, never back toward it.
//! - **Partial profit-take**: the first time price crosses the configured
//!   fraction of the entry-to-target distance, a slice of the position is
//!   closed and the remainder's stop moves to breakeven. Once per lot.
//! - **Time stop**: a lot that never moved favorably enough within the
//!   holding window is closed out rather than left to drift.
//!
//! A lot's size only decreases. Adding exposure is a new lot.

use chrono::{DateTime, Duration, Utc};
use kestrel_core::{ClosedPosition, CloseReason, Direction, Position};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Position management policy, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Unrealized profit (as a fraction of entry) before the stop trails
    pub trail_activation_frac: Decimal,
    /// Whether the target trails in strong trends
    pub trail_target: bool,
    /// Holding window for the time stop, in seconds
    pub time_stop_secs: i64,
    /// Favorable excursion required within the window, as a fraction of the
    /// stop distance
    pub min_favorable_frac: Decimal,
    /// Take partial profit at this fraction of the entry-to-target distance
    pub partial_take_frac: Decimal,
    /// Fraction of size to close at the partial take
    pub partial_take_size_frac: Decimal,
    /// Whether partial profit-taking is enabled at all
    pub partial_take_enabled: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            trail_activation_frac: dec!(0.02),
            trail_target: false,
            time_stop_secs: 48 * 3600,
            min_favorable_frac: dec!(0.5),
            partial_take_frac: dec!(0.5),
            partial_take_size_frac: dec!(0.5),
            partial_take_enabled: true,
        }
    }
}

/// What a position wants done, decided on each price update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerAction {
    /// The stop ratcheted in the position's favor
    StopRatcheted {
        position_id: Uuid,
        from: Decimal,
        to: Decimal,
    },
    /// The target trailed away from entry
    TargetTrailed {
        position_id: Uuid,
        from: Decimal,
        to: Decimal,
    },
    /// Close this quantity and move the remainder's stop to breakeven
    PartialExit {
        position_id: Uuid,
        quantity: Decimal,
    },
    /// Close the whole lot
    Exit {
        position_id: Uuid,
        reason: CloseReason,
    },
}

/// Tracks open lots and their stop/target/exit lifecycle
pub struct PositionLedger {
    config: LedgerConfig,
    positions: HashMap<Uuid, Position>,
}

impl PositionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            positions: HashMap::new(),
        }
    }

    /// Open a new lot from an executed entry
    pub fn open(
        &mut self,
        symbol: &str,
        direction: Direction,
        size: Decimal,
        entry_price: Decimal,
        stop: Decimal,
        target: Decimal,
        now: DateTime<Utc>,
    ) -> Position {
        let position = Position::new(symbol, direction, size, entry_price, stop, target, now);
        log::info!(
            "[LEDGER] opened {} {} {:.4} @ {} stop {} target {}",
            symbol,
            direction.as_str(),
            size,
            entry_price,
            stop,
            target
        );
        self.positions.insert(position.position_id, position.clone());
        position
    }

    pub fn position(&self, position_id: &Uuid) -> Option<&Position> {
        self.positions.get(position_id)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions.values().collect()
    }

    pub fn open_position_ids(&self) -> Vec<Uuid> {
        self.positions.keys().copied().collect()
    }

    /// Evaluate a lot against a new mark price
    pub fn update(
        &mut self,
        position_id: &Uuid,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<LedgerAction> {
        let config = self.config.clone();
        let Some(position) = self.positions.get_mut(position_id) else {
            return Vec::new();
        };

        position.observe_price(price);
        let mut actions = Vec::new();

        // Hard exits first: a hit stop or target overrides everything else
        if stop_hit(position, price) {
            actions.push(LedgerAction::Exit {
                position_id: *position_id,
                reason: CloseReason::StopLoss,
            });
            return actions;
        }
        if target_hit(position, price) {
            if config.trail_target {
                // Ride the trend: the target follows price outward and the
                // trailing stop becomes the exit; it never retreats to entry
                let from = position.current_target;
                let to = match position.direction {
                    Direction::Long => from.max(price),
                    _ => from.min(price),
                };
                if to != from {
                    position.current_target = to;
                    actions.push(LedgerAction::TargetTrailed {
                        position_id: *position_id,
                        from,
                        to,
                    });
                }
            } else {
                actions.push(LedgerAction::Exit {
                    position_id: *position_id,
                    reason: CloseReason::Target,
                });
                return actions;
            }
        }

        // One-shot partial profit-take at the intermediate level
        if config.partial_take_enabled && !position.partial_taken {
            let target_distance = (position.current_target - position.entry_price).abs();
            let trigger_distance = target_distance * config.partial_take_frac;
            let crossed = match position.direction {
                Direction::Long => price >= position.entry_price + trigger_distance,
                Direction::Short => price <= position.entry_price - trigger_distance,
                Direction::Flat => false,
            };
            if crossed {
                let quantity = position.size * config.partial_take_size_frac;
                if quantity > Decimal::ZERO && quantity < position.size {
                    actions.push(LedgerAction::PartialExit {
                        position_id: *position_id,
                        quantity,
                    });
                }
            }
        }

        // Trailing stop ratchet, once profit has cleared the activation bar
        let profit_frac = if position.entry_price > Decimal::ZERO {
            position.unrealized_pnl(price) / (position.size * position.entry_price)
        } else {
            Decimal::ZERO
        };
        if profit_frac >= config.trail_activation_frac {
            let from = position.current_stop;
            let to = match position.direction {
                Direction::Long => {
                    let candidate = price - position.stop_distance;
                    if candidate > from { candidate } else { from }
                }
                Direction::Short => {
                    let candidate = price + position.stop_distance;
                    if candidate < from { candidate } else { from }
                }
                Direction::Flat => from,
            };
            if to != from {
                position.current_stop = to;
                actions.push(LedgerAction::StopRatcheted {
                    position_id: *position_id,
                    from,
                    to,
                });
            }
        }

        // Time stop: no meaningful favorable movement within the window
        let held = now - position.opened_at;
        if held >= Duration::seconds(config.time_stop_secs) {
            let required = position.stop_distance * config.min_favorable_frac;
            if position.favorable_excursion() < required {
                actions.push(LedgerAction::Exit {
                    position_id: *position_id,
                    reason: CloseReason::TimeStop,
                });
            }
        }

        actions
    }

    /// Close the whole lot at a price
    pub fn close(
        &mut self,
        position_id: &Uuid,
        exit_price: Decimal,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Option<ClosedPosition> {
        let mut position = self.positions.remove(position_id)?;
        let quantity = position.size;
        position.size = Decimal::ZERO;
        position.is_open = false;

        let closed = close_record(&position, quantity, exit_price, reason, now);
        log::info!(
            "[LEDGER] closed {} {} {:.4} @ {} ({}, pnl {})",
            closed.symbol,
            closed.direction.as_str(),
            closed.quantity,
            exit_price,
            reason.as_str(),
            closed.pnl
        );
        Some(closed)
    }

    /// Close part of a lot; the remainder's stop moves to breakeven
    pub fn partial_close(
        &mut self,
        position_id: &Uuid,
        quantity: Decimal,
        exit_price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<ClosedPosition> {
        let position = self.positions.get_mut(position_id)?;
        let quantity = quantity.min(position.size);
        if quantity <= Decimal::ZERO {
            return None;
        }

        position.size -= quantity;
        position.partial_taken = true;
        if !position.breakeven_applied {
            let from = position.current_stop;
            position.current_stop = match position.direction {
                Direction::Long => position.current_stop.max(position.entry_price),
                Direction::Short => position.current_stop.min(position.entry_price),
                Direction::Flat => position.current_stop,
            };
            position.breakeven_applied = true;
            if position.current_stop != from {
                log::info!(
                    "[LEDGER] {} stop to breakeven {} after partial take",
                    position.symbol,
                    position.current_stop
                );
            }
        }

        let record = close_record(
            position,
            quantity,
            exit_price,
            CloseReason::PartialTarget,
            now,
        );

        if position.size <= Decimal::ZERO {
            self.positions.remove(position_id);
        }
        Some(record)
    }
}

fn stop_hit(position: &Position, price: Decimal) -> bool {
    match position.direction {
        Direction::Long => price <= position.current_stop,
        Direction::Short => price >= position.current_stop,
        Direction::Flat => false,
    }
}

fn target_hit(position: &Position, price: Decimal) -> bool {
    match position.direction {
        Direction::Long => price >= position.current_target,
        Direction::Short => price <= position.current_target,
        Direction::Flat => false,
    }
}

fn close_record(
    position: &Position,
    quantity: Decimal,
    exit_price: Decimal,
    reason: CloseReason,
    now: DateTime<Utc>,
) -> ClosedPosition {
    let pnl = match position.direction {
        Direction::Long => quantity * (exit_price - position.entry_price),
        Direction::Short => quantity * (position.entry_price - exit_price),
        Direction::Flat => Decimal::ZERO,
    };
    let entry_notional = quantity * position.entry_price;
    let return_frac = if entry_notional > Decimal::ZERO {
        pnl / entry_notional
    } else {
        Decimal::ZERO
    };

    ClosedPosition {
        position_id: position.position_id,
        symbol: position.symbol.clone(),
        direction: position.direction,
        quantity,
        entry_price: position.entry_price,
        exit_price,
        pnl,
        return_frac,
        opened_at: position.opened_at,
        closed_at: now,
        reason,
    }
}
