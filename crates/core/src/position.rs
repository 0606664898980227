use crate::side::Direction;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a position (or part of one) was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Protective stop was hit
    StopLoss,
    /// Profit target was hit
    Target,
    /// Intermediate profit level hit - partial exit
    PartialTarget,
    /// No favorable movement within the holding window
    TimeStop,
    /// Forced flat by a portfolio halt
    Halt,
    /// Operator-requested close
    Manual,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "stop_loss",
            CloseReason::Target => "target",
            CloseReason::PartialTarget => "partial_target",
            CloseReason::TimeStop => "time_stop",
            CloseReason::Halt => "halt",
            CloseReason::Manual => "manual",
        }
    }
}

/// An open position (one lot)
///
/// A lot's size only ever decreases - adding exposure means opening a new
/// lot with its own id, so P&L attribution per lot stays exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique lot identifier
    pub position_id: Uuid,
    /// Instrument
    pub symbol: String,
    /// Long or short (never flat)
    pub direction: Direction,
    /// Remaining quantity (always positive)
    pub size: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// Current protective stop level
    pub current_stop: Decimal,
    /// Current profit target level
    pub current_target: Decimal,
    /// Distance between entry and the initial stop; trailing preserves it
    pub stop_distance: Decimal,
    /// When the lot was opened
    pub opened_at: DateTime<Utc>,
    /// Best price seen in the favorable direction since entry
    pub max_favorable_price: Decimal,
    /// Stop has been moved to breakeven after a partial take
    pub breakeven_applied: bool,
    /// The one-shot partial profit-take already happened
    pub partial_taken: bool,
    /// False once size reaches zero
    pub is_open: bool,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        size: Decimal,
        entry_price: Decimal,
        stop: Decimal,
        target: Decimal,
        opened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            position_id: Uuid::new_v4(),
            symbol: symbol.into(),
            direction,
            size,
            entry_price,
            current_stop: stop,
            current_target: target,
            stop_distance: (entry_price - stop).abs(),
            opened_at,
            max_favorable_price: entry_price,
            breakeven_applied: false,
            partial_taken: false,
            is_open: true,
        }
    }

    /// Notional exposure at entry
    pub fn notional(&self) -> Decimal {
        self.size * self.entry_price
    }

    /// Unrealized PnL at a mark price
    pub fn unrealized_pnl(&self, mark_price: Decimal) -> Decimal {
        match self.direction {
            Direction::Long => self.size * (mark_price - self.entry_price),
            Direction::Short => self.size * (self.entry_price - mark_price),
            Direction::Flat => Decimal::ZERO,
        }
    }

    /// How far price has moved in the lot's favor, at its best (>= 0)
    pub fn favorable_excursion(&self) -> Decimal {
        match self.direction {
            Direction::Long => (self.max_favorable_price - self.entry_price).max(Decimal::ZERO),
            Direction::Short => (self.entry_price - self.max_favorable_price).max(Decimal::ZERO),
            Direction::Flat => Decimal::ZERO,
        }
    }

    /// Record a new mark price, updating the favorable high-water mark
    pub fn observe_price(&mut self, price: Decimal) {
        match self.direction {
            Direction::Long if price > self.max_favorable_price => {
                self.max_favorable_price = price;
            }
            Direction::Short if price < self.max_favorable_price => {
                self.max_favorable_price = price;
            }
            _ => {}
        }
    }
}

/// The record of a closed lot (or a closed slice of one)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub position_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    /// Quantity closed by this event
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    /// Realized PnL on the closed quantity
    pub pnl: Decimal,
    /// PnL as a fraction of the closed quantity's entry notional
    pub return_frac: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub reason: CloseReason,
}

impl ClosedPosition {
    pub fn is_loss(&self) -> bool {
        self.pnl < Decimal::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_position() -> Position {
        Position::new(
            "XMR-USDT",
            Direction::Long,
            dec!(10),
            dec!(100),
            dec!(95),
            dec!(110),
            Utc::now(),
        )
    }

    #[test]
    fn test_unrealized_pnl_long() {
        let pos = long_position();
        assert_eq!(pos.unrealized_pnl(dec!(103)), dec!(30));
        assert_eq!(pos.unrealized_pnl(dec!(98)), dec!(-20));
    }

    #[test]
    fn test_unrealized_pnl_short() {
        let pos = Position::new(
            "XMR-USDT",
            Direction::Short,
            dec!(10),
            dec!(100),
            dec!(105),
            dec!(90),
            Utc::now(),
        );
        assert_eq!(pos.unrealized_pnl(dec!(97)), dec!(30));
    }

    #[test]
    fn test_favorable_excursion_tracks_best_price() {
        let mut pos = long_position();
        assert_eq!(pos.favorable_excursion(), dec!(0));

        pos.observe_price(dec!(104));
        pos.observe_price(dec!(101)); // pullback does not reduce the mark
        assert_eq!(pos.favorable_excursion(), dec!(4));
    }

    #[test]
    fn test_stop_distance_from_entry_and_stop() {
        let pos = long_position();
        assert_eq!(pos.stop_distance, dec!(5));
    }
}
