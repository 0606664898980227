use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Directional opinion - long, short, or no view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Profit when price rises
    Long,
    /// Profit when price falls
    Short,
    /// No directional exposure
    Flat,
}

impl Direction {
    /// Sign of the direction: +1 long, -1 short, 0 flat
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
            Direction::Flat => Decimal::ZERO,
        }
    }

    /// Side used to open exposure in this direction
    pub fn entry_side(&self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Buy),
            Direction::Short => Some(Side::Sell),
            Direction::Flat => None,
        }
    }

    /// Side used to reduce exposure in this direction
    pub fn exit_side(&self) -> Option<Side> {
        self.entry_side().map(|s| s.opposite())
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, Direction::Flat)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Flat => "flat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_signs() {
        assert_eq!(Direction::Long.sign(), dec!(1));
        assert_eq!(Direction::Short.sign(), dec!(-1));
        assert_eq!(Direction::Flat.sign(), dec!(0));
    }

    #[test]
    fn test_entry_exit_sides() {
        assert_eq!(Direction::Long.entry_side(), Some(Side::Buy));
        assert_eq!(Direction::Long.exit_side(), Some(Side::Sell));
        assert_eq!(Direction::Short.entry_side(), Some(Side::Sell));
        assert_eq!(Direction::Short.exit_side(), Some(Side::Buy));
        assert_eq!(Direction::Flat.entry_side(), None);
    }
}
