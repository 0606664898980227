//! Signal - a scored directional opinion from one source
//!
//! Immutable once produced; a signal expires after its time-to-live and an
//! expired signal simply stops contributing to aggregation.

use chrono::{DateTime, Duration, Utc};
use kestrel_core::Direction;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Default signal lifetime if the producer does not set one
const DEFAULT_TTL_SECS: i64 = 12 * 3600;

/// A directional opinion from one signal source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Which source produced this signal
    pub source_id: String,
    /// Instrument the opinion is about
    pub symbol: String,
    /// Long, short, or no view
    pub direction: Direction,
    /// Conviction on a 0-100 scale
    pub strength: Decimal,
    /// Source's confidence in its own read (0.0 - 1.0)
    pub confidence: Decimal,
    /// When the signal was generated
    pub timestamp: DateTime<Utc>,
    /// The signal stops contributing after this instant
    pub expires_at: DateTime<Utc>,
}

impl Signal {
    /// Create a new signal with full confidence and the default lifetime
    pub fn new(
        source_id: impl Into<String>,
        symbol: impl Into<String>,
        direction: Direction,
        strength: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            source_id: source_id.into(),
            symbol: symbol.into(),
            direction,
            strength: strength.clamp(Decimal::ZERO, dec!(100)),
            confidence: Decimal::ONE,
            timestamp: now,
            expires_at: now + Duration::seconds(DEFAULT_TTL_SECS),
        }
    }

    /// Builder: set confidence (clamped to [0, 1])
    pub fn with_confidence(mut self, confidence: Decimal) -> Self {
        self.confidence = confidence.clamp(Decimal::ZERO, Decimal::ONE);
        self
    }

    /// Builder: set time-to-live relative to the signal's timestamp
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.expires_at = self.timestamp + ttl;
        self
    }

    /// Builder: override the generation timestamp (keeps the ttl span)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        let ttl = self.expires_at - self.timestamp;
        self.timestamp = timestamp;
        self.expires_at = timestamp + ttl;
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_long(&self) -> bool {
        self.direction == Direction::Long
    }

    pub fn is_short(&self) -> bool {
        self.direction == Direction::Short
    }

    /// Signed conviction: strength x confidence x direction sign
    pub fn conviction(&self) -> Decimal {
        self.strength * self.confidence * self.direction.sign()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_creation() {
        let signal = Signal::new("trend", "XMR-USDT", Direction::Long, dec!(80))
            .with_confidence(dec!(0.9));

        assert_eq!(signal.source_id, "trend");
        assert_eq!(signal.strength, dec!(80));
        assert_eq!(signal.confidence, dec!(0.9));
        assert!(signal.is_long());
        assert_eq!(signal.conviction(), dec!(72));
    }

    #[test]
    fn test_clamping() {
        let signal = Signal::new("trend", "XMR-USDT", Direction::Long, dec!(130))
            .with_confidence(dec!(1.5));
        assert_eq!(signal.strength, dec!(100));
        assert_eq!(signal.confidence, Decimal::ONE);
    }

    #[test]
    fn test_expiry() {
        let signal = Signal::new("trend", "XMR-USDT", Direction::Long, dec!(50))
            .with_ttl(Duration::minutes(30));

        assert!(!signal.is_expired_at(signal.timestamp + Duration::minutes(29)));
        assert!(signal.is_expired_at(signal.timestamp + Duration::minutes(31)));
    }

    #[test]
    fn test_flat_contributes_nothing() {
        let signal = Signal::new("trend", "XMR-USDT", Direction::Flat, dec!(90));
        assert_eq!(signal.conviction(), dec!(0));
    }
}
