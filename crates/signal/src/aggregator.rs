//! Signal Aggregation
//!
//! Combines the most recent live signal from each source into one
//! directional score per symbol.
//!
//! ## Weighted vote
//!
//! Each live source contributes `weight x strength x confidence`, signed by
//! direction (long = +1, short = -1, flat = 0). Weights come from config
//! overrides (default 1) and are normalized over the set of live sources, so
//! configured weights need not sum to 1. The net direction is the sign of the
//! sum; net strength is the confidence-weighted magnitude on the same 0-100
//! scale as the inputs.
//!
//! ## Confluence gate
//!
//! Fewer live sources than `min_sources` means insufficient confluence:
//! `aggregate` returns `None` and no trade is considered. A sum within
//! `tie_epsilon` of zero resolves to flat.

use crate::signal::Signal;
use chrono::{DateTime, Utc};
use kestrel_core::Direction;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for signal aggregation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Per-source weight overrides (e.g. trust one source more)
    pub source_weights: HashMap<String, Decimal>,
    /// Weight for sources without an override
    pub default_weight: Decimal,
    /// Minimum live sources required for confluence
    pub min_sources: usize,
    /// A vote sum within this of zero resolves to flat
    pub tie_epsilon: Decimal,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            source_weights: HashMap::new(),
            default_weight: Decimal::ONE,
            min_sources: 2,
            tie_epsilon: dec!(0.0001),
        }
    }
}

/// How one signal contributed to the aggregate
#[derive(Debug, Clone)]
pub struct SignalContribution {
    pub source_id: String,
    pub direction: Direction,
    pub strength: Decimal,
    pub confidence: Decimal,
    /// Normalized weight actually applied
    pub weight: Decimal,
}

/// The combined opinion for one symbol
#[derive(Debug, Clone)]
pub struct AggregatedSignal {
    pub symbol: String,
    pub direction: Direction,
    /// Combined conviction on the 0-100 scale
    pub net_strength: Decimal,
    /// Contributing signals in arrival order
    pub contributions: Vec<SignalContribution>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregates per-source signals into one opinion per symbol
pub struct SignalAggregator {
    config: AggregatorConfig,
    /// Most recent signal per (source_id, symbol), with arrival sequence
    live: HashMap<(String, String), (u64, Signal)>,
    arrival_seq: u64,
}

impl SignalAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            live: HashMap::new(),
            arrival_seq: 0,
        }
    }

    /// Record a new signal, replacing the source's previous one for the symbol
    pub fn update_signal(&mut self, signal: Signal) {
        self.cleanup_expired(Utc::now());

        self.arrival_seq += 1;
        let key = (signal.source_id.clone(), signal.symbol.clone());
        self.live.insert(key, (self.arrival_seq, signal));
    }

    /// Drop all signals from a source (e.g. the source was disabled)
    pub fn remove_source(&mut self, source_id: &str) {
        self.live.retain(|(sid, _), _| sid != source_id);
    }

    /// Drop expired signals
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) {
        self.live.retain(|_, (_, signal)| !signal.is_expired_at(now));
    }

    /// Number of signals currently held (including expired-but-uncollected)
    pub fn live_signal_count(&self) -> usize {
        self.live.len()
    }

    /// Aggregate the current live signals for a symbol
    pub fn aggregate(&self, symbol: &str) -> Option<AggregatedSignal> {
        self.aggregate_at(symbol, Utc::now())
    }

    /// Aggregate as of an explicit instant (pure function of the signal set)
    pub fn aggregate_at(&self, symbol: &str, now: DateTime<Utc>) -> Option<AggregatedSignal> {
        // Live signals for this symbol, in arrival order
        let mut signals: Vec<(u64, &Signal)> = self
            .live
            .values()
            .filter(|(_, s)| s.symbol == symbol && !s.is_expired_at(now))
            .map(|(seq, s)| (*seq, s))
            .collect();
        signals.sort_by_key(|(seq, _)| *seq);

        if signals.len() < self.config.min_sources {
            log::debug!(
                "[AGG] {}: {} live sources < {} required, no confluence",
                symbol,
                signals.len(),
                self.config.min_sources
            );
            return None;
        }

        // Normalize configured weights over the live set
        let raw_weights: Vec<Decimal> = signals
            .iter()
            .map(|(_, s)| {
                self.config
                    .source_weights
                    .get(&s.source_id)
                    .copied()
                    .unwrap_or(self.config.default_weight)
            })
            .collect();
        let total_weight: Decimal = raw_weights.iter().sum();
        if total_weight <= Decimal::ZERO {
            return None;
        }

        let mut vote = Decimal::ZERO;
        let mut confidence_mass = Decimal::ZERO;
        let mut contributions = Vec::with_capacity(signals.len());

        for ((_, signal), raw) in signals.iter().zip(raw_weights.iter()) {
            let weight = *raw / total_weight;
            vote += weight * signal.conviction();
            confidence_mass += weight * signal.confidence;

            contributions.push(SignalContribution {
                source_id: signal.source_id.clone(),
                direction: signal.direction,
                strength: signal.strength,
                confidence: signal.confidence,
                weight,
            });
        }

        let direction = if vote.abs() <= self.config.tie_epsilon {
            Direction::Flat
        } else if vote > Decimal::ZERO {
            Direction::Long
        } else {
            Direction::Short
        };

        let net_strength = if confidence_mass > Decimal::ZERO {
            (vote.abs() / confidence_mass).clamp(Decimal::ZERO, dec!(100))
        } else {
            Decimal::ZERO
        };

        Some(AggregatedSignal {
            symbol: symbol.to_string(),
            direction,
            net_strength,
            contributions,
            timestamp: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_signal(source: &str, direction: Direction, strength: Decimal) -> Signal {
        Signal::new(source, "XMR-USDT", direction, strength)
    }

    #[test]
    fn test_below_min_sources_returns_none() {
        let mut agg = SignalAggregator::new(AggregatorConfig::default());
        agg.update_signal(make_signal("a", Direction::Long, dec!(90)));

        assert!(agg.aggregate("XMR-USDT").is_none());
    }

    #[test]
    fn test_agreeing_sources_aggregate_long() {
        let mut agg = SignalAggregator::new(AggregatorConfig::default());
        agg.update_signal(make_signal("a", Direction::Long, dec!(80)));
        agg.update_signal(make_signal("b", Direction::Long, dec!(60)));

        let out = agg.aggregate("XMR-USDT").unwrap();
        assert_eq!(out.direction, Direction::Long);
        // Full confidence everywhere: plain weighted mean of strengths
        assert_eq!(out.net_strength, dec!(70));
    }

    #[test]
    fn test_confidence_weighted_scenario() {
        // Three long sources, equal weights: strengths 80/60/90 with
        // confidences 0.9/0.5/0.8 combine to ~79.09
        let mut agg = SignalAggregator::new(AggregatorConfig::default());
        agg.update_signal(
            make_signal("a", Direction::Long, dec!(80)).with_confidence(dec!(0.9)),
        );
        agg.update_signal(
            make_signal("b", Direction::Long, dec!(60)).with_confidence(dec!(0.5)),
        );
        agg.update_signal(
            make_signal("c", Direction::Long, dec!(90)).with_confidence(dec!(0.8)),
        );

        let out = agg.aggregate("XMR-USDT").unwrap();
        assert_eq!(out.direction, Direction::Long);
        assert!((out.net_strength - dec!(79.09)).abs() < dec!(0.01));
        assert_eq!(out.contributions.len(), 3);
    }

    #[test]
    fn test_opposing_votes_tie_to_flat() {
        let mut agg = SignalAggregator::new(AggregatorConfig::default());
        agg.update_signal(make_signal("a", Direction::Long, dec!(70)));
        agg.update_signal(make_signal("b", Direction::Short, dec!(70)));

        let out = agg.aggregate("XMR-USDT").unwrap();
        assert_eq!(out.direction, Direction::Flat);
    }

    #[test]
    fn test_majority_wins() {
        let mut agg = SignalAggregator::new(AggregatorConfig::default());
        agg.update_signal(make_signal("a", Direction::Long, dec!(90)));
        agg.update_signal(make_signal("b", Direction::Short, dec!(30)));

        let out = agg.aggregate("XMR-USDT").unwrap();
        assert_eq!(out.direction, Direction::Long);
        // (90 - 30) / 2 over confidence mass 1
        assert_eq!(out.net_strength, dec!(30));
    }

    #[test]
    fn test_expired_signal_drops_out() {
        let mut agg = SignalAggregator::new(AggregatorConfig::default());
        agg.update_signal(make_signal("a", Direction::Long, dec!(80)));
        agg.update_signal(
            make_signal("b", Direction::Long, dec!(80)).with_ttl(Duration::minutes(5)),
        );

        let later = Utc::now() + Duration::minutes(10);
        // Source b expired - only one live source left, below the gate
        assert!(agg.aggregate_at("XMR-USDT", later).is_none());
    }

    #[test]
    fn test_update_replaces_previous_signal() {
        let mut agg = SignalAggregator::new(AggregatorConfig::default());
        agg.update_signal(make_signal("a", Direction::Long, dec!(80)));
        agg.update_signal(make_signal("b", Direction::Long, dec!(80)));
        agg.update_signal(make_signal("a", Direction::Short, dec!(80)));

        let out = agg.aggregate("XMR-USDT").unwrap();
        assert_eq!(out.direction, Direction::Flat); // opposing views net out
        assert_eq!(agg.live_signal_count(), 2);
    }

    #[test]
    fn test_net_strength_monotonic_in_conviction() {
        let config = AggregatorConfig::default();

        let strength_of = |s_a: Decimal| {
            let mut agg = SignalAggregator::new(config.clone());
            agg.update_signal(make_signal("a", Direction::Long, s_a));
            agg.update_signal(
                make_signal("b", Direction::Long, dec!(50)).with_confidence(dec!(0.7)),
            );
            agg.aggregate("XMR-USDT").unwrap().net_strength
        };

        assert!(strength_of(dec!(40)) < strength_of(dec!(60)));
        assert!(strength_of(dec!(60)) < strength_of(dec!(95)));
    }

    #[test]
    fn test_weight_override_shifts_vote() {
        let mut weights = HashMap::new();
        weights.insert("trusted".to_string(), dec!(3));
        let config = AggregatorConfig {
            source_weights: weights,
            ..Default::default()
        };

        let mut agg = SignalAggregator::new(config);
        agg.update_signal(make_signal("trusted", Direction::Long, dec!(60)));
        agg.update_signal(make_signal("other", Direction::Short, dec!(60)));

        let out = agg.aggregate("XMR-USDT").unwrap();
        assert_eq!(out.direction, Direction::Long);
    }

    #[test]
    fn test_contributions_in_arrival_order() {
        let mut agg = SignalAggregator::new(AggregatorConfig::default());
        agg.update_signal(make_signal("first", Direction::Long, dec!(70)));
        agg.update_signal(make_signal("second", Direction::Long, dec!(70)));

        let out = agg.aggregate("XMR-USDT").unwrap();
        assert_eq!(out.contributions[0].source_id, "first");
        assert_eq!(out.contributions[1].source_id, "second");
    }
}
