//! Risk Sizer
//!
//! Turns an aggregated signal into a sized, risk-bounded order candidate.
//!
//! Sizing is fixed-fractional on a volatility-scaled budget: the stop sits a
//! volatility multiple away from entry (clamped to a sane band), the capital
//! at risk is a configured fraction of equity scaled down as volatility
//! rises above its baseline and as the loss streak grows, and size is what
//! that budget buys at the stop distance. Candidates that cannot reach the
//! minimum risk/reward are rejected, never shipped.
//!
//! Every veto returns a [`Rejection`] with a machine-readable reason -
//! nothing is dropped silently.

use kestrel_core::Direction;
use kestrel_signal::AggregatedSignal;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Sizing policy, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizerConfig {
    /// Minimum net strength to consider an entry
    pub entry_threshold: Decimal,
    /// Fraction of equity risked per trade
    pub risk_per_trade: Decimal,
    /// Cap on one position's notional as a fraction of equity
    pub max_position_frac: Decimal,
    /// Cap on total open notional as a fraction of equity
    pub max_exposure_frac: Decimal,
    /// Minimum acceptable target/stop distance ratio
    pub min_risk_reward: Decimal,
    /// Stop distance as a multiple of the volatility estimate
    pub stop_vol_multiplier: Decimal,
    /// Target distance as a multiple of the volatility estimate
    pub target_vol_multiplier: Decimal,
    /// Stop distance floor, as a fraction of entry price
    pub min_stop_frac: Decimal,
    /// Stop distance ceiling, as a fraction of entry price
    pub max_stop_frac: Decimal,
    /// Volatility/price above this shrinks the risk budget proportionally
    pub vol_baseline_frac: Decimal,
    /// Volatility/price at or above this rejects entries outright
    pub vol_halt_frac: Decimal,
    /// Risk budget shrinks by this much per consecutive loss
    pub loss_derisk_step: Decimal,
    /// Floor for the loss-streak scale
    pub loss_derisk_floor: Decimal,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            entry_threshold: dec!(70),
            risk_per_trade: dec!(0.02),
            max_position_frac: dec!(0.25),
            max_exposure_frac: dec!(0.5),
            min_risk_reward: dec!(2.0),
            stop_vol_multiplier: dec!(2.0),
            target_vol_multiplier: dec!(4.0),
            min_stop_frac: dec!(0.01),
            max_stop_frac: dec!(0.05),
            vol_baseline_frac: dec!(0.02),
            vol_halt_frac: dec!(0.10),
            loss_derisk_step: dec!(0.15),
            loss_derisk_floor: dec!(0.25),
        }
    }
}

/// Account state the sizer needs; published by the governor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub consecutive_losses: u32,
    pub open_notional: Decimal,
}

/// A sized, risk-bounded order candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub symbol: String,
    pub direction: Direction,
    /// Units of the base asset
    pub size: Decimal,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    /// Capital at risk if the stop is hit
    pub risk_amount: Decimal,
    pub risk_reward_ratio: Decimal,
}

impl RiskDecision {
    pub fn notional(&self) -> Decimal {
        self.size * self.entry_price
    }
}

/// Machine-readable veto reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Too few live sources agreed (aggregation produced nothing)
    InsufficientConfluence,
    /// Net strength under the entry threshold, or no direction
    BelowThreshold,
    /// Achievable risk/reward under the configured minimum
    RatioTooLow,
    /// Would push open notional past the portfolio cap
    ExposureCap,
    /// Volatility too high to enter at all
    VolatilityHalt,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InsufficientConfluence => "insufficient_confluence",
            RejectReason::BelowThreshold => "below_threshold",
            RejectReason::RatioTooLow => "ratio_too_low",
            RejectReason::ExposureCap => "exposure_cap",
            RejectReason::VolatilityHalt => "volatility_halt",
        }
    }
}

/// A policy veto - non-fatal, always carries its reason
#[derive(Debug, Clone)]
pub struct Rejection {
    pub reason: RejectReason,
    pub detail: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

pub type SizeResult = std::result::Result<RiskDecision, Rejection>;

/// Stateless sizing policy
pub struct RiskSizer {
    config: SizerConfig,
}

impl RiskSizer {
    pub fn new(config: SizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SizerConfig {
        &self.config
    }

    /// Size an entry candidate, or explain why not
    pub fn size(
        &self,
        aggregated: &AggregatedSignal,
        account: &AccountSnapshot,
        entry_price: Decimal,
        volatility: Decimal,
    ) -> SizeResult {
        let cfg = &self.config;

        // 1. Conviction gate
        if aggregated.direction.is_flat() {
            return Err(Rejection::new(
                RejectReason::BelowThreshold,
                "no directional consensus",
            ));
        }
        if aggregated.net_strength < cfg.entry_threshold {
            return Err(Rejection::new(
                RejectReason::BelowThreshold,
                format!(
                    "net strength {} below entry threshold {}",
                    aggregated.net_strength, cfg.entry_threshold
                ),
            ));
        }

        if entry_price <= Decimal::ZERO || account.equity <= Decimal::ZERO {
            return Err(Rejection::new(
                RejectReason::BelowThreshold,
                "no tradable price or equity",
            ));
        }

        // 2. Volatility regime gate
        let vol_frac = volatility / entry_price;
        if vol_frac >= cfg.vol_halt_frac {
            return Err(Rejection::new(
                RejectReason::VolatilityHalt,
                format!(
                    "volatility {:.4} of price at or above halt level {}",
                    vol_frac, cfg.vol_halt_frac
                ),
            ));
        }

        // 3. Stop distance: volatility multiple, clamped to a band around entry
        let stop_distance = (cfg.stop_vol_multiplier * volatility).clamp(
            entry_price * cfg.min_stop_frac,
            entry_price * cfg.max_stop_frac,
        );

        // 4. Risk budget: fixed fraction, de-risked for volatility and streaks
        let vol_scale = if vol_frac > cfg.vol_baseline_frac && vol_frac > Decimal::ZERO {
            cfg.vol_baseline_frac / vol_frac
        } else {
            Decimal::ONE
        };
        let loss_scale = (Decimal::ONE
            - cfg.loss_derisk_step * Decimal::from(account.consecutive_losses))
        .max(cfg.loss_derisk_floor);
        let risk_budget = account.equity * cfg.risk_per_trade * vol_scale * loss_scale;

        // 5. Size from budget, capped by per-position notional
        let mut size = risk_budget / stop_distance;
        let max_notional = account.equity * cfg.max_position_frac;
        if size * entry_price > max_notional {
            size = max_notional / entry_price;
        }

        // 6. Target from the volatility multiple; enforce the ratio floor
        let target_distance = cfg.target_vol_multiplier * volatility;
        let risk_reward_ratio = target_distance / stop_distance;
        if risk_reward_ratio < cfg.min_risk_reward {
            return Err(Rejection::new(
                RejectReason::RatioTooLow,
                format!(
                    "achievable risk/reward {:.2} below minimum {}",
                    risk_reward_ratio, cfg.min_risk_reward
                ),
            ));
        }

        // 7. Portfolio exposure cap (re-checked by the governor before entry)
        let notional = size * entry_price;
        if account.open_notional + notional > account.equity * cfg.max_exposure_frac {
            return Err(Rejection::new(
                RejectReason::ExposureCap,
                format!(
                    "open notional {} + {} would exceed cap {}",
                    account.open_notional,
                    notional,
                    account.equity * cfg.max_exposure_frac
                ),
            ));
        }

        let (stop_price, target_price) = match aggregated.direction {
            Direction::Long => (entry_price - stop_distance, entry_price + target_distance),
            Direction::Short => (entry_price + stop_distance, entry_price - target_distance),
            Direction::Flat => unreachable!("flat rejected above"),
        };

        log::info!(
            "[SIZER] {} {} {:.4} @ {} stop {} target {} (risk {})",
            aggregated.symbol,
            aggregated.direction.as_str(),
            size,
            entry_price,
            stop_price,
            target_price,
            size * stop_distance,
        );

        Ok(RiskDecision {
            symbol: aggregated.symbol.clone(),
            direction: aggregated.direction,
            size,
            entry_price,
            stop_price,
            target_price,
            risk_amount: size * stop_distance,
            risk_reward_ratio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc as ChronoUtc;
    use kestrel_signal::AggregatedSignal;

    fn aggregated(direction: Direction, net_strength: Decimal) -> AggregatedSignal {
        AggregatedSignal {
            symbol: "XMR-USDT".to_string(),
            direction,
            net_strength,
            contributions: Vec::new(),
            timestamp: ChronoUtc::now(),
        }
    }

    fn account() -> AccountSnapshot {
        AccountSnapshot {
            equity: dec!(10000),
            consecutive_losses: 0,
            open_notional: Decimal::ZERO,
        }
    }

    fn sizer() -> RiskSizer {
        RiskSizer::new(SizerConfig::default())
    }

    #[test]
    fn test_rejects_below_threshold() {
        // ~79 net strength against a raised 85 threshold
        let config = SizerConfig {
            entry_threshold: dec!(85),
            ..Default::default()
        };
        let sizer = RiskSizer::new(config);

        let result = sizer.size(
            &aggregated(Direction::Long, dec!(79.09)),
            &account(),
            dec!(160),
            dec!(4),
        );
        assert_eq!(result.unwrap_err().reason, RejectReason::BelowThreshold);
    }

    #[test]
    fn test_rejects_flat() {
        let result = sizer().size(
            &aggregated(Direction::Flat, dec!(95)),
            &account(),
            dec!(160),
            dec!(4),
        );
        assert_eq!(result.unwrap_err().reason, RejectReason::BelowThreshold);
    }

    #[test]
    fn test_risk_amount_within_budget() {
        let result = sizer()
            .size(
                &aggregated(Direction::Long, dec!(80)),
                &account(),
                dec!(160),
                dec!(4),
            )
            .unwrap();

        // Capital at risk never exceeds the per-trade budget
        assert!(result.risk_amount <= dec!(10000) * dec!(0.02));
        assert!(result.risk_reward_ratio >= dec!(2.0));
        assert_eq!(result.direction, Direction::Long);
        assert!(result.stop_price < result.entry_price);
        assert!(result.target_price > result.entry_price);
    }

    #[test]
    fn test_short_levels_mirror_long() {
        let result = sizer()
            .size(
                &aggregated(Direction::Short, dec!(80)),
                &account(),
                dec!(160),
                dec!(4),
            )
            .unwrap();

        assert!(result.stop_price > result.entry_price);
        assert!(result.target_price < result.entry_price);
    }

    #[test]
    fn test_rejects_ratio_too_low() {
        // Tiny volatility: stop gets clamped up to 1% of entry while the
        // target stays at 4x volatility, crushing the achievable ratio
        let result = sizer().size(
            &aggregated(Direction::Long, dec!(80)),
            &account(),
            dec!(160),
            dec!(0.2),
        );
        assert_eq!(result.unwrap_err().reason, RejectReason::RatioTooLow);
    }

    #[test]
    fn test_volatility_halt() {
        // 20 on a 160 price is 12.5% of price, past the 10% halt level
        let result = sizer().size(
            &aggregated(Direction::Long, dec!(80)),
            &account(),
            dec!(160),
            dec!(20),
        );
        assert_eq!(result.unwrap_err().reason, RejectReason::VolatilityHalt);
    }

    #[test]
    fn test_exposure_cap() {
        let account = AccountSnapshot {
            equity: dec!(10000),
            consecutive_losses: 0,
            open_notional: dec!(4990),
        };
        let result = sizer().size(
            &aggregated(Direction::Long, dec!(80)),
            &account,
            dec!(160),
            dec!(4),
        );
        assert_eq!(result.unwrap_err().reason, RejectReason::ExposureCap);
    }

    #[test]
    fn test_loss_streak_shrinks_size() {
        let calm = sizer()
            .size(
                &aggregated(Direction::Long, dec!(80)),
                &account(),
                dec!(160),
                dec!(4),
            )
            .unwrap();

        let bruised = sizer()
            .size(
                &aggregated(Direction::Long, dec!(80)),
                &AccountSnapshot {
                    consecutive_losses: 3,
                    ..account()
                },
                dec!(160),
                dec!(4),
            )
            .unwrap();

        assert!(bruised.size < calm.size);
        // Floor holds even for long streaks
        let floored = sizer()
            .size(
                &aggregated(Direction::Long, dec!(80)),
                &AccountSnapshot {
                    consecutive_losses: 20,
                    ..account()
                },
                dec!(160),
                dec!(4),
            )
            .unwrap();
        assert!(floored.size >= calm.size * dec!(0.25));
    }

    #[test]
    fn test_high_volatility_shrinks_budget() {
        // Uncap notional so only the volatility scaling differs
        let sizer = RiskSizer::new(SizerConfig {
            max_position_frac: dec!(1.0),
            max_exposure_frac: dec!(1.0),
            ..Default::default()
        });

        // 4/160 = 2.5% of price, above the 2% baseline
        let elevated = sizer
            .size(
                &aggregated(Direction::Long, dec!(80)),
                &account(),
                dec!(160),
                dec!(4),
            )
            .unwrap();

        // 3.2/160 = 2% of price, at baseline
        let baseline = sizer
            .size(
                &aggregated(Direction::Long, dec!(80)),
                &account(),
                dec!(160),
                dec!(3.2),
            )
            .unwrap();

        assert!(elevated.risk_amount < baseline.risk_amount);
    }
}
