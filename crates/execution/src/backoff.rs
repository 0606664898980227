//! Retry backoff policy
//!
//! Exponential growth with multiplicative jitter so a burst of retrying
//! symbols does not hammer the venue in lockstep.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First retry delay
    pub base_delay_ms: u64,
    /// Delay ceiling
    pub max_delay_ms: u64,
    /// Uniform jitter added on top, as a fraction of the delay
    pub jitter_frac: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_frac: 0.25,
        }
    }
}

/// Computes per-attempt delays
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `attempt` (0-based: the delay after the
    /// first failure is `delay(0)`)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.config.max_delay_ms);

        let jitter = if self.config.jitter_frac > 0.0 {
            let frac = rand::thread_rng().gen_range(0.0..self.config.jitter_frac);
            (exp as f64 * frac) as u64
        } else {
            0
        };

        Duration::from_millis(exp + jitter)
    }
}
