//! Engine configuration
//!
//! One immutable record aggregating every component's policy, loaded once at
//! startup (optionally from a JSON file) and never mutated during a run.
//! Reweighting or retuning means loading a new configuration and starting a
//! new engine, not poking values into a live one.

use kestrel_execution::ExecutorConfig;
use kestrel_ledger::LedgerConfig;
use kestrel_risk::{GovernorConfig, SizerConfig};
use kestrel_signal::AggregatorConfig;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Complete engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Symbols to run workers for
    pub symbols: Vec<String>,
    /// Starting account equity
    pub initial_equity: Decimal,
    /// Enter with limit orders at the mark (market orders otherwise)
    pub use_limit_entries: bool,
    /// Per-symbol event queue capacity
    pub channel_capacity: usize,
    pub aggregator: AggregatorConfig,
    pub sizer: SizerConfig,
    pub governor: GovernorConfig,
    pub executor: ExecutorConfig,
    pub ledger: LedgerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["XMR-USDT".to_string()],
            initial_equity: dec!(10000),
            use_limit_entries: true,
            channel_capacity: 256,
            aggregator: AggregatorConfig::default(),
            sizer: SizerConfig::default(),
            governor: GovernorConfig::default(),
            executor: ExecutorConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
