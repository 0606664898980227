//! Kestrel Risk
//!
//! Two layers of risk control:
//!
//! - **Risk Sizer**: converts an aggregated signal plus account state into a
//!   bounded order size with stop and target levels, or a rejection with a
//!   machine-readable reason. Stateless - pure policy.
//! - **Portfolio Risk Governor**: owns the single authoritative
//!   [`PortfolioState`], enforces cross-position constraints (exposure caps,
//!   drawdown halts, loss-streak halts) and can veto entries or demand
//!   flattening. Stateful - all mutations flow through it.

pub mod governor;
pub mod sizer;

// Re-export main types
pub use governor::{
    DenyReason, GovernorConfig, HaltDirective, HaltReason, OpenDecision, PortfolioMetrics,
    PortfolioRiskGovernor, PortfolioState,
};
pub use sizer::{AccountSnapshot, RejectReason, Rejection, RiskDecision, RiskSizer, SizerConfig};
