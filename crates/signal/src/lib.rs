//! Kestrel Signal
//!
//! What strategies output and how multiple opinions become one.
//!
//! Strategies don't place orders. They emit [`Signal`]s - scored directional
//! opinions with a confidence and a time-to-live. The [`SignalAggregator`]
//! keeps the most recent live signal per source and combines them into a
//! single [`AggregatedSignal`] by weighted directional vote. Too few live
//! sources means no confluence, and no trade.

pub mod aggregator;
pub mod signal;
pub mod source;

// Re-export main types
pub use aggregator::{AggregatedSignal, AggregatorConfig, SignalAggregator, SignalContribution};
pub use signal::Signal;
pub use source::SignalSource;
