//! Signal source capability
//!
//! Rule-based, ML-based - the aggregator does not care. Anything that can
//! produce a [`Signal`] on demand plugs in here.

use crate::signal::Signal;
use async_trait::async_trait;

/// A pluggable producer of trading opinions
#[async_trait]
pub trait SignalSource: Send {
    /// Stable identifier, used for weighting and as the signal's source_id
    fn source_id(&self) -> &str;

    /// Produce the source's current opinion for a symbol, or `None` when the
    /// source has no view (or is unable to form one - a failing source is
    /// treated as absent, never as an error).
    async fn produce_signal(&mut self, symbol: &str) -> Option<Signal>;
}
