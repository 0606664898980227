//! Kestrel Ledger
//!
//! Owns open positions from first fill to final exit. On every price update
//! the ledger decides what the position wants: ratchet the stop, trail the
//! target, take partial profit, or get out (stop, target, time). The ledger
//! only *emits* exit instructions - actually unwinding at the venue is the
//! executor's job, and realized results feed back to the risk governor.

pub mod ledger;

// Re-export main types
pub use ledger::{LedgerAction, LedgerConfig, PositionLedger};
