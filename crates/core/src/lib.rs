//! Kestrel Core Domain
//!
//! Pure domain types for the Kestrel swing-trading engine.
//! This crate contains no async, no I/O, and is 100% unit testable.

pub mod fill;
pub mod position;
pub mod side;

// Re-export commonly used types at crate root
pub use fill::Fill;
pub use position::{ClosedPosition, CloseReason, Position};
pub use side::{Direction, Side};
