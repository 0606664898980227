//! Kestrel Execution
//!
//! Owns the lifecycle of a single order submission:
//!
//! ```text
//! PendingSubmit ──► Submitted ──► PartiallyFilled ──► Filled
//!                      │                │
//!                      ├──► Rejected    ├──► Cancelled
//!                      └──► Cancelled   │
//!                                       └──► (market fallback, once)
//! ```
//!
//! - Submission retries use exponential backoff with jitter, bounded by an
//!   attempt budget; exhaustion surfaces as `retry_exhausted`, never limbo.
//! - Every submission carries a client-assigned idempotent key. After an
//!   ambiguous failure the executor queries order status on that key before
//!   assuming anything, so a retry can never duplicate a live order.
//! - Unfilled limit orders fall back to a market order exactly once after
//!   the fill window expires, then give up.
//! - Cancellation is cooperative: in-flight exchange calls are awaited and
//!   their result applied before the cancel completes.

pub mod backoff;
pub mod machine;
pub mod order;
pub mod reconcile;

// Re-export main types
pub use backoff::{Backoff, BackoffConfig};
pub use machine::{EntryResult, ExecutorConfig, OrderExecutor};
pub use order::{Order, OrderState};
pub use reconcile::apply_report;
