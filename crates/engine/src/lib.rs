//! Kestrel Engine
//!
//! Wires the decision pipeline into a running system:
//!
//! ```text
//! Signals ──► ┌──────────────────────────────────────────────┐
//!             │  SymbolWorker (one task per symbol)          │
//! Prices  ──► │                                              │
//!             │  Aggregator ─► Sizer ─► Governor check       │
//!             │        │                    ▲                │
//!             │        ▼                    │ commands       │
//!             │  OrderExecutor ─► Ledger ───┘ (mpsc, serial) │
//!             └───────────┬──────────────────────────────────┘
//!                         │ orders                 ▲ halt broadcast
//!                         ▼                        │
//!                    ExchangePort          GovernorTask (single writer
//!                                          of PortfolioState)
//! ```
//!
//! Concurrency model:
//! - One worker task per symbol consumes that symbol's event queue, so no
//!   two decisions for a symbol ever run concurrently; different symbols
//!   proceed in parallel and a routing map keeps ingestion non-blocking.
//! - The portfolio state has exactly one writer: the governor task, fed by a
//!   command queue that linearizes exposure and halt checks across symbols.
//! - Halt directives fan out over a broadcast channel; workers cancel
//!   in-flight entries cooperatively and stop opening new positions until
//!   an explicit daily reset or manual override.

pub mod config;
pub mod engine;
pub mod governor_task;
pub mod infra;
pub mod worker;

// Re-export main types
pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use governor_task::{ControlSignal, GovernorHandle, spawn_governor};
pub use infra::{JsonlAuditSink, LogAlertSink, MemoryAuditSink, QueuedAlertSink};
pub use worker::{SymbolEvent, SymbolWorker};
