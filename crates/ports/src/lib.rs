//! Kestrel Ports
//!
//! Port definitions (traits) for the Kestrel swing-trading engine.
//! These define the boundaries between the decision/execution pipeline and
//! its external collaborators: the exchange, the audit journal, and the
//! alerting channel.

pub mod alert;
pub mod audit;
pub mod exchange;

pub use alert::{Alert, AlertKind, AlertLevel, AlertSink};
pub use audit::{AuditError, AuditEvent, AuditResult, AuditSink};
pub use exchange::{
    CancelAck, ExchangeError, ExchangeEvent, ExchangePort, ExchangeResult, OrderRequest,
    OrderStatusReport, ReportedStatus, SubmitAck,
};
