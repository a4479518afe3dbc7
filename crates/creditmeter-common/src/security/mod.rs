//! Security module - audit logging
//!
//! Billing-relevant events (rejected webhooks, compensating credits,
//! reconciliation failures) are written to an audit log with pluggable
//! sinks.

pub mod audit;

pub use audit::{
    AuditCategory, AuditEvent, AuditLogger, AuditOutcome, AuditSeverity, AuditSink,
    MemoryAuditSink, TracingAuditSink,
};
