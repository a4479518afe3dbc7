//! Ledger module
//!
//! Provides the balance store and its mutation protocol:
//! - CreditLedger: check-and-debit, idempotent credit, compensation
//! - LedgerStore: conditional-write storage seam
//! - InMemoryLedgerStore: DashMap backed store

pub mod credit_ledger;
pub mod memory;
pub mod metrics;
pub mod receipt;
pub mod store;

pub use credit_ledger::CreditLedger;
pub use memory::InMemoryLedgerStore;
pub use metrics::{LedgerMetrics, LedgerMetricsSnapshot};
pub use receipt::{Charge, CompensationFailed, CreditGrant, CreditOutcome, DebitResult};
pub use store::{LedgerStore, PaymentWrite, StoreError};
