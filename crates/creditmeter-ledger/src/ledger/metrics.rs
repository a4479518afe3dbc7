//! Ledger counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ledger metrics
#[derive(Debug, Default)]
pub struct LedgerMetrics {
    pub debits_committed: AtomicU64,
    pub debits_rejected: AtomicU64,
    pub cas_conflicts: AtomicU64,
    pub retries_exhausted: AtomicU64,
    pub payments_applied: AtomicU64,
    pub duplicate_payments: AtomicU64,
    pub failed_payments_recorded: AtomicU64,
    pub compensations: AtomicU64,
    pub accounts_materialized: AtomicU64,
}

/// Point-in-time copy of [`LedgerMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerMetricsSnapshot {
    pub debits_committed: u64,
    pub debits_rejected: u64,
    pub cas_conflicts: u64,
    pub retries_exhausted: u64,
    pub payments_applied: u64,
    pub duplicate_payments: u64,
    pub failed_payments_recorded: u64,
    pub compensations: u64,
    pub accounts_materialized: u64,
}

impl LedgerMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LedgerMetricsSnapshot {
        LedgerMetricsSnapshot {
            debits_committed: self.debits_committed.load(Ordering::Relaxed),
            debits_rejected: self.debits_rejected.load(Ordering::Relaxed),
            cas_conflicts: self.cas_conflicts.load(Ordering::Relaxed),
            retries_exhausted: self.retries_exhausted.load(Ordering::Relaxed),
            payments_applied: self.payments_applied.load(Ordering::Relaxed),
            duplicate_payments: self.duplicate_payments.load(Ordering::Relaxed),
            failed_payments_recorded: self.failed_payments_recorded.load(Ordering::Relaxed),
            compensations: self.compensations.load(Ordering::Relaxed),
            accounts_materialized: self.accounts_materialized.load(Ordering::Relaxed),
        }
    }
}
