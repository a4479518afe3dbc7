//! Credit ledger
//!
//! Balance mutations follow one protocol: read a snapshot, compute the next
//! state on a copy, and commit it with a compare-and-swap on the snapshot's
//! version. A rejected swap is retried from the read, at most
//! `max_debit_attempts` times in total, before the caller sees
//! `ConcurrentModification`.

use creditmeter_common::security::AuditLogger;
use creditmeter_common::{Account, LedgerError, PaymentRecord, PaymentStatus, Plan};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::memory::InMemoryLedgerStore;
use super::metrics::LedgerMetrics;
use super::receipt::{Charge, CompensationFailed, CreditGrant, CreditOutcome};
use super::store::{LedgerStore, PaymentWrite};
use crate::config::LedgerSettings;

/// The credit ledger
pub struct CreditLedger {
    store: Arc<dyn LedgerStore>,
    settings: LedgerSettings,
    metrics: Arc<LedgerMetrics>,
    audit: Arc<AuditLogger>,
}

impl CreditLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        settings: LedgerSettings,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            settings,
            metrics: Arc::new(LedgerMetrics::default()),
            audit,
        }
    }

    /// Ledger over a fresh in-memory store
    pub fn in_memory(settings: LedgerSettings) -> Self {
        Self::new(
            Arc::new(InMemoryLedgerStore::new()),
            settings,
            Arc::new(AuditLogger::new()),
        )
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }

    /// Current account, materializing a default one if none exists
    #[instrument(skip(self))]
    pub async fn read(&self, user_id: &str) -> Result<Account, LedgerError> {
        Self::check_user_id(user_id)?;

        if let Some(account) = self.store.get_account(user_id).await? {
            return Ok(account);
        }

        let stored = self
            .store
            .create_account(Account::new(user_id, self.settings.free_credits))
            .await?;
        LedgerMetrics::incr(&self.metrics.accounts_materialized);
        debug!(user_id, credits = stored.credits_remaining, "Account materialized");
        Ok(stored)
    }

    /// Current account without materializing
    pub async fn find_account(&self, user_id: &str) -> Result<Option<Account>, LedgerError> {
        Ok(self.store.get_account(user_id).await?)
    }

    /// Current account, or `AccountNotFound`
    pub async fn require_account(&self, user_id: &str) -> Result<Account, LedgerError> {
        self.find_account(user_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(user_id.to_string()))
    }

    /// Debit `cost` credits if the balance covers it
    ///
    /// Never drives the balance negative. On success the returned [`Charge`]
    /// is the only handle through which the debit can be compensated.
    #[instrument(skip(self))]
    pub async fn check_and_debit(&self, user_id: &str, cost: u64) -> Result<Charge, LedgerError> {
        if cost == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let attempts = self.settings.max_debit_attempts;
        for attempt in 1..=attempts {
            let current = self.read(user_id).await?;
            let expected = current.version;

            let mut next = current;
            if let Err(e) = next.debit(cost) {
                LedgerMetrics::incr(&self.metrics.debits_rejected);
                debug!(user_id, cost, error = %e, "Debit refused");
                return Err(e);
            }

            if self.store.swap_account(expected, next.clone()).await? {
                LedgerMetrics::incr(&self.metrics.debits_committed);
                debug!(
                    user_id,
                    cost,
                    remaining = next.credits_remaining,
                    attempt,
                    "Debit committed"
                );
                return Ok(Charge::new(user_id, cost, next.credits_remaining));
            }

            LedgerMetrics::incr(&self.metrics.cas_conflicts);
            debug!(user_id, attempt, "Debit lost compare-and-swap");
            if attempt < attempts {
                self.backoff(attempt).await;
            }
        }

        LedgerMetrics::incr(&self.metrics.retries_exhausted);
        warn!(user_id, cost, attempts, "Debit retries exhausted");
        Err(LedgerError::ConcurrentModification {
            user_id: user_id.to_string(),
            attempts,
        })
    }

    /// Credit purchased credits, idempotent on `external_tx_id`
    pub async fn credit(
        &self,
        user_id: &str,
        credits: u64,
        external_tx_id: &str,
        plan: Plan,
    ) -> Result<CreditOutcome, LedgerError> {
        self.apply_grant(CreditGrant::new(user_id, credits, external_tx_id, plan))
            .await
    }

    /// Credit a grant, idempotent on its external transaction id
    ///
    /// A completed record for the transaction makes this a no-op that
    /// reports the current balance. A missing account is created with the
    /// purchased credits as its opening balance.
    #[instrument(skip(self, grant), fields(user_id = %grant.user_id, tx = %grant.external_tx_id))]
    pub async fn apply_grant(&self, grant: CreditGrant) -> Result<CreditOutcome, LedgerError> {
        Self::check_user_id(&grant.user_id)?;
        if grant.credits == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let attempts = self.settings.max_debit_attempts;
        for attempt in 1..=attempts {
            if let Some(existing) = self.store.find_payment(&grant.external_tx_id).await? {
                if existing.status.is_final_credit() {
                    return self.duplicate(existing).await;
                }
            }

            let current = self.store.get_account(&grant.user_id).await?;
            let (expected, mut next) = match current {
                Some(account) => (Some(account.version), account),
                None => (None, Account::empty(&grant.user_id)),
            };
            next.credit(grant.credits, grant.plan)?;

            let payment = grant.to_record().with_status(PaymentStatus::Completed);
            match self
                .store
                .apply_payment(expected, next.clone(), payment.clone())
                .await?
            {
                PaymentWrite::Applied => {
                    LedgerMetrics::incr(&self.metrics.payments_applied);
                    self.audit.log_payment_applied(
                        &grant.user_id,
                        &grant.external_tx_id,
                        grant.credits,
                    );
                    info!(
                        credits = grant.credits,
                        plan = %grant.plan,
                        balance = next.credits_remaining,
                        "Payment credited"
                    );
                    return Ok(CreditOutcome::Applied {
                        balance: next.credits_remaining,
                        payment,
                    });
                }
                PaymentWrite::Duplicate(existing) => return self.duplicate(existing).await,
                PaymentWrite::Conflict => {
                    LedgerMetrics::incr(&self.metrics.cas_conflicts);
                    debug!(attempt, "Credit lost compare-and-swap");
                    if attempt < attempts {
                        self.backoff(attempt).await;
                    }
                }
            }
        }

        LedgerMetrics::incr(&self.metrics.retries_exhausted);
        warn!(attempts, "Credit retries exhausted");
        Err(LedgerError::ConcurrentModification {
            user_id: grant.user_id,
            attempts,
        })
    }

    /// Record a payment the processor reported as failed
    ///
    /// Moves no credits. Returns false if the transaction is already known.
    pub async fn record_failed_payment(&self, grant: CreditGrant) -> Result<bool, LedgerError> {
        let record = grant.to_record().with_status(PaymentStatus::Failed);
        let inserted = self.store.record_payment(record).await?;
        if inserted {
            LedgerMetrics::incr(&self.metrics.failed_payments_recorded);
            info!(
                user_id = %grant.user_id,
                tx = %grant.external_tx_id,
                "Failed payment recorded"
            );
        }
        Ok(inserted)
    }

    /// Give back the credits of a committed debit
    ///
    /// This is the only refund path; nothing calls it implicitly. Only
    /// `credits_remaining` moves, and an audit event is written. Returns the
    /// new balance.
    #[instrument(skip(self, charge), fields(user_id = %charge.user_id(), charge_id = %charge.id()))]
    pub async fn compensate(&self, charge: Charge, reason: &str) -> Result<u64, CompensationFailed> {
        let attempts = self.settings.max_debit_attempts;
        for attempt in 1..=attempts {
            let current = match self.store.get_account(charge.user_id()).await {
                Ok(Some(account)) => account,
                Ok(None) => {
                    let error = LedgerError::AccountNotFound(charge.user_id().to_string());
                    return Err(CompensationFailed { charge, error });
                }
                Err(e) => {
                    return Err(CompensationFailed {
                        charge,
                        error: e.into(),
                    })
                }
            };

            let expected = current.version;
            let mut next = current;
            if let Err(error) = next.restore(charge.credits()) {
                return Err(CompensationFailed { charge, error });
            }

            match self.store.swap_account(expected, next.clone()).await {
                Ok(true) => {
                    LedgerMetrics::incr(&self.metrics.compensations);
                    self.audit.log_compensation(
                        charge.user_id(),
                        &charge.id().to_string(),
                        charge.credits(),
                        reason,
                    );
                    warn!(
                        credits = charge.credits(),
                        balance = next.credits_remaining,
                        reason,
                        "Debit compensated"
                    );
                    return Ok(next.credits_remaining);
                }
                Ok(false) => {
                    LedgerMetrics::incr(&self.metrics.cas_conflicts);
                    if attempt < attempts {
                        self.backoff(attempt).await;
                    }
                }
                Err(e) => {
                    return Err(CompensationFailed {
                        charge,
                        error: e.into(),
                    })
                }
            }
        }

        LedgerMetrics::incr(&self.metrics.retries_exhausted);
        let error = LedgerError::ConcurrentModification {
            user_id: charge.user_id().to_string(),
            attempts,
        };
        Err(CompensationFailed { charge, error })
    }

    /// Payment records of a user, newest first
    pub async fn payment_history(&self, user_id: &str) -> Result<Vec<PaymentRecord>, LedgerError> {
        let mut payments = self.store.payments_for_user(user_id).await?;
        payments.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(payments)
    }

    async fn duplicate(&self, existing: PaymentRecord) -> Result<CreditOutcome, LedgerError> {
        LedgerMetrics::incr(&self.metrics.duplicate_payments);
        let balance = self
            .store
            .get_account(&existing.user_id)
            .await?
            .map(|a| a.credits_remaining)
            .unwrap_or_default();
        info!(
            tx = %existing.external_tx_id,
            balance,
            "Payment already credited, ignoring replay"
        );
        Ok(CreditOutcome::Duplicate {
            balance,
            payment: existing,
        })
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.settings.retry_backoff_ms.saturating_mul(u64::from(attempt));
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn check_user_id(user_id: &str) -> Result<(), LedgerError> {
        if user_id.trim().is_empty() {
            return Err(LedgerError::AccountNotFound(user_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::store::StoreError;
    use async_trait::async_trait;
    use creditmeter_common::security::{AuditCategory, MemoryAuditSink};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> LedgerSettings {
        LedgerSettings {
            retry_backoff_ms: 0,
            ..LedgerSettings::default()
        }
    }

    fn ledger() -> CreditLedger {
        CreditLedger::in_memory(settings())
    }

    /// Store where another writer bumps the account before every swap
    struct ContendedStore {
        inner: InMemoryLedgerStore,
        swaps: AtomicU32,
    }

    impl ContendedStore {
        fn new() -> Self {
            Self {
                inner: InMemoryLedgerStore::new(),
                swaps: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerStore for ContendedStore {
        async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StoreError> {
            self.inner.get_account(user_id).await
        }

        async fn create_account(&self, account: Account) -> Result<Account, StoreError> {
            self.inner.create_account(account).await
        }

        async fn swap_account(
            &self,
            expected_version: u64,
            account: Account,
        ) -> Result<bool, StoreError> {
            self.swaps.fetch_add(1, Ordering::SeqCst);
            // Competing writer lands first
            if let Some(mut other) = self.inner.get_account(&account.user_id).await? {
                other.credit(1, other.plan).unwrap();
                self.inner.swap_account(other.version - 1, other).await?;
            }
            self.inner.swap_account(expected_version, account).await
        }

        async fn apply_payment(
            &self,
            expected_version: Option<u64>,
            account: Account,
            payment: PaymentRecord,
        ) -> Result<PaymentWrite, StoreError> {
            self.inner
                .apply_payment(expected_version, account, payment)
                .await
        }

        async fn record_payment(&self, payment: PaymentRecord) -> Result<bool, StoreError> {
            self.inner.record_payment(payment).await
        }

        async fn find_payment(
            &self,
            external_tx_id: &str,
        ) -> Result<Option<PaymentRecord>, StoreError> {
            self.inner.find_payment(external_tx_id).await
        }

        async fn payments_for_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<PaymentRecord>, StoreError> {
            self.inner.payments_for_user(user_id).await
        }
    }

    #[tokio::test]
    async fn test_read_materializes_free_account() {
        let ledger = ledger();
        assert!(ledger.find_account("alice").await.unwrap().is_none());

        let account = ledger.read("alice").await.unwrap();
        assert_eq!(account.credits_remaining, 2);
        assert_eq!(account.plan, Plan::Free);
        assert!(ledger.find_account("alice").await.unwrap().is_some());
        assert_eq!(ledger.metrics().snapshot().accounts_materialized, 1);
    }

    #[tokio::test]
    async fn test_require_account_does_not_materialize() {
        let ledger = ledger();
        assert_eq!(
            ledger.require_account("ghost").await,
            Err(LedgerError::AccountNotFound("ghost".into()))
        );
        assert!(ledger.find_account("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sequential_debits_until_empty() {
        let ledger = ledger();

        let first = ledger.check_and_debit("alice", 1).await.unwrap();
        assert_eq!(first.balance_after(), 1);
        let second = ledger.check_and_debit("alice", 1).await.unwrap();
        assert_eq!(second.balance_after(), 0);

        let third = ledger.check_and_debit("alice", 1).await;
        assert_eq!(
            third,
            Err(LedgerError::InsufficientCredits {
                required: 1,
                available: 0
            })
        );

        let account = ledger.read("alice").await.unwrap();
        assert_eq!(account.credits_remaining, 0);
        assert_eq!(account.credits_used, 2);
    }

    #[tokio::test]
    async fn test_zero_cost_is_rejected() {
        assert_eq!(
            ledger().check_and_debit("alice", 0).await,
            Err(LedgerError::InvalidAmount)
        );
    }

    #[tokio::test]
    async fn test_blank_user_is_rejected() {
        assert!(matches!(
            ledger().check_and_debit(" ", 1).await,
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_contention_exhausts_retry_budget() {
        let store = Arc::new(ContendedStore::new());
        store.inner.create_account(Account::new("alice", 10)).await.unwrap();
        let ledger = CreditLedger::new(store.clone(), settings(), Arc::new(AuditLogger::silent()));

        let result = ledger.check_and_debit("alice", 1).await;
        assert_eq!(
            result,
            Err(LedgerError::ConcurrentModification {
                user_id: "alice".into(),
                attempts: 2
            })
        );
        // First try plus exactly one retry
        assert_eq!(store.swaps.load(Ordering::SeqCst), 2);

        let metrics = ledger.metrics().snapshot();
        assert_eq!(metrics.cas_conflicts, 2);
        assert_eq!(metrics.retries_exhausted, 1);
        assert_eq!(metrics.debits_committed, 0);

        // Only the competing writer's credits landed
        let account = ledger.read("alice").await.unwrap();
        assert_eq!(account.credits_remaining, 12);
        assert_eq!(account.credits_used, 0);
    }

    #[tokio::test]
    async fn test_credit_is_idempotent() {
        let ledger = ledger();
        ledger.read("bob").await.unwrap();

        let first = ledger.credit("bob", 50, "tx_1", Plan::Basic).await.unwrap();
        assert!(!first.is_duplicate());
        assert_eq!(first.balance(), 52);

        let second = ledger.credit("bob", 50, "tx_1", Plan::Basic).await.unwrap();
        assert!(second.is_duplicate());
        assert_eq!(second.balance(), 52);

        let history = ledger.payment_history("bob").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, PaymentStatus::Completed);

        let account = ledger.read("bob").await.unwrap();
        assert_eq!(account.total_credits_purchased, 50);
        assert_eq!(account.plan, Plan::Basic);
        assert!(account.last_purchase_at.is_some());
        assert_eq!(ledger.metrics().snapshot().duplicate_payments, 1);
    }

    #[tokio::test]
    async fn test_credit_before_provisioning_creates_account() {
        let ledger = ledger();
        let outcome = ledger.credit("carol", 20, "tx_9", Plan::Starter).await.unwrap();

        // No free allotment on top of the purchase
        assert_eq!(outcome.balance(), 20);
        let account = ledger.require_account("carol").await.unwrap();
        assert_eq!(account.credits_remaining, 20);
        assert_eq!(account.plan, Plan::Starter);
    }

    #[tokio::test]
    async fn test_failed_payment_can_be_upgraded() {
        let ledger = ledger();
        let grant = CreditGrant::new("dave", 10, "tx_f", Plan::Starter);

        assert!(ledger.record_failed_payment(grant.clone()).await.unwrap());
        assert!(!ledger.record_failed_payment(grant.clone()).await.unwrap());
        assert!(ledger.find_account("dave").await.unwrap().is_none());

        let outcome = ledger.apply_grant(grant).await.unwrap();
        assert!(!outcome.is_duplicate());
        assert_eq!(outcome.balance(), 10);

        let history = ledger.payment_history("dave").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_compensate_restores_balance_once() {
        let sink = Arc::new(MemoryAuditSink::new());
        let audit = Arc::new(AuditLogger::silent().with_sink(sink.clone()));
        let ledger = CreditLedger::new(Arc::new(InMemoryLedgerStore::new()), settings(), audit);

        let charge = ledger.check_and_debit("erin", 2).await.unwrap();
        assert_eq!(charge.balance_after(), 0);

        let balance = ledger.compensate(charge, "renderer crashed").await.unwrap();
        assert_eq!(balance, 2);

        let account = ledger.read("erin").await.unwrap();
        assert_eq!(account.credits_remaining, 2);
        assert_eq!(account.credits_used, 2);

        let events = sink.events_in(AuditCategory::BalanceAdjustment);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].details.get("reason"),
            Some(&"renderer crashed".to_string())
        );
    }

    #[tokio::test]
    async fn test_failed_compensation_returns_receipt() {
        let store = Arc::new(ContendedStore::new());
        store.inner.create_account(Account::new("frank", 5)).await.unwrap();
        let contended =
            CreditLedger::new(store.clone(), settings(), Arc::new(AuditLogger::silent()));

        // Debit through an uncontended ledger over the same accounts
        let calm = CreditLedger::new(
            Arc::new(InMemoryLedgerStore::new()),
            settings(),
            Arc::new(AuditLogger::silent()),
        );
        let charge = calm.check_and_debit("frank", 1).await.unwrap();

        let failed = contended.compensate(charge, "retry me").await.unwrap_err();
        assert!(failed.error.is_retryable());
        assert_eq!(failed.charge.credits(), 1);
    }
}
