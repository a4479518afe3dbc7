//! In-memory ledger store
//!
//! Uses DashMap for per-account compare-and-swap and a single mutex over
//! the payment index. Lock order is payments, then account; debits never
//! take the payment lock.

use async_trait::async_trait;
use creditmeter_common::{Account, PaymentRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::store::{LedgerStore, PaymentWrite, StoreError};

/// In-memory storage implementation
#[derive(Default)]
pub struct InMemoryLedgerStore {
    /// Accounts by user id
    accounts: DashMap<String, Account>,

    /// Payment records by external transaction id
    payments: Mutex<HashMap<String, PaymentRecord>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn payment_count(&self) -> usize {
        self.payments.lock().len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(user_id).map(|a| a.clone()))
    }

    async fn create_account(&self, account: Account) -> Result<Account, StoreError> {
        let stored = self
            .accounts
            .entry(account.user_id.clone())
            .or_insert(account);
        Ok(stored.clone())
    }

    async fn swap_account(
        &self,
        expected_version: u64,
        account: Account,
    ) -> Result<bool, StoreError> {
        match self.accounts.get_mut(&account.user_id) {
            Some(mut current) if current.version == expected_version => {
                *current = account;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_payment(
        &self,
        expected_version: Option<u64>,
        account: Account,
        payment: PaymentRecord,
    ) -> Result<PaymentWrite, StoreError> {
        let mut payments = self.payments.lock();

        if let Some(existing) = payments.get(&payment.external_tx_id) {
            if existing.status.is_final_credit() {
                return Ok(PaymentWrite::Duplicate(existing.clone()));
            }
        }

        let committed = match expected_version {
            None => match self.accounts.entry(account.user_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(account);
                    true
                }
                Entry::Occupied(_) => false,
            },
            Some(expected) => match self.accounts.get_mut(&account.user_id) {
                Some(mut current) if current.version == expected => {
                    *current = account;
                    true
                }
                _ => false,
            },
        };

        if !committed {
            return Ok(PaymentWrite::Conflict);
        }

        payments.insert(payment.external_tx_id.clone(), payment);
        Ok(PaymentWrite::Applied)
    }

    async fn record_payment(&self, payment: PaymentRecord) -> Result<bool, StoreError> {
        let mut payments = self.payments.lock();
        if payments.contains_key(&payment.external_tx_id) {
            return Ok(false);
        }
        payments.insert(payment.external_tx_id.clone(), payment);
        Ok(true)
    }

    async fn find_payment(
        &self,
        external_tx_id: &str,
    ) -> Result<Option<PaymentRecord>, StoreError> {
        Ok(self.payments.lock().get(external_tx_id).cloned())
    }

    async fn payments_for_user(&self, user_id: &str) -> Result<Vec<PaymentRecord>, StoreError> {
        Ok(self
            .payments
            .lock()
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }
}
