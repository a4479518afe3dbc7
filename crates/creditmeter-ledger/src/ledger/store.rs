//! Ledger storage seam
//!
//! The store is the only synchronization point between writers. Every
//! balance mutation is a conditional write keyed on the account version the
//! writer read; a store never applies a blind overwrite.

use async_trait::async_trait;
use creditmeter_common::{Account, CreditMeterError, LedgerError, PaymentRecord};

/// Errors from ledger store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        LedgerError::Store(err.to_string())
    }
}

impl From<StoreError> for CreditMeterError {
    fn from(err: StoreError) -> Self {
        CreditMeterError::Storage(err.to_string())
    }
}

/// Outcome of an atomic account-plus-payment write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentWrite {
    /// Account and payment record committed together
    Applied,
    /// Account changed since it was read; nothing written
    Conflict,
    /// A completed record already exists for the transaction; nothing written
    Duplicate(PaymentRecord),
}

/// Trait for ledger storage backends
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read an account snapshot
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>, StoreError>;

    /// Insert an account unless one exists; returns whichever is stored
    async fn create_account(&self, account: Account) -> Result<Account, StoreError>;

    /// Replace an account if its stored version still equals `expected_version`
    async fn swap_account(&self, expected_version: u64, account: Account)
        -> Result<bool, StoreError>;

    /// Write an account and a completed payment record atomically
    ///
    /// `expected_version` is `None` when the writer saw no account; the
    /// write then only succeeds if the account is still absent. An existing
    /// non-final record for the same transaction is replaced.
    async fn apply_payment(
        &self,
        expected_version: Option<u64>,
        account: Account,
        payment: PaymentRecord,
    ) -> Result<PaymentWrite, StoreError>;

    /// Record a payment that moves no credits (failed, pending)
    ///
    /// Returns false when a record for the transaction already exists.
    async fn record_payment(&self, payment: PaymentRecord) -> Result<bool, StoreError>;

    /// Look up a payment by external transaction id
    async fn find_payment(&self, external_tx_id: &str)
        -> Result<Option<PaymentRecord>, StoreError>;

    /// All payment records of a user, any order
    async fn payments_for_user(&self, user_id: &str) -> Result<Vec<PaymentRecord>, StoreError>;
}
