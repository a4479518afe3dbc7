//! Ledger operation results

use creditmeter_common::{LedgerError, PaymentRecord, Plan};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Receipt of a committed debit
///
/// Not `Clone`: compensating a debit consumes its receipt, so one debit
/// can be given back at most once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a committed debit must be used or compensated"]
pub struct Charge {
    id: Uuid,
    user_id: String,
    credits: u64,
    balance_after: u64,
    committed_at: i64,
}

impl Charge {
    pub(crate) fn new(user_id: &str, credits: u64, balance_after: u64) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.to_string(),
            credits,
            balance_after,
            committed_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Credits debited
    pub fn credits(&self) -> u64 {
        self.credits
    }

    /// Balance right after the debit committed
    pub fn balance_after(&self) -> u64 {
        self.balance_after
    }

    /// Unix millis
    pub fn committed_at(&self) -> i64 {
        self.committed_at
    }

    pub fn to_debit_result(&self) -> DebitResult {
        DebitResult {
            success: true,
            credits_remaining: self.balance_after,
            message: format!("Debited {} credits", self.credits),
        }
    }
}

/// Caller-facing debit outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitResult {
    pub success: bool,
    pub credits_remaining: u64,
    pub message: String,
}

impl DebitResult {
    /// Outcome for a refused debit
    pub fn rejected(error: &LedgerError, credits_remaining: u64) -> Self {
        Self {
            success: false,
            credits_remaining,
            message: error.to_string(),
        }
    }
}

/// Credits bought through the payment processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditGrant {
    pub user_id: String,
    pub credits: u64,
    /// Idempotency key
    pub external_tx_id: String,
    pub plan: Plan,
    pub amount: Decimal,
    pub currency: String,
}

impl CreditGrant {
    pub fn new(
        user_id: impl Into<String>,
        credits: u64,
        external_tx_id: impl Into<String>,
        plan: Plan,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            credits,
            external_tx_id: external_tx_id.into(),
            plan,
            amount: Decimal::ZERO,
            currency: "usd".to_string(),
        }
    }

    pub fn with_amount(mut self, amount: Decimal, currency: impl Into<String>) -> Self {
        self.amount = amount;
        self.currency = currency.into();
        self
    }

    pub(crate) fn to_record(&self) -> PaymentRecord {
        PaymentRecord::new(
            self.user_id.clone(),
            self.external_tx_id.clone(),
            self.credits,
            self.plan,
        )
        .with_amount(self.amount, self.currency.clone())
    }
}

/// Result of crediting a grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditOutcome {
    /// Balance increased and a completed record was written
    Applied { balance: u64, payment: PaymentRecord },
    /// The transaction was already credited; nothing changed
    Duplicate { balance: u64, payment: PaymentRecord },
}

impl CreditOutcome {
    pub fn balance(&self) -> u64 {
        match self {
            CreditOutcome::Applied { balance, .. } | CreditOutcome::Duplicate { balance, .. } => {
                *balance
            }
        }
    }

    pub fn payment(&self) -> &PaymentRecord {
        match self {
            CreditOutcome::Applied { payment, .. } | CreditOutcome::Duplicate { payment, .. } => {
                payment
            }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CreditOutcome::Duplicate { .. })
    }
}

/// A compensation that could not be committed
///
/// Hands the receipt back so the caller can try again.
#[derive(Debug, thiserror::Error)]
#[error("compensation of charge {} failed: {error}", .charge.id())]
pub struct CompensationFailed {
    pub charge: Charge,
    pub error: LedgerError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_charge_debit_result() {
        let charge = Charge::new("alice", 3, 7);
        let result = charge.to_debit_result();
        assert!(result.success);
        assert_eq!(result.credits_remaining, 7);
        assert_eq!(result.message, "Debited 3 credits");
    }

    #[test]
    fn test_rejected_result_carries_error_text() {
        let err = LedgerError::InsufficientCredits {
            required: 2,
            available: 0,
        };
        let result = DebitResult::rejected(&err, 0);
        assert!(!result.success);
        assert!(result.message.contains("Insufficient credits"));
    }

    #[test]
    fn test_grant_record() {
        let record = CreditGrant::new("bob", 50, "cs_1", Plan::Basic)
            .with_amount(dec!(19.99), "eur")
            .to_record();
        assert_eq!(record.credits_purchased, 50);
        assert_eq!(record.amount, dec!(19.99));
        assert_eq!(record.currency, "eur");
    }
}
