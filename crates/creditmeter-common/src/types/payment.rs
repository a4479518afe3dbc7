//! Payment records
//!
//! A payment record is the durable trace of one payment-processor
//! transaction. `external_tx_id` is unique across all records and is the
//! idempotency key for crediting.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::plan::Plan;

/// Lifecycle status of a payment record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    /// Whether a replay of the same transaction must be a no-op
    pub fn is_final_credit(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Refunded)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        };
        f.write_str(s)
    }
}

/// Payment record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub user_id: String,
    /// Amount paid, in major currency units
    pub amount: Decimal,
    /// ISO currency code, lowercase as the processor reports it
    pub currency: String,
    pub credits_purchased: u64,
    pub plan: Plan,
    /// Processor transaction id (unique)
    pub external_tx_id: String,
    /// Unix millis
    pub timestamp: i64,
    pub status: PaymentStatus,
}

impl PaymentRecord {
    /// Create a pending record
    pub fn new(
        user_id: impl Into<String>,
        external_tx_id: impl Into<String>,
        credits_purchased: u64,
        plan: Plan,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            amount: Decimal::ZERO,
            currency: "usd".to_string(),
            credits_purchased,
            plan,
            external_tx_id: external_tx_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            status: PaymentStatus::Pending,
        }
    }

    /// Set the paid amount
    pub fn with_amount(mut self, amount: Decimal, currency: impl Into<String>) -> Self {
        self.amount = amount;
        self.currency = currency.into();
        self
    }

    /// Set the amount from minor units (cents)
    pub fn with_amount_minor(self, minor_units: i64, currency: impl Into<String>) -> Self {
        self.with_amount(Decimal::new(minor_units, 2), currency)
    }

    pub fn with_status(mut self, status: PaymentStatus) -> Self {
        self.status = status;
        self
    }
}
