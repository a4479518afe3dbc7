//! Account - per-user credit balance
//!
//! Key characteristics:
//! - `credits_remaining` never goes negative; the transition methods refuse
//!   instead of clamping
//! - `credits_used` is a lifetime counter and only grows
//! - Version field for optimistic concurrency (every transition bumps it)
//!
//! The methods here are pure state transitions on a snapshot. Whether a
//! transition becomes durable is decided by the store's compare-and-swap.

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::types::plan::Plan;

/// Free allotment granted to a freshly provisioned identity
pub const DEFAULT_FREE_CREDITS: u64 = 2;

/// Credit account for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Opaque user identifier issued by the authentication provider
    pub user_id: String,

    /// Spendable balance
    pub credits_remaining: u64,

    /// Lifetime credits consumed
    pub credits_used: u64,

    /// Lifetime credits bought through the payment processor
    pub total_credits_purchased: u64,

    /// Current plan tier
    pub plan: Plan,

    /// Last completed purchase (Unix millis)
    pub last_purchase_at: Option<i64>,

    /// Last committed debit (Unix millis)
    pub last_usage_at: Option<i64>,

    /// Creation timestamp (Unix millis)
    pub created_at: i64,

    /// Last modification (Unix millis)
    pub updated_at: i64,

    /// Version for optimistic concurrency control
    pub version: u64,
}

impl Account {
    /// Create a default account on the free plan with the given allotment
    pub fn new(user_id: impl Into<String>, free_credits: u64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            user_id: user_id.into(),
            credits_remaining: free_credits,
            credits_used: 0,
            total_credits_purchased: 0,
            plan: Plan::default(),
            last_purchase_at: None,
            last_usage_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Create an account with no balance
    ///
    /// Used when a payment lands before provisioning created the account:
    /// the purchase itself becomes the opening balance.
    pub fn empty(user_id: impl Into<String>) -> Self {
        Self::new(user_id, 0)
    }

    /// Whether the balance covers `cost`
    #[inline]
    pub fn can_afford(&self, cost: u64) -> bool {
        self.credits_remaining >= cost
    }

    /// Deduct `cost` credits and count them as used
    pub fn debit(&mut self, cost: u64) -> Result<(), LedgerError> {
        if cost == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        if !self.can_afford(cost) {
            return Err(LedgerError::InsufficientCredits {
                required: cost,
                available: self.credits_remaining,
            });
        }

        self.credits_remaining -= cost;
        self.credits_used = self
            .credits_used
            .checked_add(cost)
            .ok_or(LedgerError::BalanceOverflow)?;

        let now = chrono::Utc::now().timestamp_millis();
        self.last_usage_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Add purchased credits and move the account to `plan`
    pub fn credit(&mut self, credits: u64, plan: Plan) -> Result<(), LedgerError> {
        if credits == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        self.credits_remaining = self
            .credits_remaining
            .checked_add(credits)
            .ok_or(LedgerError::BalanceOverflow)?;
        self.total_credits_purchased = self
            .total_credits_purchased
            .checked_add(credits)
            .ok_or(LedgerError::BalanceOverflow)?;
        self.plan = plan;

        let now = chrono::Utc::now().timestamp_millis();
        self.last_purchase_at = Some(now);
        self.touch(now);
        Ok(())
    }

    /// Give back credits from a compensated debit
    ///
    /// Only the spendable balance moves; `credits_used` stays monotonic.
    pub fn restore(&mut self, credits: u64) -> Result<(), LedgerError> {
        if credits == 0 {
            return Err(LedgerError::InvalidAmount);
        }

        self.credits_remaining = self
            .credits_remaining
            .checked_add(credits)
            .ok_or(LedgerError::BalanceOverflow)?;
        self.touch(chrono::Utc::now().timestamp_millis());
        Ok(())
    }

    fn touch(&mut self, now: i64) {
        self.version += 1;
        self.updated_at = now;
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Account(user={}, remaining={}, used={}, plan={}, v{})",
            self.user_id, self.credits_remaining, self.credits_used, self.plan, self.version
        )
    }
}
