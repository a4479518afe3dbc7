//! # Creditmeter Common
//!
//! Shared types, errors, and webhook primitives for the Creditmeter ledger.
//!
//! ## Core Types
//!
//! - [`Account`]: per-user credit balance with optimistic-concurrency version
//! - [`UsageRecord`]: immutable record of one committed debit
//! - [`PaymentRecord`]: processor transaction, keyed by external transaction id
//! - [`Plan`] / [`FeatureType`]: closed sets of plan tiers and billable features
//! - [`Identity`]: attested caller, produced by an [`IdentityProvider`]
//!
//! ## Crypto
//!
//! - [`crypto::webhook`]: timestamped HMAC-SHA256 webhook signatures
//!
//! ## Security
//!
//! - [`security::audit`]: audit logging

pub mod crypto;
pub mod error;
pub mod security;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    CatalogError, CreditMeterError, IdentityError, LedgerError, PaymentError, Result,
};
pub use types::{
    account::{Account, DEFAULT_FREE_CREDITS},
    feature::{FeatureType, UnknownFeature},
    identity::{Identity, IdentityProvider, Role, StaticIdentityProvider},
    payment::{PaymentRecord, PaymentStatus},
    plan::{Plan, UnknownPlan},
    usage::{InputType, UsageRecord},
};

/// Creditmeter version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Retry bound for the compare-and-swap debit loop (first try + one retry)
pub const DEFAULT_MAX_DEBIT_ATTEMPTS: u32 = 2;

/// Webhook timestamp tolerance in seconds
pub const WEBHOOK_TOLERANCE_SECS: i64 = crypto::webhook::DEFAULT_TOLERANCE_SECS;

/// Trailing window for monthly usage analytics
pub const ANALYTICS_WINDOW_DAYS: i64 = 180;

/// Default page size for usage history
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Largest page a history query may request
pub const MAX_HISTORY_LIMIT: usize = 100;
