//! # Creditmeter Ledger
//!
//! Credit pricing, the balance ledger, usage metering, and payment
//! reconciliation for metered AI features.
//!
//! ## Cost Formula
//!
//! ```text
//! cost = max(1, ceil(base × Π modifiers))
//! ```
//!
//! Where the modifiers are:
//! - priority processing: ×1.5
//! - payload over 10 MB: ×1.2
//! - complex target framework: ×1.1
//! - follow-up iteration: ×0.8
//!
//! ## Balance Protocol
//!
//! Every balance change is a compare-and-swap on the account version. A lost
//! swap is retried once; a second loss surfaces as `ConcurrentModification`
//! and the caller retries the whole request.

pub mod billing;
pub mod config;
pub mod ledger;
pub mod metering;
pub mod pricing;
pub mod service;

pub use billing::{Ack, EventVerifier, HmacEventVerifier, PaymentReconciler};
pub use config::{
    CreditMeterConfig, LedgerSettings, PaymentSettings, PricingSettings, UsageSettings,
};
pub use ledger::{
    Charge, CompensationFailed, CreditGrant, CreditLedger, CreditOutcome, DebitResult,
    InMemoryLedgerStore, LedgerStore,
};
pub use metering::{AppendOutcome, UsageAnalytics, UsageHistory, UsageRecorder, UsageStore};
pub use pricing::{CostCalculator, CostContext, CostQuote, FeatureCatalog};
pub use service::{
    BillableAction, CreditMeter, CreditSummary, ExecuteError, Executed, FeatureAvailability,
    MeteredDebit, Transaction,
};
