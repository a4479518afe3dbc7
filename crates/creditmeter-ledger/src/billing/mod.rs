//! Billing module
//!
//! Reconciles payment processor events against the ledger:
//! - PaymentEvent: webhook envelope and extracted payment details
//! - EventVerifier: authenticity seam, HMAC implementation
//! - PaymentReconciler: verified, idempotent crediting

pub mod event;
pub mod reconciler;
pub mod verifier;

pub use event::{EventKind, PaymentDetails, PaymentEvent, ProcessorStatus};
pub use reconciler::{Ack, PaymentReconciler, ReconcilerMetrics};
pub use verifier::{EventVerifier, HmacEventVerifier};
