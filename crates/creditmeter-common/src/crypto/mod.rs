//! Cryptographic primitives for Creditmeter
//!
//! Only webhook signing lives here: payment events are authenticated with
//! an HMAC-SHA256 over the timestamped raw payload.

pub mod webhook;

pub use webhook::{SignatureHeader, WebhookSecret, DEFAULT_TOLERANCE_SECS};
