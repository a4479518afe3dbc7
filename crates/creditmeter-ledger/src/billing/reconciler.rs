//! Payment reconciler
//!
//! Consumes processor events and credits the ledger exactly once per paid
//! checkout. Authenticity is checked before the payload is parsed. Once an
//! event is verified it is always acknowledged; anything that goes wrong
//! afterwards is logged for manual reconciliation instead of being bounced
//! back to the processor.

use creditmeter_common::crypto::WebhookSecret;
use creditmeter_common::security::AuditLogger;
use creditmeter_common::PaymentError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::event::{EventKind, PaymentDetails, PaymentEvent};
use super::verifier::{EventVerifier, HmacEventVerifier};
use crate::config::PaymentSettings;
use crate::ledger::{CreditGrant, CreditLedger, CreditOutcome};

/// Acknowledgement returned for every verified event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Ack {
    /// Credits were added
    Applied {
        user_id: String,
        external_tx_id: String,
        credits: u64,
        balance: u64,
    },
    /// The checkout was already credited
    Duplicate { external_tx_id: String, balance: u64 },
    /// Payment not final yet; a later event carries the outcome
    Pending { external_tx_id: String },
    /// Event type the reconciler does not act on
    Ignored { event_type: String },
    /// A failed payment was recorded without moving credits
    RecordedFailure { external_tx_id: String },
    /// Verified but not applied; an operator must follow up
    NeedsManualReconciliation { event_id: String, reason: String },
}

impl Ack {
    /// HTTP status to answer the processor with
    pub fn status_code(&self) -> u16 {
        200
    }

    pub fn needs_attention(&self) -> bool {
        matches!(self, Ack::NeedsManualReconciliation { .. })
    }
}

/// Reconciler counters
#[derive(Debug, Default)]
pub struct ReconcilerMetrics {
    pub events_received: AtomicU64,
    pub events_rejected: AtomicU64,
    pub credits_applied: AtomicU64,
    pub duplicates: AtomicU64,
    pub manual_reconciliations: AtomicU64,
}

/// Payment reconciler
pub struct PaymentReconciler {
    ledger: Arc<CreditLedger>,
    verifier: Arc<dyn EventVerifier>,
    audit: Arc<AuditLogger>,
    metrics: ReconcilerMetrics,
}

impl PaymentReconciler {
    /// Build an HMAC-verifying reconciler; fails without a webhook secret
    pub fn new(
        ledger: Arc<CreditLedger>,
        settings: &PaymentSettings,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, PaymentError> {
        let secret = settings
            .webhook_secret
            .as_deref()
            .ok_or(PaymentError::MissingSecret)?;
        let verifier = HmacEventVerifier::new(WebhookSecret::new(secret)?, settings.tolerance_secs);
        Ok(Self::with_verifier(ledger, Arc::new(verifier), audit))
    }

    pub fn with_verifier(
        ledger: Arc<CreditLedger>,
        verifier: Arc<dyn EventVerifier>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            ledger,
            verifier,
            audit,
            metrics: ReconcilerMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &ReconcilerMetrics {
        &self.metrics
    }

    /// Handle one delivery
    ///
    /// Only a verification failure is an error. Every verified event is
    /// acknowledged, including ones that could not be applied.
    #[instrument(skip(self, payload, signature), fields(payload_bytes = payload.len()))]
    pub async fn handle(&self, payload: &[u8], signature: Option<&str>) -> Result<Ack, PaymentError> {
        self.metrics.events_received.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.verifier.verify(payload, signature) {
            self.metrics.events_rejected.fetch_add(1, Ordering::Relaxed);
            self.audit.log_webhook_rejected(&e.to_string(), payload.len());
            warn!(error = %e, "Rejected unverified payment event");
            return Err(match e {
                PaymentError::UnverifiedPaymentEvent(_) => e,
                other => PaymentError::UnverifiedPaymentEvent(other.to_string()),
            });
        }

        let event = match PaymentEvent::from_slice(payload) {
            Ok(event) => event,
            Err(e) => return Ok(self.manual("unparsed", None, &e.to_string())),
        };

        debug!(event_id = %event.id, event_type = %event.event_type, "Payment event verified");

        let ack = match event.kind() {
            EventKind::CheckoutCompleted | EventKind::AsyncPaymentSucceeded => {
                self.settle(&event).await
            }
            EventKind::AsyncPaymentFailed => self.record_failure(&event).await,
            EventKind::Other(event_type) => {
                debug!(%event_type, "Ignoring payment event");
                Ack::Ignored { event_type }
            }
        };

        Ok(ack)
    }

    async fn settle(&self, event: &PaymentEvent) -> Ack {
        let details = match event.details() {
            Ok(details) => details,
            Err(e) => {
                return self.manual(&event.id, Some(event.external_tx_id()), &e.to_string())
            }
        };

        if !details.status.is_final() {
            info!(
                tx = %details.external_tx_id,
                status = ?details.status,
                "Payment not final, awaiting later event"
            );
            return Ack::Pending {
                external_tx_id: details.external_tx_id,
            };
        }

        match self.ledger.apply_grant(grant_for(&details)).await {
            Ok(CreditOutcome::Applied { balance, .. }) => {
                self.metrics.credits_applied.fetch_add(1, Ordering::Relaxed);
                Ack::Applied {
                    user_id: details.user_id,
                    external_tx_id: details.external_tx_id,
                    credits: details.credits,
                    balance,
                }
            }
            Ok(CreditOutcome::Duplicate { balance, .. }) => {
                self.metrics.duplicates.fetch_add(1, Ordering::Relaxed);
                let replay = PaymentError::DuplicatePayment {
                    external_tx_id: details.external_tx_id.clone(),
                };
                info!(event_id = %event.id, status = replay.status_code(), "{replay}");
                Ack::Duplicate {
                    external_tx_id: details.external_tx_id,
                    balance,
                }
            }
            Err(e) => self.manual(&event.id, Some(&details.external_tx_id), &e.to_string()),
        }
    }

    async fn record_failure(&self, event: &PaymentEvent) -> Ack {
        let details = match event.details() {
            Ok(details) => details,
            Err(e) => {
                return self.manual(&event.id, Some(event.external_tx_id()), &e.to_string())
            }
        };

        match self.ledger.record_failed_payment(grant_for(&details)).await {
            Ok(_) => Ack::RecordedFailure {
                external_tx_id: details.external_tx_id,
            },
            Err(e) => self.manual(&event.id, Some(&details.external_tx_id), &e.to_string()),
        }
    }

    fn manual(&self, event_id: &str, external_tx_id: Option<&str>, reason: &str) -> Ack {
        self.metrics
            .manual_reconciliations
            .fetch_add(1, Ordering::Relaxed);
        self.audit
            .log_reconciliation_failure(event_id, external_tx_id, reason);
        error!(
            event_id,
            tx = external_tx_id.unwrap_or("-"),
            reason,
            "Verified payment event needs manual reconciliation"
        );
        Ack::NeedsManualReconciliation {
            event_id: event_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn grant_for(details: &PaymentDetails) -> CreditGrant {
    CreditGrant::new(
        details.user_id.clone(),
        details.credits,
        details.external_tx_id.clone(),
        details.plan,
    )
    .with_amount(details.amount, details.currency.clone())
}
