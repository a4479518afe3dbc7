//! Billing Audit Logging
//!
//! Every event that changes or guards a balance outside the normal debit
//! path leaves an audit record:
//! - Authorization decisions on accounts
//! - Rejected (unverifiable) payment events
//! - Applied payments and compensating credits
//! - Reconciliation failures that need operator follow-up

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// How urgently a record needs a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    /// A verified payment or balance change went wrong
    Error,
    /// Someone presented a forged or stale payment event
    Critical,
}

/// What part of billing produced the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Authorization,
    WebhookVerification,
    /// Balance changes outside the normal debit path
    BalanceAdjustment,
    Reconciliation,
    Configuration,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Authorization => "authorization",
            AuditCategory::WebhookVerification => "webhook_verification",
            AuditCategory::BalanceAdjustment => "balance_adjustment",
            AuditCategory::Reconciliation => "reconciliation",
            AuditCategory::Configuration => "configuration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    /// Unix millis
    pub timestamp: i64,
    pub severity: AuditSeverity,
    pub category: AuditCategory,
    /// Billing verb: "debit", "read", "credit", "compensate", "verify"
    pub action: String,
    pub outcome: AuditOutcome,
    /// Account acting, when known
    pub actor: Option<String>,
    /// Account, transaction or charge acted on
    pub resource: Option<String>,
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Failures default to `Warning`, successes to `Info`
    pub fn new(category: AuditCategory, action: &str, outcome: AuditOutcome) -> Self {
        Self {
            event_id: uuid::Uuid::now_v7().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            severity: match outcome {
                AuditOutcome::Success => AuditSeverity::Info,
                AuditOutcome::Failure => AuditSeverity::Warning,
            },
            category,
            action: action.to_string(),
            outcome,
            actor: None,
            resource: None,
            details: BTreeMap::new(),
        }
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = Some(actor.to_string());
        self
    }

    pub fn with_resource(mut self, resource: &str) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    fn write(&self, event: &AuditEvent);
}

/// Writes records to `tracing` under the `audit` target
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, event: &AuditEvent) {
        let category = event.category.as_str();
        let actor = event.actor.as_deref().unwrap_or("-");
        let resource = event.resource.as_deref().unwrap_or("-");

        match event.severity {
            AuditSeverity::Info => info!(
                target: "audit", event_id = %event.event_id, category, action = %event.action,
                actor, resource, outcome = ?event.outcome, details = ?event.details, "audit"
            ),
            AuditSeverity::Warning => warn!(
                target: "audit", event_id = %event.event_id, category, action = %event.action,
                actor, resource, outcome = ?event.outcome, details = ?event.details, "audit"
            ),
            AuditSeverity::Error | AuditSeverity::Critical => error!(
                target: "audit", event_id = %event.event_id, category, action = %event.action,
                actor, resource, outcome = ?event.outcome, details = ?event.details,
                severity = ?event.severity, "audit"
            ),
        }
    }
}

/// Keeps every record it receives
///
/// Used for inspection in tests and by embedders that ship records
/// elsewhere in batches.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    pub fn events_in(&self, category: AuditCategory) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.category == category)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn write(&self, event: &AuditEvent) {
        self.events.write().push(event.clone());
    }
}

/// Fans billing audit records out to its sinks
pub struct AuditLogger {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditLogger {
    /// Logger writing to `tracing`
    pub fn new() -> Self {
        Self {
            sinks: vec![Arc::new(TracingAuditSink)],
        }
    }

    /// Logger with no sinks
    pub fn silent() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn log(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.write(&event);
        }
    }

    /// Log an account authorization decision
    pub fn log_authorization(&self, actor: &str, account: &str, action: &str, allowed: bool) {
        let outcome = if allowed {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };

        self.log(
            AuditEvent::new(AuditCategory::Authorization, action, outcome)
                .with_actor(actor)
                .with_resource(account),
        );
    }

    /// Log a payment event that failed authenticity checks
    pub fn log_webhook_rejected(&self, reason: &str, payload_len: usize) {
        self.log(
            AuditEvent::new(
                AuditCategory::WebhookVerification,
                "verify",
                AuditOutcome::Failure,
            )
            .with_severity(AuditSeverity::Critical)
            .with_detail("reason", reason)
            .with_detail("payload_bytes", payload_len),
        );
    }

    /// Log a credit applied from a verified payment
    pub fn log_payment_applied(&self, user_id: &str, external_tx_id: &str, credits: u64) {
        self.log(
            AuditEvent::new(AuditCategory::Reconciliation, "credit", AuditOutcome::Success)
                .with_actor(user_id)
                .with_resource(external_tx_id)
                .with_detail("credits", credits),
        );
    }

    /// Log a verified payment that could not be applied
    pub fn log_reconciliation_failure(
        &self,
        event_id: &str,
        external_tx_id: Option<&str>,
        reason: &str,
    ) {
        let mut event = AuditEvent::new(
            AuditCategory::Reconciliation,
            "manual_reconciliation",
            AuditOutcome::Failure,
        )
        .with_severity(AuditSeverity::Error)
        .with_detail("event_id", event_id)
        .with_detail("reason", reason);

        if let Some(tx) = external_tx_id {
            event = event.with_resource(tx);
        }

        self.log(event);
    }

    /// Log a compensating credit for a debit whose work failed
    pub fn log_compensation(&self, user_id: &str, charge_id: &str, credits: u64, reason: &str) {
        self.log(
            AuditEvent::new(
                AuditCategory::BalanceAdjustment,
                "compensate",
                AuditOutcome::Success,
            )
            .with_severity(AuditSeverity::Warning)
            .with_actor(user_id)
            .with_resource(charge_id)
            .with_detail("credits", credits)
            .with_detail("reason", reason),
        );
    }

    /// Log a billing switch turned away from its default
    pub fn log_config_change(&self, component: &str, setting: &str, new_value: &str) {
        self.log(
            AuditEvent::new(AuditCategory::Configuration, "change", AuditOutcome::Success)
                .with_resource(component)
                .with_detail("setting", setting)
                .with_detail("new_value", new_value),
        );
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new()
    }
}
