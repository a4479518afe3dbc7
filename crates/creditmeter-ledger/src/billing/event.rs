//! Payment processor event envelope
//!
//! ```json
//! {"id": "evt_..", "type": "checkout.session.completed",
//!  "data": {"object": {"id": "cs_..", "payment_status": "paid",
//!    "amount_total": 1999, "currency": "usd",
//!    "metadata": {"userId": "..", "planId": "basic", "credits": "50"}}}}
//! ```

use creditmeter_common::{PaymentError, Plan};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kinds of events the reconciler distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CheckoutCompleted,
    AsyncPaymentSucceeded,
    AsyncPaymentFailed,
    Other(String),
}

impl EventKind {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "checkout.session.completed" => EventKind::CheckoutCompleted,
            "checkout.session.async_payment_succeeded" => EventKind::AsyncPaymentSucceeded,
            "checkout.session.async_payment_failed" => EventKind::AsyncPaymentFailed,
            other => EventKind::Other(other.to_string()),
        }
    }
}

/// Payment status reported on the checkout object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    Other(String),
}

impl ProcessorStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "paid" => ProcessorStatus::Paid,
            "unpaid" => ProcessorStatus::Unpaid,
            "no_payment_required" => ProcessorStatus::NoPaymentRequired,
            other => ProcessorStatus::Other(other.to_string()),
        }
    }

    /// Money has been received
    pub fn is_final(&self) -> bool {
        matches!(self, ProcessorStatus::Paid)
    }
}

/// Webhook event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventData {
    pub object: CheckoutObject,
}

/// Checkout session object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutObject {
    /// Checkout id, the idempotency key
    pub id: String,
    #[serde(default)]
    pub payment_status: Option<String>,
    /// Minor currency units
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: CheckoutMetadata,
}

/// Metadata attached when the checkout was created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    #[serde(rename = "planId", default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub credits: Option<CreditsField>,
}

/// Processor metadata values are strings, but numbers are accepted too
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CreditsField {
    Number(u64),
    Text(String),
}

impl CreditsField {
    fn value(&self) -> Option<u64> {
        match self {
            CreditsField::Number(n) => Some(*n),
            CreditsField::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Fields a reconciler acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDetails {
    pub user_id: String,
    pub plan: Plan,
    pub credits: u64,
    pub external_tx_id: String,
    /// Major currency units
    pub amount: Decimal,
    pub currency: String,
    pub status: ProcessorStatus,
}

impl PaymentEvent {
    pub fn from_slice(payload: &[u8]) -> Result<Self, PaymentError> {
        serde_json::from_slice(payload)
            .map_err(|e| PaymentError::MalformedEvent(format!("invalid event JSON: {e}")))
    }

    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }

    /// Checkout id of the event, if present
    pub fn external_tx_id(&self) -> &str {
        &self.data.object.id
    }

    /// Extract and validate the payment fields
    pub fn details(&self) -> Result<PaymentDetails, PaymentError> {
        let object = &self.data.object;
        let malformed = |what: &str| PaymentError::MalformedEvent(format!("{what} ({})", self.id));

        if object.id.trim().is_empty() {
            return Err(malformed("missing checkout id"));
        }

        let user_id = object
            .metadata
            .user_id
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| malformed("missing metadata.userId"))?;

        let plan = object
            .metadata
            .plan_id
            .as_deref()
            .ok_or_else(|| malformed("missing metadata.planId"))?
            .parse::<Plan>()
            .map_err(|e| malformed(&e.to_string()))?;

        let credits = object
            .metadata
            .credits
            .as_ref()
            .and_then(CreditsField::value)
            .filter(|c| *c > 0)
            .ok_or_else(|| malformed("missing or invalid metadata.credits"))?;

        let status = ProcessorStatus::parse(object.payment_status.as_deref().unwrap_or("unpaid"));

        Ok(PaymentDetails {
            user_id,
            plan,
            credits,
            external_tx_id: object.id.clone(),
            amount: Decimal::new(object.amount_total.unwrap_or(0), 2),
            currency: object.currency.clone().unwrap_or_else(|| "usd".to_string()),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn event(metadata: serde_json::Value) -> PaymentEvent {
        serde_json::from_value(json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {
                "id": "cs_1",
                "payment_status": "paid",
                "amount_total": 1999,
                "currency": "usd",
                "metadata": metadata
            }}
        }))
        .unwrap()
    }

    #[test]
    fn test_details_from_string_metadata() {
        let details = event(json!({"userId": "alice", "planId": "basic", "credits": "50"}))
            .details()
            .unwrap();

        assert_eq!(details.user_id, "alice");
        assert_eq!(details.plan, Plan::Basic);
        assert_eq!(details.credits, 50);
        assert_eq!(details.external_tx_id, "cs_1");
        assert_eq!(details.amount, dec!(19.99));
        assert!(details.status.is_final());
    }

    #[test]
    fn test_numeric_credits_accepted() {
        let details = event(json!({"userId": "alice", "planId": "starter", "credits": 20}))
            .details()
            .unwrap();
        assert_eq!(details.credits, 20);
    }

    #[test]
    fn test_missing_fields_are_malformed() {
        for metadata in [
            json!({"planId": "basic", "credits": "50"}),
            json!({"userId": "alice", "credits": "50"}),
            json!({"userId": "alice", "planId": "gold", "credits": "50"}),
            json!({"userId": "alice", "planId": "basic", "credits": "lots"}),
            json!({"userId": "alice", "planId": "basic", "credits": "0"}),
        ] {
            let result = event(metadata.clone()).details();
            assert!(
                matches!(result, Err(PaymentError::MalformedEvent(_))),
                "{metadata}"
            );
        }
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(
            EventKind::parse("checkout.session.completed"),
            EventKind::CheckoutCompleted
        );
        assert_eq!(
            EventKind::parse("invoice.paid"),
            EventKind::Other("invoice.paid".into())
        );
        assert!(!ProcessorStatus::parse("unpaid").is_final());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            PaymentEvent::from_slice(b"not json"),
            Err(PaymentError::MalformedEvent(_))
        ));
    }
}
