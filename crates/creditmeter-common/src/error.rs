//! Error types for Creditmeter
//!
//! Provides a unified error type and domain-specific error variants. Every
//! error maps to the HTTP status a transport layer should surface.

use thiserror::Error;

/// Result type alias using CreditMeterError
pub type Result<T> = std::result::Result<T, CreditMeterError>;

/// Unified error type for Creditmeter operations
#[derive(Debug, Error)]
pub enum CreditMeterError {
    // Ledger errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    // Payment errors
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    // Catalog errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    // Identity errors
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CreditMeterError {
    /// HTTP status equivalent
    pub fn status_code(&self) -> u16 {
        match self {
            CreditMeterError::Ledger(e) => e.status_code(),
            CreditMeterError::Payment(e) => e.status_code(),
            CreditMeterError::Catalog(e) => e.status_code(),
            CreditMeterError::Identity(e) => e.status_code(),
            CreditMeterError::Storage(_) => 503,
            CreditMeterError::Serialization(_) => 400,
            CreditMeterError::Config(_) | CreditMeterError::Internal(_) => 500,
        }
    }

    /// Whether the caller may retry the whole request
    pub fn is_retryable(&self) -> bool {
        match self {
            CreditMeterError::Ledger(e) => e.is_retryable(),
            CreditMeterError::Storage(_) => true,
            _ => false,
        }
    }
}

/// Balance and account errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Concurrent modification of account {user_id} after {attempts} attempts")]
    ConcurrentModification { user_id: String, attempts: u32 },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid credit amount: must be positive")]
    InvalidAmount,

    #[error("Credit balance overflow")]
    BalanceOverflow,

    #[error("Ledger store unavailable: {0}")]
    Store(String),
}

impl LedgerError {
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::InsufficientCredits { .. } => 402,
            LedgerError::ConcurrentModification { .. } => 409,
            LedgerError::AccountNotFound(_) => 404,
            LedgerError::InvalidAmount => 400,
            LedgerError::BalanceOverflow => 422,
            LedgerError::Store(_) => 503,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrentModification { .. } | LedgerError::Store(_)
        )
    }
}

/// Payment processor errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("Unverified payment event: {0}")]
    UnverifiedPaymentEvent(String),

    #[error("Malformed payment event: {0}")]
    MalformedEvent(String),

    #[error("Payment already reconciled: {external_tx_id}")]
    DuplicatePayment { external_tx_id: String },

    #[error("Webhook secret is not configured")]
    MissingSecret,
}

impl PaymentError {
    pub fn status_code(&self) -> u16 {
        match self {
            PaymentError::UnverifiedPaymentEvent(_) | PaymentError::MalformedEvent(_) => 400,
            // Idempotent replay, reported as success
            PaymentError::DuplicatePayment { .. } => 200,
            PaymentError::MissingSecret => 500,
        }
    }
}

/// Feature catalog errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Feature {feature} is not available on the {plan} plan")]
    FeatureNotAvailable { feature: String, plan: String },

    #[error("Request exceeds the {plan} plan limit: {limit}")]
    PlanLimitExceeded { plan: String, limit: String },

    #[error("Unknown plan: {0}")]
    UnknownPlan(String),
}

impl CatalogError {
    pub fn status_code(&self) -> u16 {
        match self {
            CatalogError::FeatureNotAvailable { .. } | CatalogError::PlanLimitExceeded { .. } => {
                403
            }
            CatalogError::UnknownPlan(_) => 400,
        }
    }
}

/// Caller identity errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Identity {actor} is not authorized to access account {target}")]
    Unauthorized { actor: String, target: String },

    #[error("Session token is invalid or expired")]
    InvalidToken,

    #[error("Session token is missing")]
    MissingToken,
}

impl IdentityError {
    pub fn status_code(&self) -> u16 {
        match self {
            IdentityError::Unauthorized { .. } => 403,
            IdentityError::InvalidToken | IdentityError::MissingToken => 401,
        }
    }
}

impl From<crate::types::plan::UnknownPlan> for CatalogError {
    fn from(err: crate::types::plan::UnknownPlan) -> Self {
        CatalogError::UnknownPlan(err.0)
    }
}

// Implement From for common external error types
impl From<serde_json::Error> for CreditMeterError {
    fn from(err: serde_json::Error) -> Self {
        CreditMeterError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for CreditMeterError {
    fn from(err: anyhow::Error) -> Self {
        CreditMeterError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CreditMeterError::Ledger(LedgerError::InsufficientCredits {
            required: 3,
            available: 1,
        });
        assert!(err.to_string().contains("required 3, available 1"));
    }

    #[test]
    fn test_status_codes() {
        let cases: Vec<(CreditMeterError, u16)> = vec![
            (
                LedgerError::InsufficientCredits {
                    required: 1,
                    available: 0,
                }
                .into(),
                402,
            ),
            (
                LedgerError::ConcurrentModification {
                    user_id: "u".into(),
                    attempts: 2,
                }
                .into(),
                409,
            ),
            (PaymentError::UnverifiedPaymentEvent("bad sig".into()).into(), 400),
            (
                IdentityError::Unauthorized {
                    actor: "a".into(),
                    target: "b".into(),
                }
                .into(),
                403,
            ),
            (LedgerError::AccountNotFound("u".into()).into(), 404),
        ];

        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict: CreditMeterError = LedgerError::ConcurrentModification {
            user_id: "u".into(),
            attempts: 2,
        }
        .into();
        assert!(conflict.is_retryable());

        let broke: CreditMeterError = LedgerError::InsufficientCredits {
            required: 1,
            available: 0,
        }
        .into();
        assert!(!broke.is_retryable());
    }
}
