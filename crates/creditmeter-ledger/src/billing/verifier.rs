//! Payment event authenticity

use creditmeter_common::crypto::webhook::{self, WebhookSecret};
use creditmeter_common::PaymentError;

/// Checks that a payload was produced by the payment processor
#[cfg_attr(test, mockall::automock)]
pub trait EventVerifier: Send + Sync {
    fn verify<'a>(&self, payload: &[u8], signature: Option<&'a str>) -> Result<(), PaymentError>;
}

/// HMAC-SHA256 signature verifier
pub struct HmacEventVerifier {
    secret: WebhookSecret,
    tolerance_secs: i64,
}

impl HmacEventVerifier {
    pub fn new(secret: WebhookSecret, tolerance_secs: i64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    /// Verify against an explicit clock (Unix seconds)
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<(), PaymentError> {
        let header = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| PaymentError::UnverifiedPaymentEvent("missing signature header".into()))?;
        webhook::verify(&self.secret, header, payload, now, self.tolerance_secs)
    }
}

impl EventVerifier for HmacEventVerifier {
    fn verify(&self, payload: &[u8], signature: Option<&str>) -> Result<(), PaymentError> {
        self.verify_at(payload, signature, chrono::Utc::now().timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use creditmeter_common::crypto::webhook::signature_header;

    const NOW: i64 = 1_700_000_000;

    fn verifier() -> HmacEventVerifier {
        HmacEventVerifier::new(WebhookSecret::new("whsec_test").unwrap(), 300)
    }

    #[test]
    fn test_missing_signature() {
        for signature in [None, Some(""), Some("  ")] {
            assert!(matches!(
                verifier().verify_at(b"{}", signature, NOW),
                Err(PaymentError::UnverifiedPaymentEvent(_))
            ));
        }
    }

    #[test]
    fn test_valid_and_stale() {
        let secret = WebhookSecret::new("whsec_test").unwrap();
        let header = signature_header(&secret, NOW, b"{}");

        assert!(verifier().verify_at(b"{}", Some(&header), NOW).is_ok());
        assert!(verifier().verify_at(b"{}", Some(&header), NOW + 301).is_err());
        assert!(verifier().verify_at(b"{ }", Some(&header), NOW).is_err());
    }

    #[test]
    fn test_wall_clock_verify() {
        let secret = WebhookSecret::new("whsec_test").unwrap();
        let header = signature_header(&secret, chrono::Utc::now().timestamp(), b"{}");
        assert!(verifier().verify(b"{}", Some(&header)).is_ok());
    }
}
