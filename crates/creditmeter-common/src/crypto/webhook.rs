//! Webhook signatures
//!
//! Payment events arrive with a header of the form
//! `t=<unix seconds>,v1=<hex hmac-sha256>`. The MAC covers
//! `"<t>.<raw payload>"` under the shared webhook secret. Several `v1`
//! entries may be present while a secret is being rotated; any match wins.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PaymentError;

type HmacSha256 = Hmac<Sha256>;

/// Signature scheme tag accepted in the header
pub const SIGNATURE_SCHEME: &str = "v1";

/// Default accepted clock skew between signing and verification
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Shared webhook secret, held as a keyed MAC
#[derive(Clone)]
pub struct WebhookSecret {
    keyed: HmacSha256,
}

impl WebhookSecret {
    /// Key a MAC with the secret; empty secrets are refused
    pub fn new(secret: impl AsRef<str>) -> Result<Self, PaymentError> {
        let secret = secret.as_ref();
        if secret.trim().is_empty() {
            return Err(PaymentError::MissingSecret);
        }
        let keyed = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| PaymentError::MissingSecret)?;
        Ok(Self { keyed })
    }

    fn mac(&self) -> HmacSha256 {
        self.keyed.clone()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret(***)")
    }
}

/// Parsed signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, PaymentError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    let t = value.parse::<i64>().map_err(|_| {
                        PaymentError::UnverifiedPaymentEvent("invalid signature timestamp".into())
                    })?;
                    timestamp = Some(t);
                }
                SIGNATURE_SCHEME => {
                    // Undecodable entries are ignored; they can never match
                    if let Ok(sig) = hex::decode(value) {
                        signatures.push(sig);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            PaymentError::UnverifiedPaymentEvent("signature header has no timestamp".into())
        })?;
        if signatures.is_empty() {
            return Err(PaymentError::UnverifiedPaymentEvent(
                "signature header has no v1 signature".into(),
            ));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Hex MAC over `"<timestamp>.<payload>"`
pub fn sign(secret: &WebhookSecret, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = secret.mac();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Full header value for a payload
pub fn signature_header(secret: &WebhookSecret, timestamp: i64, payload: &[u8]) -> String {
    format!(
        "t={},{}={}",
        timestamp,
        SIGNATURE_SCHEME,
        sign(secret, timestamp, payload)
    )
}

/// Verify a signature header against a raw payload
///
/// `now` is Unix seconds. Timestamps further than `tolerance_secs` from
/// `now`, in either direction, are rejected.
pub fn verify(
    secret: &WebhookSecret,
    header: &str,
    payload: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<(), PaymentError> {
    let parsed = SignatureHeader::parse(header)?;

    if now.abs_diff(parsed.timestamp) > tolerance_secs.unsigned_abs() {
        return Err(PaymentError::UnverifiedPaymentEvent(format!(
            "signature timestamp outside tolerance of {tolerance_secs}s"
        )));
    }

    let matched = parsed.signatures.iter().any(|candidate| {
        let mut mac = secret.mac();
        mac.update(parsed.timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        // Constant time comparison
        mac.verify_slice(candidate).is_ok()
    });

    if matched {
        Ok(())
    } else {
        Err(PaymentError::UnverifiedPaymentEvent(
            "signature mismatch".into(),
        ))
    }
}
