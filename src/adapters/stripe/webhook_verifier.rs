//! Stripe webhook signature verification.
//!
//! # Security
//!
//! - HMAC-SHA256 over `"{t}.{payload}"` with constant-time comparison
//! - Deliveries signed outside the tolerance window are rejected (replay)
//! - The secret never leaves `secrecy::SecretString` except to key the MAC

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::billing::ProviderEvent;
use crate::ports::PaymentError;

use super::webhook_types::{SignatureHeader, StripeWebhookEvent};
use super::StripePriceMap;

type HmacSha256 = Hmac<Sha256>;

/// Default replay window (5 minutes).
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Clock skew tolerance for future timestamps (60 seconds).
const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

/// Verifies and decodes Stripe webhook deliveries.
#[derive(Debug, Clone)]
pub struct StripeWebhookVerifier {
    tolerance_secs: i64,
    prices: StripePriceMap,
}

impl StripeWebhookVerifier {
    pub fn new(prices: StripePriceMap) -> Self {
        Self {
            tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
            prices,
        }
    }

    pub fn with_tolerance_secs(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Checks the signature header against `secret` and decodes the event.
    pub fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &SecretString,
    ) -> Result<ProviderEvent, PaymentError> {
        self.verify_at(payload, signature, secret, chrono::Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &SecretString,
        now: i64,
    ) -> Result<ProviderEvent, PaymentError> {
        // 1. Parse header
        let header = SignatureHeader::parse(signature)
            .map_err(|e| PaymentError::invalid_webhook(e.to_string()))?;

        // 2. Validate timestamp (prevent replay attacks)
        let age = now - header.timestamp;
        if age > self.tolerance_secs {
            tracing::warn!(
                target: "security",
                event_timestamp = header.timestamp,
                age_secs = age,
                "Webhook signature too old - possible replay"
            );
            return Err(PaymentError::invalid_webhook(format!(
                "Signature too old ({} seconds)",
                age
            )));
        }
        if age < -MAX_FUTURE_TOLERANCE_SECS {
            tracing::warn!(
                target: "security",
                event_timestamp = header.timestamp,
                "Webhook signature from the future - clock skew or manipulation"
            );
            return Err(PaymentError::invalid_webhook("Signature timestamp in future"));
        }

        // 3. Constant-time comparison against every v1 entry
        let expected = compute_signature(secret, header.timestamp, payload)?;
        let matched = header
            .v1_signatures
            .iter()
            .any(|provided| bool::from(expected.as_slice().ct_eq(provided.as_slice())));
        if !matched {
            return Err(PaymentError::invalid_webhook("Invalid signature"));
        }

        // 4. Decode envelope
        let event: StripeWebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::invalid_webhook(format!("Invalid JSON: {}", e)))?;
        event.into_provider_event(&self.prices)
    }
}

fn compute_signature(
    secret: &SecretString,
    timestamp: i64,
    payload: &[u8],
) -> Result<Vec<u8>, PaymentError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|e| PaymentError::invalid_webhook(format!("Unusable signing secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Builds a `Stripe-Signature` header value for `payload`.
///
/// Used by tests and local tooling that replay deliveries.
pub fn sign_payload(secret: &SecretString, timestamp: i64, payload: &[u8]) -> String {
    match compute_signature(secret, timestamp, payload) {
        Ok(signature) => format!("t={},v1={}", timestamp, hex::encode(signature)),
        Err(_) => format!("t={}", timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PaymentErrorCode;

    const NOW: i64 = 1_704_067_200;

    fn secret() -> SecretString {
        SecretString::new("whsec_test_secret".to_string())
    }

    fn verifier() -> StripeWebhookVerifier {
        StripeWebhookVerifier::new(StripePriceMap::conventional())
    }

    fn payload() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "customer.subscription.deleted",
            "created": NOW,
            "data": { "object": {
                "id": "sub_1", "customer": "cus_1", "status": "canceled"
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn accepts_valid_signature() {
        let header = sign_payload(&secret(), NOW, &payload());
        let event = verifier().verify_at(&payload(), &header, &secret(), NOW + 10).unwrap();
        assert_eq!(event.event_ref, "evt_1");
        assert_eq!(event.subscription_ref(), Some("sub_1"));
    }

    #[test]
    fn rejects_signature_with_wrong_secret() {
        let other = SecretString::new("whsec_other".to_string());
        let header = sign_payload(&other, NOW, &payload());
        let err = verifier().verify_at(&payload(), &header, &secret(), NOW).unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::InvalidWebhook);
    }

    #[test]
    fn rejects_tampered_payload() {
        let header = sign_payload(&secret(), NOW, &payload());
        let mut tampered = payload();
        tampered.push(b' ');
        assert!(verifier().verify_at(&tampered, &header, &secret(), NOW).is_err());
    }

    #[test]
    fn rejects_expired_timestamp() {
        let header = sign_payload(&secret(), NOW, &payload());
        let result = verifier().verify_at(&payload(), &header, &secret(), NOW + 301);
        assert!(result.unwrap_err().message.contains("too old"));
    }

    #[test]
    fn custom_tolerance_is_honoured() {
        let header = sign_payload(&secret(), NOW, &payload());
        let verifier = verifier().with_tolerance_secs(600);
        assert!(verifier.verify_at(&payload(), &header, &secret(), NOW + 301).is_ok());
    }

    #[test]
    fn rejects_future_timestamp_beyond_skew() {
        let header = sign_payload(&secret(), NOW + 120, &payload());
        assert!(verifier().verify_at(&payload(), &header, &secret(), NOW).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        let err = verifier()
            .verify_at(&payload(), "garbage", &secret(), NOW)
            .unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::InvalidWebhook);
    }

    #[test]
    fn rejects_signed_but_invalid_json() {
        let body = b"not json".to_vec();
        let header = sign_payload(&secret(), NOW, &body);
        let err = verifier().verify_at(&body, &header, &secret(), NOW).unwrap_err();
        assert!(err.message.starts_with("Invalid JSON"));
    }
}
