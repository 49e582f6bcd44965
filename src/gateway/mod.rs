//! Payment gateway client.
//!
//! The gateway is an external collaborator; this module holds the contract
//! (intent creation and the HMAC signature schemes) and an HTTP
//! implementation. Services depend on the trait so tests can substitute a
//! fake without a runtime registry.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::instrument;

use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// A gateway-side object representing "expect a payment of amount X".
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub intent_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment intent for `amount_minor` minor units (e.g. paise).
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<PaymentIntent, ServiceError>;
}

/// Computes the signature the gateway hands to a paying client:
/// `HMAC-SHA256(secret, intent_id + "|" + payment_id)`, hex-encoded.
pub fn payment_signature(secret: &str, intent_id: &str, payment_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(intent_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies a client-submitted payment signature.
pub fn verify_payment_signature(
    secret: &str,
    intent_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    constant_time_eq(&payment_signature(secret, intent_id, payment_id), signature)
}

/// Verifies the webhook header signature: `HMAC-SHA256(secret, body)`,
/// hex-encoded.
pub fn verify_webhook_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// HTTP implementation of the gateway contract.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, key_id: String, key_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            key_id,
            key_secret,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateIntentResponse {
    id: String,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self), fields(amount_minor, currency, receipt))]
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<PaymentIntent, ServiceError> {
        let url = format!("{}/v1/orders", self.base_url);
        let body = json!({
            "amount": amount_minor,
            "currency": currency,
            "receipt": receipt,
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway request: {e}")))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {}",
                response.status()
            )));
        }

        let parsed: CreateIntentResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway response: {e}")))?;

        Ok(PaymentIntent {
            intent_id: parsed.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_signature_round_trip() {
        let sig = payment_signature("secret", "intent_1", "pay_1");
        assert!(verify_payment_signature("secret", "intent_1", "pay_1", &sig));
        assert!(!verify_payment_signature("secret", "intent_1", "pay_2", &sig));
        assert!(!verify_payment_signature("other", "intent_1", "pay_1", &sig));
    }

    #[test]
    fn payment_signature_is_hex_and_stable() {
        let a = payment_signature("s", "i", "p");
        let b = payment_signature("s", "i", "p");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn webhook_signature_verifies_raw_body() {
        let body = br#"{"event":"payment.captured"}"#;
        let mut mac = HmacSha256::new_from_slice(b"whsec").unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_webhook_signature("whsec", body, &sig));
        assert!(!verify_webhook_signature("whsec", b"{}", &sig));
    }
}
