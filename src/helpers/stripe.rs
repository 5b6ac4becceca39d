use ::stripe::{
    Client, CreatePaymentIntent, CreatePaymentIntentAutomaticPaymentMethods,
    CreatePaymentIntentAutomaticPaymentMethodsAllowRedirects, CreateRefund, Currency, PaymentIntentId,
    PaymentMethodId, Refund,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::errors::ApiError;

pub use ::stripe::{PaymentIntent, PaymentIntentStatus};

type HmacSha256 = Hmac<Sha256>;

/// Webhook timestamps older than this are rejected.
const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

/// Only the event type is required. The object is kept untyped because most event kinds
/// are ignored and their objects have nothing in common.
#[derive(Deserialize, Debug)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: WebhookData,
}

#[derive(Deserialize, Debug, Default)]
pub struct WebhookData {
    #[serde(default)]
    pub object: serde_json::Value,
}

impl WebhookEvent {
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id")?.as_str()
    }
}

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
}

fn currency_of(code: &str) -> Result<Currency, ApiError> {
    serde_json::from_value(serde_json::Value::String(code.to_ascii_lowercase()))
        .map_err(|_| ApiError::BadRequest(format!("unsupported currency {}", code)))
}

impl StripeClient {
    pub fn new(secret_key: String) -> Self {
        StripeClient {
            client: Client::new(secret_key),
        }
    }

    /// Creates and confirms a payment intent in one call.
    pub async fn charge(
        &self,
        amount_cents: i32,
        currency: &str,
        payment_method_id: &str,
        description: &str,
    ) -> Result<PaymentIntent, ApiError> {
        let payment_method = payment_method_id
            .parse::<PaymentMethodId>()
            .map_err(|e| ApiError::BadRequest(format!("invalid payment method: {}", e)))?;

        let mut params = CreatePaymentIntent::new(i64::from(amount_cents), currency_of(currency)?);
        params.payment_method = Some(payment_method);
        params.description = Some(description);
        params.confirm = Some(true);
        params.automatic_payment_methods = Some(CreatePaymentIntentAutomaticPaymentMethods {
            enabled: true,
            allow_redirects: Some(CreatePaymentIntentAutomaticPaymentMethodsAllowRedirects::Never),
        });

        Ok(PaymentIntent::create(&self.client, params).await?)
    }

    pub async fn refund(&self, payment_intent_id: &str) -> Result<Refund, ApiError> {
        let intent = payment_intent_id
            .parse::<PaymentIntentId>()
            .map_err(|e| ApiError::Payment(format!("stored payment reference is invalid: {}", e)))?;

        let mut params = CreateRefund::new();
        params.payment_intent = Some(intent);
        Ok(Refund::create(&self.client, params).await?)
    }
}

/// The client registered at startup, or 503 when no secret key was configured.
pub fn configured(client: &Option<StripeClient>) -> Result<&StripeClient, ApiError> {
    client.as_ref().ok_or(ApiError::Unavailable("stripe"))
}

fn signature_matches(secret: &str, timestamp: &str, payload: &[u8], signature: &str) -> bool {
    let provided = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&provided).is_ok()
}

/// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex hmac>`) against the raw payload.
pub fn verify_signature(secret: &str, header: &str, payload: &[u8], now: i64) -> bool {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp = match timestamp {
        Some(t) => t,
        None => return false,
    };

    match timestamp.parse::<i64>() {
        Ok(t) if (now - t).abs() <= SIGNATURE_TOLERANCE_SECONDS => {}
        _ => return false,
    }

    signatures
        .iter()
        .any(|signature| signature_matches(secret, timestamp, payload, signature))
}
