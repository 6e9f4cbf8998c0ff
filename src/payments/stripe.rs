use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::instrument;

use crate::errors::ServiceError;
use crate::money;
use crate::payments::{GatewayCoupon, ParsedPaymentEvent, PaymentGateway, PaymentIntent};

type HmacSha256 = Hmac<Sha256>;

/// Webhook deliveries older than this are rejected to blunt replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

/// Stripe-backed implementation of the payment gateway port.
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
}

impl StripeGateway {
    pub fn new(api_base: String, secret_key: String, webhook_secret: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
            api_base,
            secret_key,
            webhook_secret,
        }
    }

    /// Verifies the `t=...,v1=...` signature header against the payload.
    /// Signatures are HMAC-SHA256 over `"{timestamp}.{body}"`.
    fn verify_signature(&self, payload: &str, header: &str) -> Result<(), ServiceError> {
        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            ServiceError::Unprocessable("webhook signature header has no timestamp".to_string())
        })?;
        if candidates.is_empty() {
            return Err(ServiceError::Unprocessable(
                "webhook signature header has no v1 signature".to_string(),
            ));
        }
        if (Utc::now().timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(ServiceError::Unprocessable(
                "webhook signature timestamp outside tolerance".to_string(),
            ));
        }

        let signed_payload = format!("{}.{}", timestamp, payload);
        for candidate in candidates {
            let Ok(bytes) = hex::decode(candidate) else {
                continue;
            };
            let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
                .expect("HMAC can take key of any size");
            mac.update(signed_payload.as_bytes());
            if mac.verify_slice(&bytes).is_ok() {
                return Ok(());
            }
        }

        Err(ServiceError::Unprocessable(
            "webhook signature mismatch".to_string(),
        ))
    }

    async fn fetch_coupon(&self, id: &str) -> Result<Option<CouponResponse>, ServiceError> {
        let url = format!("{}/coupons/{}", self.api_base, id);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("coupon lookup failed: {}", e))
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "payment provider returned {} for coupon lookup",
                response.status()
            )));
        }

        let coupon: CouponResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("malformed coupon response: {}", e))
        })?;
        Ok(Some(coupon))
    }
}

#[async_trait::async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self))]
    async fn create_or_update_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        existing_intent_id: Option<&str>,
    ) -> Result<PaymentIntent, ServiceError> {
        let url = match existing_intent_id {
            Some(id) => format!("{}/payment_intents/{}", self.api_base, id),
            None => format!("{}/payment_intents", self.api_base),
        };
        let params = [
            ("amount", amount_minor.to_string()),
            ("currency", currency.to_string()),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("payment intent request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "payment provider returned {} for intent request",
                response.status()
            )));
        }

        let intent: IntentResponse = response.json().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("malformed intent response: {}", e))
        })?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            ServiceError::ExternalServiceError(
                "payment provider returned no client secret".to_string(),
            )
        })?;

        Ok(PaymentIntent {
            intent_id: intent.id,
            client_secret,
        })
    }

    #[instrument(skip(self))]
    async fn coupon_by_code(&self, code: &str) -> Result<Option<GatewayCoupon>, ServiceError> {
        let Some(coupon) = self.fetch_coupon(code).await? else {
            return Ok(None);
        };

        let amount_off = coupon.amount_off.map(|minor| Decimal::new(minor, 2));
        let percent_off = match coupon.percent_off {
            Some(p) => Some(Decimal::from_f64_retain(p).ok_or_else(|| {
                ServiceError::ExternalServiceError(format!(
                    "provider reported an unrepresentable percentage for coupon {}",
                    code
                ))
            })?),
            None => None,
        };

        Ok(Some(GatewayCoupon {
            remote_id: coupon.id,
            amount_off,
            percent_off,
            active: coupon.valid,
        }))
    }

    #[instrument(skip(self))]
    async fn external_discount(
        &self,
        remote_coupon_id: &str,
        base_amount: Decimal,
    ) -> Result<Decimal, ServiceError> {
        let coupon = self.fetch_coupon(remote_coupon_id).await?.ok_or_else(|| {
            ServiceError::ExternalServiceError(format!(
                "provider has no coupon {}",
                remote_coupon_id
            ))
        })?;

        let amount_off = coupon.amount_off.map(|minor| Decimal::new(minor, 2));
        let percent_off = coupon
            .percent_off
            .and_then(Decimal::from_f64_retain);
        money::discount_amount(amount_off, percent_off, coupon.valid, base_amount, remote_coupon_id)
    }

    fn parse_webhook(
        &self,
        raw_body: &str,
        signature: &str,
    ) -> Result<ParsedPaymentEvent, ServiceError> {
        self.verify_signature(raw_body, signature)?;

        let envelope: WebhookEnvelope = serde_json::from_str(raw_body).map_err(|e| {
            ServiceError::Unprocessable(format!("malformed webhook payload: {}", e))
        })?;

        let succeeded = match envelope.kind.as_str() {
            EVENT_PAYMENT_SUCCEEDED => true,
            EVENT_PAYMENT_FAILED => false,
            other => {
                return Err(ServiceError::Unprocessable(format!(
                    "unsupported webhook event type {}",
                    other
                )))
            }
        };

        let object = envelope.data.object;
        Ok(ParsedPaymentEvent {
            event_id: envelope.id,
            intent_id: object.id,
            succeeded,
            status: object.status.unwrap_or_default(),
            amount_received_minor: object.amount_received,
            error: object.last_payment_error.and_then(|e| e.message),
        })
    }
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CouponResponse {
    id: String,
    amount_off: Option<i64>,
    percent_off: Option<f64>,
    valid: bool,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: IntentObject,
}

#[derive(Debug, Deserialize)]
struct IntentObject {
    id: Option<String>,
    status: Option<String>,
    #[serde(default)]
    amount_received: i64,
    last_payment_error: Option<PaymentErrorObject>,
}

#[derive(Debug, Deserialize)]
struct PaymentErrorObject {
    message: Option<String>,
}
