//! Payment gateway port.
//!
//! The storefront core talks to the payment provider only through the
//! [`PaymentGateway`] trait: creating/updating payment intents, looking up
//! coupons, and parsing signed webhook deliveries into a narrow event shape.

pub mod stripe;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

pub use stripe::StripeGateway;

/// Handle to an in-progress charge attempt at the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// Coupon record as the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCoupon {
    pub remote_id: String,
    pub amount_off: Option<Decimal>,
    pub percent_off: Option<Decimal>,
    pub active: bool,
}

/// A provider webhook delivery reduced to what the reconciler needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPaymentEvent {
    /// Provider-unique event id, recorded on the order for idempotency
    pub event_id: String,
    pub intent_id: Option<String>,
    pub succeeded: bool,
    pub status: String,
    pub amount_received_minor: i64,
    pub error: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment intent for the given amount, or updates the
    /// existing one when an intent id is supplied.
    async fn create_or_update_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        existing_intent_id: Option<&str>,
    ) -> Result<PaymentIntent, ServiceError>;

    /// Looks up a coupon by its public code. `None` when the provider has
    /// no such coupon.
    async fn coupon_by_code(&self, code: &str) -> Result<Option<GatewayCoupon>, ServiceError>;

    /// Asks the provider to compute the discount its coupon grants on the
    /// given base amount. Used as a cross-check against the local policy.
    async fn external_discount(
        &self,
        remote_coupon_id: &str,
        base_amount: Decimal,
    ) -> Result<Decimal, ServiceError>;

    /// Verifies the delivery signature and parses the raw body. Returns
    /// `Unprocessable` for bad signatures, malformed payloads, and event
    /// types the reconciler does not consume.
    fn parse_webhook(
        &self,
        raw_body: &str,
        signature: &str,
    ) -> Result<ParsedPaymentEvent, ServiceError>;
}
