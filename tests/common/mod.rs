#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::config::AppConfig;
use storefront_api::db;
use storefront_api::entities::product;
use storefront_api::errors::ServiceError;
use storefront_api::events::{process_events, EventSender};
use storefront_api::money;
use storefront_api::payments::{
    GatewayCoupon, ParsedPaymentEvent, PaymentGateway, PaymentIntent,
};
use storefront_api::AppState;

/// Signature the mock gateway accepts; anything else is rejected the way
/// a real signature check would reject it.
pub const VALID_SIGNATURE: &str = "test-signature";

/// In-memory stand-in for the payment provider. Intents are handed out
/// from a counter, coupons come from a map the test seeds, and webhook
/// bodies are the parsed event serialized as JSON.
pub struct MockGateway {
    coupons: Mutex<HashMap<String, GatewayCoupon>>,
    intent_counter: AtomicU64,
    fail_intents: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            coupons: Mutex::new(HashMap::new()),
            intent_counter: AtomicU64::new(0),
            fail_intents: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent intent create/update fail, simulating a
    /// provider outage.
    pub fn fail_intent_updates(&self) {
        self.fail_intents.store(true, Ordering::SeqCst);
    }

    pub fn add_coupon(
        &self,
        code: &str,
        amount_off: Option<Decimal>,
        percent_off: Option<Decimal>,
        active: bool,
    ) {
        let coupon = GatewayCoupon {
            remote_id: format!("rc_{}", code.to_lowercase()),
            amount_off,
            percent_off,
            active,
        };
        self.coupons
            .lock()
            .unwrap()
            .insert(code.to_string(), coupon);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_or_update_intent(
        &self,
        _amount_minor: i64,
        _currency: &str,
        existing_intent_id: Option<&str>,
    ) -> Result<PaymentIntent, ServiceError> {
        if self.fail_intents.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "payment provider unavailable".to_string(),
            ));
        }
        let intent_id = match existing_intent_id {
            Some(id) => id.to_string(),
            None => {
                let n = self.intent_counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!("pi_test_{}", n)
            }
        };
        Ok(PaymentIntent {
            client_secret: format!("{}_secret", intent_id),
            intent_id,
        })
    }

    async fn coupon_by_code(&self, code: &str) -> Result<Option<GatewayCoupon>, ServiceError> {
        Ok(self.coupons.lock().unwrap().get(code).cloned())
    }

    async fn external_discount(
        &self,
        remote_coupon_id: &str,
        base_amount: Decimal,
    ) -> Result<Decimal, ServiceError> {
        let coupons = self.coupons.lock().unwrap();
        let coupon = coupons
            .values()
            .find(|c| c.remote_id == remote_coupon_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::ExternalServiceError(format!(
                    "no coupon {}",
                    remote_coupon_id
                ))
            })?;
        drop(coupons);
        money::discount_amount(
            coupon.amount_off,
            coupon.percent_off,
            coupon.active,
            base_amount,
            remote_coupon_id,
        )
    }

    fn parse_webhook(
        &self,
        raw_body: &str,
        signature: &str,
    ) -> Result<ParsedPaymentEvent, ServiceError> {
        if signature != VALID_SIGNATURE {
            return Err(ServiceError::Unprocessable(
                "webhook signature mismatch".to_string(),
            ));
        }
        serde_json::from_str(raw_body)
            .map_err(|e| ServiceError::Unprocessable(format!("malformed webhook payload: {}", e)))
    }
}

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
}

/// Builds an application wired to an in-memory SQLite database. A single
/// pooled connection keeps the shared in-memory schema alive for the
/// lifetime of the test.
pub async fn spawn_app() -> TestApp {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        "127.0.0.1".to_string(),
        18080,
        "test".to_string(),
    );
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;

    let db = Arc::new(
        db::establish_connection(&cfg)
            .await
            .expect("test database"),
    );
    db::create_schema(&db).await.expect("test schema");

    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(process_events(rx));
    let event_sender = Arc::new(EventSender::new(tx));

    let gateway = Arc::new(MockGateway::new());
    let state = AppState::new(db, Arc::new(cfg), event_sender, gateway.clone());

    TestApp { state, gateway }
}

pub async fn seed_product(app: &TestApp, name: &str, unit_price: Decimal, stock: i32) -> Uuid {
    let now = Utc::now();
    let id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(id),
        name: Set(name.to_string()),
        unit_price: Set(unit_price),
        stock_quantity: Set(stock),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.state.db)
    .await
    .expect("seed product");
    id
}

pub async fn stock_of(app: &TestApp, product_id: Uuid) -> i32 {
    product::Entity::find_by_id(product_id)
        .one(&*app.state.db)
        .await
        .expect("query product")
        .expect("product exists")
        .stock_quantity
}

/// Serializes a provider event the way the mock gateway parses it.
pub fn webhook_body(
    event_id: &str,
    intent_id: Option<&str>,
    succeeded: bool,
    amount_received_minor: i64,
    error: Option<&str>,
) -> String {
    let event = ParsedPaymentEvent {
        event_id: event_id.to_string(),
        intent_id: intent_id.map(str::to_string),
        succeeded,
        status: if succeeded {
            "succeeded".to_string()
        } else {
            "requires_payment_method".to_string()
        },
        amount_received_minor,
        error: error.map(str::to_string),
    };
    serde_json::to_string(&event).expect("serialize webhook body")
}
