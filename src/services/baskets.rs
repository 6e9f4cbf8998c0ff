//! Basket management.
//!
//! Baskets are the mutable pre-purchase state: line items merge per
//! product, totals are recomputed after every mutation, and once checkout
//! has started the payment intent amount is kept in sync with the basket.
//! Every mutation runs in one transaction, and the intent sync happens
//! before commit, so a provider failure rolls the whole mutation back.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{basket, basket_item, coupon, product};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::money;
use crate::payments::PaymentGateway;

/// A basket together with its line items, as returned to callers.
#[derive(Debug, Serialize)]
pub struct BasketWithItems {
    pub basket: basket::Model,
    pub items: Vec<basket_item::Model>,
}

#[derive(Clone)]
pub struct BasketService {
    db: Arc<sea_orm::DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
}

impl BasketService {
    pub fn new(
        db: Arc<sea_orm::DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            config,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_basket(
        &self,
        customer_id: Option<Uuid>,
    ) -> Result<basket::Model, ServiceError> {
        let now = Utc::now();
        let model = basket::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            payment_intent_id: Set(None),
            client_secret: Set(None),
            coupon_id: Set(None),
            subtotal: Set(Decimal::ZERO),
            discount: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let basket = model.insert(&*self.db).await?;

        info!(basket_id = %basket.id, "created basket");
        self.event_sender
            .send_or_log(Event::BasketCreated(basket.id))
            .await;
        Ok(basket)
    }

    #[instrument(skip(self))]
    pub async fn get_basket(&self, basket_id: Uuid) -> Result<BasketWithItems, ServiceError> {
        let basket = self.load_basket(&*self.db, basket_id).await?;
        self.with_items(basket).await
    }

    /// Adds `quantity` of a product to the basket. A line already holding
    /// the product merges quantities instead of duplicating the row.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        basket_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<BasketWithItems, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be positive".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let basket = self.load_basket(&txn, basket_id).await?;

        let product = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;
        if product.unit_price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "Product {} has a negative price",
                product.name
            )));
        }

        let existing = basket_item::Entity::find()
            .filter(basket_item::Column::BasketId.eq(basket_id))
            .filter(basket_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        match existing {
            Some(line) => {
                let merged = line.quantity + quantity;
                let mut am: basket_item::ActiveModel = line.into();
                am.quantity = Set(merged);
                am.updated_at = Set(Utc::now());
                am.update(&txn).await?;
            }
            None => {
                let now = Utc::now();
                basket_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    basket_id: Set(basket_id),
                    product_id: Set(product_id),
                    product_name: Set(product.name.clone()),
                    unit_price: Set(product.unit_price),
                    quantity: Set(quantity),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        let basket = self.recalculate_totals(&txn, basket).await?;
        self.sync_intent(&basket).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::BasketItemAdded {
                basket_id,
                product_id,
                quantity,
            })
            .await;
        self.with_items(basket).await
    }

    /// Removes `quantity` of a product from the basket, or the whole line
    /// when no quantity is given or the quantity covers the line. Returns
    /// `false` when the basket holds no such line.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        basket_id: Uuid,
        product_id: Uuid,
        quantity: Option<i32>,
    ) -> Result<bool, ServiceError> {
        if let Some(q) = quantity {
            if q <= 0 {
                return Err(ServiceError::ValidationError(
                    "Quantity must be positive".to_string(),
                ));
            }
        }

        let txn = self.db.begin().await?;

        let basket = self.load_basket(&txn, basket_id).await?;

        let Some(line) = basket_item::Entity::find()
            .filter(basket_item::Column::BasketId.eq(basket_id))
            .filter(basket_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
        else {
            return Ok(false);
        };

        match quantity {
            Some(q) if q < line.quantity => {
                let remaining = line.quantity - q;
                let mut am: basket_item::ActiveModel = line.into();
                am.quantity = Set(remaining);
                am.updated_at = Set(Utc::now());
                am.update(&txn).await?;
            }
            _ => {
                basket_item::Entity::delete_by_id(line.id).exec(&txn).await?;
            }
        }

        let basket = self.recalculate_totals(&txn, basket).await?;
        self.sync_intent(&basket).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::BasketItemRemoved {
                basket_id,
                product_id,
            })
            .await;
        Ok(true)
    }

    /// Applies a coupon to the basket. Checkout must have started first so
    /// the provider intent can track the discounted amount. Applying the
    /// coupon already on the basket is a no-op; a different coupon
    /// replaces the current one.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        basket_id: Uuid,
        code: &str,
    ) -> Result<BasketWithItems, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code cannot be blank".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let basket = self.load_basket(&txn, basket_id).await?;
        if !basket.has_payment_intent() {
            return Err(ServiceError::InvalidOperation(
                "Coupons can only be applied after checkout has started".to_string(),
            ));
        }

        if let Some(current_id) = basket.coupon_id {
            if let Some(current) = coupon::Entity::find_by_id(current_id).one(&txn).await? {
                if current.code == code {
                    txn.commit().await?;
                    return self.with_items(basket).await;
                }
            }
        }

        let remote = self
            .gateway
            .coupon_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))?;
        if !remote.active {
            return Err(ServiceError::ValidationError(format!(
                "Coupon {} is not active",
                code
            )));
        }

        let local = self.upsert_coupon(&txn, code, &remote).await?;

        let mut am: basket::ActiveModel = basket.into();
        am.coupon_id = Set(Some(local.id));
        am.updated_at = Set(Utc::now());
        let basket = am.update(&txn).await?;

        let basket = self.recalculate_totals(&txn, basket).await?;
        self.sync_intent(&basket).await?;
        txn.commit().await?;

        // The provider's own computation is advisory; local policy is what
        // we charge. Divergence is logged for investigation.
        match self
            .gateway
            .external_discount(&local.remote_id, basket.subtotal)
            .await
        {
            Ok(external) if external != basket.discount => {
                warn!(
                    coupon = code,
                    local = %basket.discount,
                    external = %external,
                    "discount computed by provider diverges from local policy"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(coupon = code, "provider discount cross-check failed: {}", e),
        }

        self.event_sender
            .send_or_log(Event::CouponApplied {
                basket_id,
                code: code.to_string(),
            })
            .await;
        self.with_items(basket).await
    }

    /// Removes the basket's coupon. Returns `false` when none was applied.
    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, basket_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;

        let basket = self.load_basket(&txn, basket_id).await?;
        if basket.coupon_id.is_none() {
            return Ok(false);
        }

        let mut am: basket::ActiveModel = basket.into();
        am.coupon_id = Set(None);
        am.discount = Set(Decimal::ZERO);
        am.updated_at = Set(Utc::now());
        let basket = am.update(&txn).await?;

        let basket = self.recalculate_totals(&txn, basket).await?;
        self.sync_intent(&basket).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CouponRemoved(basket_id))
            .await;
        Ok(true)
    }

    /// Starts (or refreshes) checkout: creates a payment intent at the
    /// provider for the basket's chargeable total and records the handle
    /// on the basket. Rejects empty baskets.
    #[instrument(skip(self))]
    pub async fn start_checkout(&self, basket_id: Uuid) -> Result<BasketWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let basket = self.load_basket(&txn, basket_id).await?;
        let items = self.load_items(&txn, basket_id).await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(format!(
                "Basket {} is empty",
                basket_id
            )));
        }

        let basket = self.recalculate_totals(&txn, basket).await?;
        let amount_minor = money::to_minor_units(self.charge_total(&basket))?;

        let intent = self
            .gateway
            .create_or_update_intent(
                amount_minor,
                &self.config.currency,
                basket.payment_intent_id.as_deref(),
            )
            .await?;

        let mut am: basket::ActiveModel = basket.into();
        am.payment_intent_id = Set(Some(intent.intent_id.clone()));
        am.client_secret = Set(Some(intent.client_secret));
        am.updated_at = Set(Utc::now());
        let basket = am.update(&txn).await?;
        txn.commit().await?;

        info!(basket_id = %basket_id, intent = %intent.intent_id, "checkout started");
        self.event_sender
            .send_or_log(Event::CheckoutStarted {
                basket_id,
                payment_intent_id: intent.intent_id,
            })
            .await;

        Ok(BasketWithItems { basket, items })
    }

    /// Records the provider handle for the basket's charge attempt. Both
    /// parts must be non-blank.
    #[instrument(skip(self, client_secret))]
    pub async fn attach_payment_intent(
        &self,
        basket_id: Uuid,
        intent_id: &str,
        client_secret: &str,
    ) -> Result<basket::Model, ServiceError> {
        if intent_id.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Payment intent id cannot be blank".to_string(),
            ));
        }
        if client_secret.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Client secret cannot be blank".to_string(),
            ));
        }

        let basket = self.load_basket(&*self.db, basket_id).await?;
        let mut am: basket::ActiveModel = basket.into();
        am.payment_intent_id = Set(Some(intent_id.trim().to_string()));
        am.client_secret = Set(Some(client_secret.trim().to_string()));
        am.updated_at = Set(Utc::now());
        Ok(am.update(&*self.db).await?)
    }

    /// Detaches the payment intent, e.g. when a charge attempt is
    /// abandoned. Returns `false` when none was attached.
    #[instrument(skip(self))]
    pub async fn clear_payment_intent(&self, basket_id: Uuid) -> Result<bool, ServiceError> {
        let basket = self.load_basket(&*self.db, basket_id).await?;
        if !basket.has_payment_intent() {
            return Ok(false);
        }

        let mut am: basket::ActiveModel = basket.into();
        am.payment_intent_id = Set(None);
        am.client_secret = Set(None);
        am.updated_at = Set(Utc::now());
        am.update(&*self.db).await?;
        Ok(true)
    }

    /// Amount the customer would be charged right now.
    fn charge_total(&self, basket: &basket::Model) -> Decimal {
        let fee = money::delivery_fee(
            basket.subtotal,
            self.config.free_shipping_threshold_amount(),
            self.config.standard_delivery_fee_amount(),
        );
        basket.subtotal + fee - basket.discount
    }

    /// Recomputes subtotal and discount from the line items and persists
    /// them on the caller's transaction.
    async fn recalculate_totals<C: ConnectionTrait>(
        &self,
        conn: &C,
        basket: basket::Model,
    ) -> Result<basket::Model, ServiceError> {
        let items = self.load_items(conn, basket.id).await?;
        let subtotal: Decimal = items.iter().map(|i| i.line_total()).sum();

        let mut coupon_id = basket.coupon_id;
        let discount = match basket.coupon_id {
            Some(id) => match coupon::Entity::find_by_id(id).one(conn).await? {
                Some(c) => match money::calculate_discount(&c, subtotal) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(basket_id = %basket.id, "dropping coupon {}: {}", c.code, e);
                        coupon_id = None;
                        Decimal::ZERO
                    }
                },
                None => {
                    warn!(basket_id = %basket.id, "coupon row vanished, dropping");
                    coupon_id = None;
                    Decimal::ZERO
                }
            },
            None => Decimal::ZERO,
        };

        let mut am: basket::ActiveModel = basket.into();
        am.subtotal = Set(subtotal);
        am.discount = Set(discount);
        am.coupon_id = Set(coupon_id);
        am.updated_at = Set(Utc::now());
        Ok(am.update(conn).await?)
    }

    /// Pushes the current chargeable total to the provider when an intent
    /// is attached. Called before the mutation commits, so a provider
    /// failure rolls the basket change back and the intent never goes
    /// stale relative to stored state.
    async fn sync_intent(&self, basket: &basket::Model) -> Result<(), ServiceError> {
        if !basket.has_payment_intent() {
            return Ok(());
        }
        let amount_minor = money::to_minor_units(self.charge_total(basket))?;
        self.gateway
            .create_or_update_intent(
                amount_minor,
                &self.config.currency,
                basket.payment_intent_id.as_deref(),
            )
            .await?;
        Ok(())
    }

    /// Stores or refreshes the local copy of a provider coupon, keyed by
    /// its public code.
    async fn upsert_coupon<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        remote: &crate::payments::GatewayCoupon,
    ) -> Result<coupon::Model, ServiceError> {
        let existing = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(conn)
            .await?;

        let now = Utc::now();
        let model = match existing {
            Some(c) => {
                let mut am: coupon::ActiveModel = c.into();
                am.remote_id = Set(remote.remote_id.clone());
                am.amount_off = Set(remote.amount_off);
                am.percent_off = Set(remote.percent_off);
                am.active = Set(remote.active);
                am.updated_at = Set(now);
                am.update(conn).await?
            }
            None => {
                coupon::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    code: Set(code.to_string()),
                    remote_id: Set(remote.remote_id.clone()),
                    amount_off: Set(remote.amount_off),
                    percent_off: Set(remote.percent_off),
                    active: Set(remote.active),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(conn)
                .await?
            }
        };

        Ok(model)
    }

    async fn load_basket<C: ConnectionTrait>(
        &self,
        conn: &C,
        basket_id: Uuid,
    ) -> Result<basket::Model, ServiceError> {
        basket::Entity::find_by_id(basket_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Basket {} not found", basket_id)))
    }

    async fn load_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        basket_id: Uuid,
    ) -> Result<Vec<basket_item::Model>, ServiceError> {
        Ok(basket_item::Entity::find()
            .filter(basket_item::Column::BasketId.eq(basket_id))
            .order_by_asc(basket_item::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    async fn with_items(&self, basket: basket::Model) -> Result<BasketWithItems, ServiceError> {
        let items = self.load_items(&*self.db, basket.id).await?;
        Ok(BasketWithItems { basket, items })
    }
}
