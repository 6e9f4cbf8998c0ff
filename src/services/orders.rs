//! Order creation and lifecycle.
//!
//! Creating an order converts a basket in a single transaction: stock is
//! decremented conditionally, the order and its item snapshots are
//! inserted, and the basket is deleted. Any failure rolls the whole
//! conversion back, so stock is never partially consumed.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{basket, basket_item, order, order_item, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::money;
use crate::services::stock::{StockLine, StockService};

/// Fields the caller supplies when converting a basket into an order.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderInput {
    pub customer_id: Uuid,
    pub shipping_address: String,
    pub payment_summary: String,
}

/// An order together with its item snapshots.
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    stock: StockService,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        stock: StockService,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            stock,
            config,
        }
    }

    /// Converts a basket into a pending order.
    ///
    /// Preconditions: the basket exists, has at least one item, and
    /// checkout has started (a payment intent is attached). The whole
    /// conversion runs in one transaction.
    #[instrument(skip(self, input), fields(basket_id = %basket_id))]
    pub async fn create_order(
        &self,
        basket_id: Uuid,
        input: CreateOrderInput,
    ) -> Result<OrderWithItems, ServiceError> {
        if input.shipping_address.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Shipping address cannot be blank".to_string(),
            ));
        }
        if input.payment_summary.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Payment summary cannot be blank".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let basket = basket::Entity::find_by_id(basket_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Basket {} not found", basket_id)))?;

        let items = basket_item::Entity::find()
            .filter(basket_item::Column::BasketId.eq(basket_id))
            .order_by_asc(basket_item::Column::CreatedAt)
            .all(&txn)
            .await?;
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(format!(
                "Basket {} is empty",
                basket_id
            )));
        }

        let payment_intent_id = basket
            .payment_intent_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::InvalidOperation(format!(
                    "Basket {} has no payment intent; start checkout first",
                    basket_id
                ))
            })?
            .to_string();

        let stock_lines: Vec<StockLine> = items
            .iter()
            .map(|i| StockLine {
                product_id: i.product_id,
                product_name: i.product_name.clone(),
                quantity: i.quantity,
            })
            .collect();
        self.stock
            .decrement_for_checkout(&txn, &stock_lines)
            .await?;

        let subtotal: Decimal = items.iter().map(|i| i.line_total()).sum();
        let delivery_fee = money::delivery_fee(
            subtotal,
            self.config.free_shipping_threshold_amount(),
            self.config.standard_delivery_fee_amount(),
        );

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(input.customer_id),
            shipping_address: Set(input.shipping_address.trim().to_string()),
            payment_summary: Set(input.payment_summary.trim().to_string()),
            payment_intent_id: Set(payment_intent_id),
            subtotal: Set(subtotal),
            delivery_fee: Set(delivery_fee),
            discount: Set(basket.discount),
            status: Set(OrderStatus::Pending),
            last_event_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            tracing::error!("order insert failed: {}", e);
            ServiceError::InvalidOperation("Order could not be created".to_string())
        })?;

        let mut order_items = Vec::with_capacity(items.len());
        for item in &items {
            let snapshot = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
                created_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(|e| {
                tracing::error!("order item insert failed: {}", e);
                ServiceError::InvalidOperation("Order could not be created".to_string())
            })?;
            order_items.push(snapshot);
        }

        basket_item::Entity::delete_many()
            .filter(basket_item::Column::BasketId.eq(basket_id))
            .exec(&txn)
            .await?;
        basket::Entity::delete_by_id(basket_id).exec(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, basket_id = %basket_id, "order created");
        self.event_sender
            .send_or_log(Event::OrderCreated(order_id))
            .await;

        Ok(OrderWithItems {
            order,
            items: order_items,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    #[instrument(skip(self))]
    pub async fn get_order_with_items(
        &self,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = self.get_order(order_id).await?;
        let items = self.order_items(order_id).await?;
        Ok(OrderWithItems { order, items })
    }

    pub async fn order_items(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<order_item::Model>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?)
    }

    /// Looks up the order a payment intent belongs to. Intent ids are
    /// unique per order.
    #[instrument(skip(self))]
    pub async fn find_by_payment_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(intent_id))
            .one(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn list_orders_for_customer(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let per_page = per_page.clamp(1, 100);
        Ok(order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page)
            .fetch_page(page)
            .await?)
    }

    pub async fn mark_shipped(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.transition(order_id, OrderStatus::Shipped).await
    }

    pub async fn mark_completed(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.transition(order_id, OrderStatus::Completed).await
    }

    pub async fn cancel(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.transition(order_id, OrderStatus::Cancelled).await
    }

    /// Moves an order along the lifecycle state machine. Illegal
    /// transitions are rejected without touching the row.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let order = self.get_order(order_id).await?;
        if !order.status.can_transition_to(target) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} cannot move from {} to {}",
                order_id, order.status, target
            )));
        }

        // Guarded on the status the transition was validated against, so a
        // settlement that lands between the read and this write cannot be
        // silently overwritten.
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(target))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(order.status))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order {} was updated concurrently; transition to {} not applied",
                order_id, target
            )));
        }
        let order = self.get_order(order_id).await?;

        let event = match target {
            OrderStatus::Paid => Some(Event::OrderPaid(order_id)),
            OrderStatus::Shipped => Some(Event::OrderShipped(order_id)),
            OrderStatus::Completed => Some(Event::OrderCompleted(order_id)),
            OrderStatus::Cancelled => Some(Event::OrderCancelled(order_id)),
            _ => None,
        };
        if let Some(event) = event {
            self.event_sender.send_or_log(event).await;
        }

        Ok(order)
    }

    /// Marks an order paid in response to a provider event. Returns
    /// `false` when the order had already left `Pending`, which makes
    /// redelivered events harmless.
    #[instrument(skip(self))]
    pub async fn mark_payment_succeeded(
        &self,
        order_id: Uuid,
        external_event_id: &str,
    ) -> Result<bool, ServiceError> {
        let order = self.get_order(order_id).await?;
        if order.last_event_id.as_deref() == Some(external_event_id) {
            return Ok(false);
        }

        let applied = apply_payment_transition(
            &*self.db,
            order_id,
            OrderStatus::Paid,
            external_event_id,
        )
        .await?;
        if applied {
            self.event_sender
                .send_or_log(Event::OrderPaid(order_id))
                .await;
        }
        Ok(applied)
    }
}

/// Applies a payment-driven status change guarded on the order still being
/// `Pending`. The guard makes the operation idempotent under redelivery
/// and safe under concurrent webhook handling: exactly one delivery moves
/// the order, the rest see zero rows affected.
pub async fn apply_payment_transition<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    target: OrderStatus,
    external_event_id: &str,
) -> Result<bool, ServiceError> {
    let result = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(target))
        .col_expr(
            order::Column::LastEventId,
            Expr::value(Some(external_event_id.to_string())),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(order_id))
        .filter(order::Column::Status.eq(OrderStatus::Pending))
        .exec(conn)
        .await?;

    Ok(result.rows_affected > 0)
}
