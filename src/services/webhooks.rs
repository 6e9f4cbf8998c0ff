//! Payment webhook reconciliation.
//!
//! Provider deliveries are verified, matched to an order by payment
//! intent, and applied through the pending-guarded transition so that
//! redelivered and concurrently-delivered events settle each order
//! exactly once.

use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::{basket, basket_item, order_item, OrderStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::money;
use crate::payments::PaymentGateway;
use crate::services::orders::{apply_payment_transition, OrderService};
use crate::services::stock::StockService;

/// What a webhook delivery did to its order.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The event moved the order to a new status.
    Recorded {
        order_id: Uuid,
        status: OrderStatus,
    },
    /// The order had already left `Pending`; the delivery changed nothing.
    AlreadyProcessed { order_id: Uuid },
}

#[derive(Clone)]
pub struct WebhookService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    orders: OrderService,
    stock: StockService,
}

impl WebhookService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        orders: OrderService,
        stock: StockService,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            orders,
            stock,
        }
    }

    /// Verifies and applies one webhook delivery.
    ///
    /// Deliveries that cannot be attributed to an order are rejected as
    /// `Unprocessable` so the provider retries or surfaces them; they are
    /// never silently dropped.
    #[instrument(skip(self, raw_body, signature))]
    pub async fn handle_webhook(
        &self,
        raw_body: &str,
        signature: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        let event = self.gateway.parse_webhook(raw_body, signature)?;

        let intent_id = event
            .intent_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::Unprocessable(format!(
                    "Event {} carries no payment intent id",
                    event.event_id
                ))
            })?
            .to_string();

        let order = self
            .orders
            .find_by_payment_intent(&intent_id)
            .await?
            .ok_or_else(|| {
                ServiceError::Unprocessable(format!(
                    "No order for payment intent {}",
                    intent_id
                ))
            })?;

        if event.succeeded {
            let expected_minor = money::to_minor_units(order.total())?;
            if event.amount_received_minor != expected_minor {
                return self
                    .settle_amount_mismatch(
                        order.id,
                        &event.event_id,
                        expected_minor,
                        event.amount_received_minor,
                    )
                    .await;
            }
            self.settle_success(order.id, &intent_id, &event.event_id)
                .await
        } else {
            let reason = event
                .error
                .unwrap_or_else(|| format!("provider status {}", event.status));
            self.settle_failure(order.id, &event.event_id, reason).await
        }
    }

    /// Payment succeeded for the right amount: mark the order paid and
    /// discard any basket still tracking the intent.
    async fn settle_success(
        &self,
        order_id: Uuid,
        intent_id: &str,
        external_event_id: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let applied =
            apply_payment_transition(&txn, order_id, OrderStatus::Paid, external_event_id).await?;
        if !applied {
            return Ok(WebhookOutcome::AlreadyProcessed { order_id });
        }

        // Normally the basket was deleted at order creation; this covers
        // baskets that still reference the intent.
        let baskets = basket::Entity::find()
            .filter(basket::Column::PaymentIntentId.eq(intent_id))
            .all(&txn)
            .await?;
        for b in &baskets {
            basket_item::Entity::delete_many()
                .filter(basket_item::Column::BasketId.eq(b.id))
                .exec(&txn)
                .await?;
        }
        basket::Entity::delete_many()
            .filter(basket::Column::PaymentIntentId.eq(intent_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        info!(order_id = %order_id, "order paid");
        self.event_sender
            .send_or_log(Event::OrderPaid(order_id))
            .await;
        Ok(WebhookOutcome::Recorded {
            order_id,
            status: OrderStatus::Paid,
        })
    }

    /// Payment failed at the provider: fail the order and return its
    /// stock to the ledger in the same transaction.
    async fn settle_failure(
        &self,
        order_id: Uuid,
        external_event_id: &str,
        reason: String,
    ) -> Result<WebhookOutcome, ServiceError> {
        let txn = self.db.begin().await?;

        let applied = apply_payment_transition(
            &txn,
            order_id,
            OrderStatus::PaymentFailed,
            external_event_id,
        )
        .await?;
        if !applied {
            return Ok(WebhookOutcome::AlreadyProcessed { order_id });
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        self.stock.restore_for_order(&txn, &items).await?;

        txn.commit().await?;

        warn!(order_id = %order_id, reason = %reason, "order payment failed");
        self.event_sender
            .send_or_log(Event::OrderPaymentFailed {
                order_id,
                reason,
            })
            .await;
        self.event_sender
            .send_or_log(Event::StockRestored { order_id })
            .await;
        Ok(WebhookOutcome::Recorded {
            order_id,
            status: OrderStatus::PaymentFailed,
        })
    }

    /// The provider captured a different amount than the order charges.
    /// The order is failed, but stock is kept: the money moved, so the
    /// discrepancy needs a human, not an automatic restock.
    async fn settle_amount_mismatch(
        &self,
        order_id: Uuid,
        external_event_id: &str,
        expected_minor: i64,
        received_minor: i64,
    ) -> Result<WebhookOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let applied = apply_payment_transition(
            &txn,
            order_id,
            OrderStatus::PaymentFailed,
            external_event_id,
        )
        .await?;
        txn.commit().await?;

        if !applied {
            return Ok(WebhookOutcome::AlreadyProcessed { order_id });
        }

        let reason = format!(
            "Amount mismatch: expected {} minor units, provider captured {}",
            expected_minor, received_minor
        );
        warn!(order_id = %order_id, "{}", reason);
        self.event_sender
            .send_or_log(Event::OrderPaymentFailed {
                order_id,
                reason: reason.clone(),
            })
            .await;

        Err(ServiceError::PaymentFailed(reason))
    }
}
