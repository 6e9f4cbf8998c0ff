use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is
    /// closed. Used for post-commit notifications that must never roll
    /// back an already-committed transaction.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.send(event.clone()).await {
            warn!("Dropping event {:?}: {}", event, e);
        }
    }
}

// The events that can occur in the storefront core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Basket events
    BasketCreated(Uuid),
    BasketItemAdded {
        basket_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    BasketItemRemoved {
        basket_id: Uuid,
        product_id: Uuid,
    },
    CouponApplied {
        basket_id: Uuid,
        code: String,
    },
    CouponRemoved(Uuid),
    CheckoutStarted {
        basket_id: Uuid,
        payment_intent_id: String,
    },

    // Order events
    OrderCreated(Uuid),
    OrderPaid(Uuid),
    OrderPaymentFailed {
        order_id: Uuid,
        reason: String,
    },
    OrderShipped(Uuid),
    OrderCompleted(Uuid),
    OrderCancelled(Uuid),

    // Stock events
    StockRestored {
        order_id: Uuid,
    },
}

/// Consumes events from the channel and logs them. Downstream consumers
/// (mail, analytics) hang off this loop; the core only needs the channel
/// to exist so post-commit sends never block request handling.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!("Order created: {}", order_id);
            }
            Event::OrderPaid(order_id) => {
                info!("Order paid: {}", order_id);
            }
            Event::OrderPaymentFailed { order_id, reason } => {
                error!("Order {} payment failed: {}", order_id, reason);
            }
            Event::StockRestored { order_id } => {
                info!("Stock restored for order {}", order_id);
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    info!("Event processing loop stopped");
}
