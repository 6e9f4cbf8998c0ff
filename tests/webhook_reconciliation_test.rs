mod common;

use assert_matches::assert_matches;
use rust_decimal_macros::dec;
use uuid::Uuid;

use storefront_api::entities::OrderStatus;
use storefront_api::errors::ServiceError;
use storefront_api::services::orders::CreateOrderInput;
use storefront_api::services::webhooks::WebhookOutcome;

use common::{seed_product, spawn_app, stock_of, webhook_body, TestApp, VALID_SIGNATURE};

fn order_input() -> CreateOrderInput {
    CreateOrderInput {
        customer_id: Uuid::new_v4(),
        shipping_address: "1 Main St, Springfield".to_string(),
        payment_summary: "Visa ending 4242".to_string(),
    }
}

/// Seeds a product with 5 units, buys 2 at 17.50, and places the order.
/// The resulting charge is 35.00 + 5.00 delivery = 4000 minor units.
async fn place_pending_order(app: &TestApp) -> (Uuid, String, Uuid) {
    let product_id = seed_product(app, "Gadget", dec!(17.50), 5).await;
    let basket = app.state.baskets.create_basket(None).await.unwrap();
    app.state
        .baskets
        .add_item(basket.id, product_id, 2)
        .await
        .unwrap();
    let view = app.state.baskets.start_checkout(basket.id).await.unwrap();
    let intent_id = view.basket.payment_intent_id.clone().unwrap();
    let placed = app
        .state
        .orders
        .create_order(basket.id, order_input())
        .await
        .unwrap();
    (placed.order.id, intent_id, product_id)
}

#[tokio::test]
async fn successful_payment_marks_order_paid() {
    let app = spawn_app().await;
    let (order_id, intent_id, product_id) = place_pending_order(&app).await;

    let body = webhook_body("evt_1", Some(&intent_id), true, 4000, None);
    let outcome = app
        .state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap();
    assert_matches!(
        outcome,
        WebhookOutcome::Recorded {
            order_id: id,
            status: OrderStatus::Paid,
        } if id == order_id
    );

    let order = app.state.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.last_event_id.as_deref(), Some("evt_1"));
    // Payment success never touches stock.
    assert_eq!(stock_of(&app, product_id).await, 3);
}

#[tokio::test]
async fn redelivered_success_event_is_harmless() {
    let app = spawn_app().await;
    let (order_id, intent_id, product_id) = place_pending_order(&app).await;

    let body = webhook_body("evt_1", Some(&intent_id), true, 4000, None);
    app.state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap();
    let outcome = app
        .state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap();

    assert_matches!(
        outcome,
        WebhookOutcome::AlreadyProcessed { order_id: id } if id == order_id
    );
    let order = app.state.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(stock_of(&app, product_id).await, 3);
}

#[tokio::test]
async fn failed_payment_fails_order_and_restores_stock() {
    let app = spawn_app().await;
    let (order_id, intent_id, product_id) = place_pending_order(&app).await;
    assert_eq!(stock_of(&app, product_id).await, 3);

    let body = webhook_body("evt_9", Some(&intent_id), false, 0, Some("card declined"));
    let outcome = app
        .state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap();
    assert_matches!(
        outcome,
        WebhookOutcome::Recorded {
            status: OrderStatus::PaymentFailed,
            ..
        }
    );

    let order = app.state.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::PaymentFailed);
    assert_eq!(stock_of(&app, product_id).await, 5);

    // A late duplicate of the failure changes nothing further.
    let outcome = app
        .state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap();
    assert_matches!(outcome, WebhookOutcome::AlreadyProcessed { .. });
    assert_eq!(stock_of(&app, product_id).await, 5);
}

#[tokio::test]
async fn amount_mismatch_fails_order_but_keeps_stock() {
    let app = spawn_app().await;
    let (order_id, intent_id, product_id) = place_pending_order(&app).await;

    // Provider claims success but captured the wrong amount.
    let body = webhook_body("evt_5", Some(&intent_id), true, 3999, None);
    let err = app
        .state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::PaymentFailed(_));

    let order = app.state.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::PaymentFailed);
    // Money moved, so the discrepancy is left for a human; no restock.
    assert_eq!(stock_of(&app, product_id).await, 3);

    // Redelivery of the same mismatched event settles as already handled.
    let outcome = app
        .state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap();
    assert_matches!(outcome, WebhookOutcome::AlreadyProcessed { .. });
}

#[tokio::test]
async fn bad_signature_rejected_without_side_effects() {
    let app = spawn_app().await;
    let (order_id, intent_id, _) = place_pending_order(&app).await;

    let body = webhook_body("evt_1", Some(&intent_id), true, 4000, None);
    let err = app
        .state
        .webhooks
        .handle_webhook(&body, "forged")
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Unprocessable(_));

    let order = app.state.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn unknown_intent_rejected() {
    let app = spawn_app().await;
    place_pending_order(&app).await;

    let body = webhook_body("evt_1", Some("pi_nobody"), true, 4000, None);
    let err = app
        .state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Unprocessable(_));
}

#[tokio::test]
async fn event_without_intent_rejected() {
    let app = spawn_app().await;

    let body = webhook_body("evt_1", None, true, 4000, None);
    let err = app
        .state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Unprocessable(_));
}

#[tokio::test]
async fn lifecycle_continues_after_payment() {
    let app = spawn_app().await;
    let (order_id, intent_id, _) = place_pending_order(&app).await;

    // Shipping before payment is illegal and leaves the order untouched.
    assert_matches!(
        app.state.orders.mark_shipped(order_id).await,
        Err(ServiceError::InvalidOperation(_))
    );
    let order = app.state.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let body = webhook_body("evt_1", Some(&intent_id), true, 4000, None);
    app.state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap();

    let order = app.state.orders.mark_shipped(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
    let order = app.state.orders.mark_completed(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Completed);

    // Completed is terminal.
    assert_matches!(
        app.state.orders.cancel(order_id).await,
        Err(ServiceError::InvalidOperation(_))
    );
}

#[tokio::test]
async fn pending_order_can_be_cancelled() {
    let app = spawn_app().await;
    let (order_id, _, _) = place_pending_order(&app).await;

    let order = app.state.orders.cancel(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_matches!(
        app.state.orders.cancel(order_id).await,
        Err(ServiceError::InvalidOperation(_))
    );
}

#[tokio::test]
async fn cancel_racing_settlement_never_overwrites_paid() {
    let app = spawn_app().await;
    let (order_id, intent_id, _) = place_pending_order(&app).await;

    let body = webhook_body("evt_1", Some(&intent_id), true, 4000, None);
    let (cancel_result, webhook_result) = tokio::join!(
        app.state.orders.cancel(order_id),
        app.state.webhooks.handle_webhook(&body, VALID_SIGNATURE),
    );

    // Whichever write lands first wins; the loser must observe a
    // rejection instead of stamping over the winner's status.
    let order = app.state.orders.get_order(order_id).await.unwrap();
    match order.status {
        OrderStatus::Paid => {
            assert!(cancel_result.is_err());
            assert_matches!(
                webhook_result.unwrap(),
                WebhookOutcome::Recorded {
                    status: OrderStatus::Paid,
                    ..
                }
            );
        }
        OrderStatus::Cancelled => {
            assert!(cancel_result.is_ok());
            assert_matches!(
                webhook_result.unwrap(),
                WebhookOutcome::AlreadyProcessed { .. }
            );
        }
        other => panic!("unexpected terminal status {}", other),
    }
}

#[tokio::test]
async fn repeated_event_id_short_circuits() {
    let app = spawn_app().await;
    let (order_id, intent_id, _) = place_pending_order(&app).await;

    let body = webhook_body("evt_1", Some(&intent_id), true, 4000, None);
    app.state
        .webhooks
        .handle_webhook(&body, VALID_SIGNATURE)
        .await
        .unwrap();

    let applied = app
        .state
        .orders
        .mark_payment_succeeded(order_id, "evt_1")
        .await
        .unwrap();
    assert!(!applied);
}
