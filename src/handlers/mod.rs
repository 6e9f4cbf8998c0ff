//! HTTP surface.
//!
//! Thin axum handlers: decode the request, call the matching service, wrap
//! the result. All error mapping lives in `ServiceError::into_response`.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::order;
use crate::errors::ServiceError;
use crate::services::baskets::BasketWithItems;
use crate::services::orders::{CreateOrderInput, OrderWithItems};
use crate::services::webhooks::WebhookOutcome;
use crate::{ApiResponse, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/baskets", post(create_basket))
        .route("/baskets/:id", get(get_basket))
        .route("/baskets/:id/items", post(add_item))
        .route("/baskets/:id/items/:product_id", delete(remove_item))
        .route("/baskets/:id/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/baskets/:id/checkout", post(start_checkout))
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/ship", post(ship_order))
        .route("/orders/:id/complete", post(complete_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/webhooks/payments", post(payment_webhook))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct CreateBasketRequest {
    customer_id: Option<Uuid>,
}

async fn create_basket(
    State(state): State<AppState>,
    Json(req): Json<CreateBasketRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let basket = state.baskets.create_basket(req.customer_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(basket))))
}

async fn get_basket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<BasketWithItems>>, ServiceError> {
    let basket = state.baskets.get_basket(id).await?;
    Ok(Json(ApiResponse::ok(basket)))
}

#[derive(Debug, Deserialize)]
struct AddItemRequest {
    product_id: Uuid,
    quantity: i32,
}

async fn add_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AddItemRequest>,
) -> Result<Json<ApiResponse<BasketWithItems>>, ServiceError> {
    let basket = state
        .baskets
        .add_item(id, req.product_id, req.quantity)
        .await?;
    Ok(Json(ApiResponse::ok(basket)))
}

#[derive(Debug, Deserialize)]
struct RemoveItemQuery {
    quantity: Option<i32>,
}

async fn remove_item(
    State(state): State<AppState>,
    Path((id, product_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<RemoveItemQuery>,
) -> Result<Json<ApiResponse<bool>>, ServiceError> {
    let removed = state
        .baskets
        .remove_item(id, product_id, query.quantity)
        .await?;
    let message = if removed {
        "Item removed"
    } else {
        "Basket holds no such item"
    };
    Ok(Json(ApiResponse::ok_with_message(removed, message)))
}

#[derive(Debug, Deserialize)]
struct ApplyCouponRequest {
    code: String,
}

async fn apply_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ApplyCouponRequest>,
) -> Result<Json<ApiResponse<BasketWithItems>>, ServiceError> {
    let basket = state.baskets.apply_coupon(id, &req.code).await?;
    Ok(Json(ApiResponse::ok(basket)))
}

async fn remove_coupon(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<bool>>, ServiceError> {
    let removed = state.baskets.remove_coupon(id).await?;
    let message = if removed {
        "Coupon removed"
    } else {
        "No coupon applied"
    };
    Ok(Json(ApiResponse::ok_with_message(removed, message)))
}

async fn start_checkout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<BasketWithItems>>, ServiceError> {
    let basket = state.baskets.start_checkout(id).await?;
    Ok(Json(ApiResponse::ok(basket)))
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    basket_id: Uuid,
    customer_id: Uuid,
    shipping_address: String,
    payment_summary: String,
}

async fn create_order(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .orders
        .create_order(
            req.basket_id,
            CreateOrderInput {
                customer_id: req.customer_id,
                shipping_address: req.shipping_address,
                payment_summary: req.payment_summary,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(order))))
}

#[derive(Debug, Deserialize)]
struct ListOrdersQuery {
    customer_id: Uuid,
    #[serde(default)]
    page: u64,
    #[serde(default = "default_per_page")]
    per_page: u64,
}

fn default_per_page() -> u64 {
    20
}

async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<order::Model>>>, ServiceError> {
    let orders = state
        .orders
        .list_orders_for_customer(query.customer_id, query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::ok(orders)))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state.orders.get_order_with_items(id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

async fn ship_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.orders.mark_shipped(id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

async fn complete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.orders.mark_completed(id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.orders.cancel(id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

/// Receives provider webhook deliveries. The raw body is consumed as-is
/// because the signature covers the exact bytes sent.
async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<ApiResponse<WebhookOutcome>>, ServiceError> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ServiceError::Unprocessable("Missing stripe-signature header".to_string())
        })?;

    let outcome = state.webhooks.handle_webhook(&body, signature).await?;
    Ok(Json(ApiResponse::ok(outcome)))
}
