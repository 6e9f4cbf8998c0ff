//! Storefront API Library
//!
//! Core checkout engine for an online storefront: basket management,
//! basket-to-order conversion with conditional stock decrements, and
//! idempotent reconciliation of payment provider webhook events.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod money;
pub mod payments;
pub mod services;

use std::sync::Arc;

use axum::Router;
use sea_orm::DatabaseConnection;
use serde::Serialize;

use crate::events::EventSender;
use crate::payments::PaymentGateway;
use crate::services::{
    baskets::BasketService, orders::OrderService, stock::StockService, webhooks::WebhookService,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub baskets: BasketService,
    pub orders: OrderService,
    pub webhooks: WebhookService,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<config::AppConfig>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let stock = StockService::new();
        let baskets = BasketService::new(
            db.clone(),
            event_sender.clone(),
            gateway.clone(),
            config.clone(),
        );
        let orders = OrderService::new(
            db.clone(),
            event_sender.clone(),
            stock.clone(),
            config.clone(),
        );
        let webhooks = WebhookService::new(
            db.clone(),
            event_sender.clone(),
            gateway,
            orders.clone(),
            stock,
        );

        Self {
            db,
            config,
            event_sender,
            baskets,
            orders,
            webhooks,
        }
    }
}

/// Builds the application router with all routes wired to `state`.
pub fn app_router(state: AppState) -> Router {
    handlers::router(state)
}

// Common response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
        }
    }
}
