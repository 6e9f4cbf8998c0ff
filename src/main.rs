use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

use storefront_api::events::{process_events, EventSender};
use storefront_api::payments::StripeGateway;
use storefront_api::{app_router, config, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(&cfg.log_level);
    info!(environment = %cfg.environment, "starting storefront API");

    let db = Arc::new(
        db::establish_connection(&cfg)
            .await
            .context("failed to connect to database")?,
    );
    if cfg.auto_migrate {
        db::create_schema(&db)
            .await
            .context("failed to create database schema")?;
    }

    let (tx, rx) = mpsc::channel(1024);
    tokio::spawn(process_events(rx));
    let event_sender = Arc::new(EventSender::new(tx));

    let gateway = Arc::new(StripeGateway::new(
        cfg.payment_api_base.clone(),
        cfg.payment_secret_key.clone(),
        cfg.payment_webhook_secret.clone(),
    ));

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let state = AppState::new(db, Arc::new(cfg), event_sender, gateway);
    let app = app_router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .await
        .context("server terminated")?;
    Ok(())
}
