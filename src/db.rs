use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::info;

use crate::config::AppConfig;
use crate::entities::{basket, basket_item, coupon, order, order_item, product};
use crate::errors::ServiceError;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool to the database.
pub async fn establish_connection(config: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!("Connected to database");
    Ok(db)
}

/// Creates the schema for every entity this crate owns. Idempotent, so it
/// is safe to run on every startup when `auto_migrate` is enabled.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    // Referenced tables first so foreign keys resolve.
    let mut stmt = schema.create_table_from_entity(product::Entity);
    db.execute(backend.build(stmt.if_not_exists())).await?;

    let mut stmt = schema.create_table_from_entity(coupon::Entity);
    db.execute(backend.build(stmt.if_not_exists())).await?;

    let mut stmt = schema.create_table_from_entity(basket::Entity);
    db.execute(backend.build(stmt.if_not_exists())).await?;

    let mut stmt = schema.create_table_from_entity(basket_item::Entity);
    db.execute(backend.build(stmt.if_not_exists())).await?;

    let mut stmt = schema.create_table_from_entity(order::Entity);
    db.execute(backend.build(stmt.if_not_exists())).await?;

    let mut stmt = schema.create_table_from_entity(order_item::Entity);
    db.execute(backend.build(stmt.if_not_exists())).await?;

    info!("Database schema is up to date");
    Ok(())
}
