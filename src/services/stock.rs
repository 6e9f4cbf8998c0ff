//! Stock ledger.
//!
//! Availability is never checked up front. Decrements are conditional
//! updates (`stock_quantity >= needed`) so concurrent checkouts race at
//! the database row, and at most one wins the last unit.

use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::entities::{order_item, product};
use crate::errors::ServiceError;

/// One product decrement requested by a checkout.
#[derive(Debug, Clone)]
pub struct StockLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
}

/// Stateless: every operation runs on the caller's connection so the
/// caller controls the transaction boundary.
#[derive(Clone, Default)]
pub struct StockService;

impl StockService {
    pub fn new() -> Self {
        Self
    }

    /// Decrements stock for every line, failing on the first product with
    /// insufficient stock. Must run inside the caller's transaction so a
    /// failure rolls back the decrements that already went through.
    #[instrument(skip(self, conn, lines), fields(lines = lines.len()))]
    pub async fn decrement_for_checkout<C: ConnectionTrait>(
        &self,
        conn: &C,
        lines: &[StockLine],
    ) -> Result<(), ServiceError> {
        for line in lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for {} must be positive",
                    line.product_name
                )));
            }

            // Decrement only when enough stock remains. Zero rows affected
            // means another checkout got there first or stock was short.
            let result = product::Entity::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).sub(line.quantity),
                )
                .filter(product::Column::Id.eq(line.product_id))
                .filter(product::Column::StockQuantity.gte(line.quantity))
                .exec(conn)
                .await?;

            if result.rows_affected == 0 {
                warn!(
                    product_id = %line.product_id,
                    needed = line.quantity,
                    "insufficient stock"
                );
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for {}",
                    line.product_name
                )));
            }
        }

        Ok(())
    }

    /// Returns the stock an order consumed, line by line. Used when the
    /// provider reports the payment failed.
    #[instrument(skip(self, conn, items), fields(items = items.len()))]
    pub async fn restore_for_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        items: &[order_item::Model],
    ) -> Result<(), ServiceError> {
        for item in items {
            let result = product::Entity::update_many()
                .col_expr(
                    product::Column::StockQuantity,
                    Expr::col(product::Column::StockQuantity).add(item.quantity),
                )
                .filter(product::Column::Id.eq(item.product_id))
                .exec(conn)
                .await?;

            if result.rows_affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "Product {} no longer exists",
                    item.product_id
                )));
            }

            info!(
                product_id = %item.product_id,
                quantity = item.quantity,
                "restored stock"
            );
        }

        Ok(())
    }
}
