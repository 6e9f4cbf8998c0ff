use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order entity
///
/// Immutable after creation except through explicit status transitions.
/// Orders are never deleted; they are the audit record of a purchase.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub customer_id: Uuid,
    pub shipping_address: String,
    /// Display snapshot of the payment instrument, e.g. "Visa ending 4242"
    pub payment_summary: String,
    #[sea_orm(unique)]
    pub payment_intent_id: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub delivery_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount: Decimal,
    pub status: OrderStatus,
    /// Id of the last provider event applied to this order, for idempotency
    #[sea_orm(nullable)]
    pub last_event_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Amount the customer is charged. Always >= 0 because the discount is
    /// clamped to the subtotal when it is computed.
    pub fn total(&self) -> Decimal {
        self.subtotal + self.delivery_fee - self.discount
    }
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "payment_failed")]
    PaymentFailed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::PaymentFailed => "payment_failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// The only legal transitions. Everything else is rejected without
    /// mutating the order.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, PaymentFailed)
                | (Pending, Cancelled)
                | (Paid, Shipped)
                | (Shipped, Completed)
        )
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        use OrderStatus::*;
        matches!(self, Completed | PaymentFailed | Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn legal_transitions() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(PaymentFailed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Paid.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Completed));
    }

    #[test]
    fn illegal_transitions_rejected() {
        use OrderStatus::*;
        // Shipping requires payment first
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Pending.can_transition_to(Completed));
        // Terminal states accept nothing
        for next in [Pending, Paid, Shipped, Completed, PaymentFailed, Cancelled] {
            assert!(!Completed.can_transition_to(next));
            assert!(!PaymentFailed.can_transition_to(next));
            assert!(!Cancelled.can_transition_to(next));
        }
        // No going backwards
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Shipped.can_transition_to(Paid));
        // Paid orders can no longer be cancelled through this machine
        assert!(!Paid.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_states() {
        use OrderStatus::*;
        assert!(Completed.is_terminal());
        assert!(PaymentFailed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Paid.is_terminal());
        assert!(!Shipped.is_terminal());
    }

    #[test]
    fn total_formula() {
        let order = Model {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            shipping_address: "1 Main St".into(),
            payment_summary: "Visa ending 4242".into(),
            payment_intent_id: "pi_1".into(),
            subtotal: dec!(35.00),
            delivery_fee: dec!(5.00),
            discount: dec!(3.50),
            status: OrderStatus::Pending,
            last_event_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(order.total(), dec!(36.50));
    }
}
