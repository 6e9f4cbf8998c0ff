/// Storefront entities
pub mod basket;
pub mod basket_item;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod product;

// Re-export entities
pub use basket::{Entity as Basket, Model as BasketModel};
pub use basket_item::{Entity as BasketItem, Model as BasketItemModel};
pub use coupon::{Entity as Coupon, Model as CouponModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use product::{Entity as Product, Model as ProductModel};
