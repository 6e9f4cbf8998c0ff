pub mod baskets;
pub mod orders;
pub mod stock;
pub mod webhooks;
