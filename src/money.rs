//! Money and discount policy.
//!
//! Percent discounts round to 2 decimal places with midpoint-away-from-zero
//! rounding. This matches the amounts the payment provider charges, so the
//! rule must not drift toward banker's rounding.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::entities::coupon;
use crate::errors::ServiceError;

/// Computes the discount a coupon grants on a subtotal.
///
/// Amount-off coupons never discount more than the subtotal. Percent-off
/// coupons take `round(subtotal * pct / 100, 2)` away from zero, clamped
/// to the subtotal.
pub fn calculate_discount(coupon: &coupon::Model, subtotal: Decimal) -> Result<Decimal, ServiceError> {
    discount_amount(
        coupon.amount_off,
        coupon.percent_off,
        coupon.active,
        subtotal,
        &coupon.code,
    )
}

/// Same policy, applied to raw coupon terms (used for provider-sourced
/// coupon records that have no local row yet).
pub fn discount_amount(
    amount_off: Option<Decimal>,
    percent_off: Option<Decimal>,
    active: bool,
    subtotal: Decimal,
    label: &str,
) -> Result<Decimal, ServiceError> {
    if !active {
        return Err(ServiceError::ValidationError(format!(
            "Coupon {} is not active",
            label
        )));
    }
    if subtotal < Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "Subtotal cannot be negative".to_string(),
        ));
    }

    match (amount_off, percent_off) {
        (Some(amount), None) => {
            if amount < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Coupon {} has a negative amount",
                    label
                )));
            }
            Ok(amount.min(subtotal))
        }
        (None, Some(percent)) => {
            if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
                return Err(ServiceError::ValidationError(format!(
                    "Coupon {} percentage must be between 0 and 100",
                    label
                )));
            }
            let raw = subtotal * percent / Decimal::ONE_HUNDRED;
            let rounded = raw.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
            Ok(rounded.min(subtotal))
        }
        _ => Err(ServiceError::ValidationError(format!(
            "Coupon {} must define exactly one of amount_off or percent_off",
            label
        ))),
    }
}

/// Delivery fee policy: free above the threshold, flat fee otherwise.
pub fn delivery_fee(subtotal: Decimal, free_shipping_threshold: Decimal, standard_fee: Decimal) -> Decimal {
    if subtotal > free_shipping_threshold {
        Decimal::ZERO
    } else {
        standard_fee
    }
}

/// Converts a currency amount to integer minor units (cents) for the
/// payment provider, rounding to 2 decimal places away from zero first.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let cents = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        * Decimal::ONE_HUNDRED;
    cents.to_i64().ok_or_else(|| {
        ServiceError::ValidationError(format!("Amount {} out of range for minor units", amount))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn coupon(amount_off: Option<Decimal>, percent_off: Option<Decimal>, active: bool) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "TEST".into(),
            remote_id: "rc_test".into(),
            amount_off,
            percent_off,
            active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn amount_off_is_min_of_amount_and_subtotal() {
        let c = coupon(Some(dec!(10)), None, true);
        assert_eq!(calculate_discount(&c, dec!(35.00)).unwrap(), dec!(10));
        assert_eq!(calculate_discount(&c, dec!(7.50)).unwrap(), dec!(7.50));
        assert_eq!(calculate_discount(&c, Decimal::ZERO).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn percent_off_rounds_away_from_zero() {
        let c = coupon(None, Some(dec!(10)), true);
        // 10% of 35.00 = 3.50 exactly
        assert_eq!(calculate_discount(&c, dec!(35.00)).unwrap(), dec!(3.50));
        // 10% of 1.25 = 0.125; away-from-zero gives 0.13 (banker's would give 0.12)
        assert_eq!(calculate_discount(&c, dec!(1.25)).unwrap(), dec!(0.13));
        // 10% of 1.15 = 0.115 -> 0.12 either way
        assert_eq!(calculate_discount(&c, dec!(1.15)).unwrap(), dec!(0.12));
    }

    #[test]
    fn percent_off_clamped_to_subtotal() {
        let c = coupon(None, Some(dec!(100)), true);
        assert_eq!(calculate_discount(&c, dec!(42.42)).unwrap(), dec!(42.42));
    }

    #[test]
    fn inactive_coupon_rejected() {
        let c = coupon(Some(dec!(5)), None, false);
        assert!(calculate_discount(&c, dec!(10)).is_err());
    }

    #[test]
    fn negative_subtotal_rejected() {
        let c = coupon(Some(dec!(5)), None, true);
        assert!(calculate_discount(&c, dec!(-1)).is_err());
    }

    #[test]
    fn both_or_neither_discount_kind_rejected() {
        let both = coupon(Some(dec!(5)), Some(dec!(10)), true);
        assert!(calculate_discount(&both, dec!(10)).is_err());
        let neither = coupon(None, None, true);
        assert!(calculate_discount(&neither, dec!(10)).is_err());
    }

    #[test]
    fn percent_out_of_range_rejected() {
        let c = coupon(None, Some(dec!(101)), true);
        assert!(calculate_discount(&c, dec!(10)).is_err());
        let c = coupon(None, Some(dec!(-1)), true);
        assert!(calculate_discount(&c, dec!(10)).is_err());
    }

    #[test]
    fn delivery_fee_threshold() {
        let threshold = dec!(100);
        let fee = dec!(5);
        assert_eq!(delivery_fee(dec!(35.00), threshold, fee), dec!(5));
        assert_eq!(delivery_fee(dec!(100.00), threshold, fee), dec!(5));
        assert_eq!(delivery_fee(dec!(100.01), threshold, fee), Decimal::ZERO);
    }

    #[test]
    fn minor_units_conversion() {
        assert_eq!(to_minor_units(dec!(36.50)).unwrap(), 3650);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(to_minor_units(Decimal::ZERO).unwrap(), 0);
        // rounds the sub-cent tail away from zero before scaling
        assert_eq!(to_minor_units(dec!(1.005)).unwrap(), 101);
    }
}
