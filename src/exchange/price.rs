//! Price normalization at the adapter boundary
//!
//! The core's canonical price unit is a decimal in [0, 1]. Venues that quote
//! in cents convert here, exactly once; the state model never stores
//! venue-native units.

use super::types::ExchangeError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Convert a decimal price in [0, 1] to venue cents
///
/// `venue_cents = round(decimal * 100)`. Callers validate range first via
/// [`validate_order_price`].
pub fn decimal_to_cents(price: Decimal) -> u32 {
    (price * Decimal::ONE_HUNDRED).round().to_u32().unwrap_or(0)
}

/// Convert venue cents back to a decimal price
pub fn cents_to_decimal(cents: u32) -> Decimal {
    Decimal::from(cents) / Decimal::ONE_HUNDRED
}

/// Validate a limit-order price is strictly inside (0, 1)
pub fn validate_order_price(price: Decimal) -> Result<(), ExchangeError> {
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return Err(ExchangeError::OrderRejected {
            reason: format!("price {price} outside (0, 1)"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_trip_all_two_decimal_prices() {
        // cents_to_decimal(decimal_to_cents(p)) == p for every 2dp price
        for cents in 0..=100u32 {
            let p = cents_to_decimal(cents);
            assert_eq!(decimal_to_cents(p), cents);
            assert_eq!(cents_to_decimal(decimal_to_cents(p)), p);
        }
    }

    #[test]
    fn test_decimal_to_cents_rounds() {
        assert_eq!(decimal_to_cents(dec!(0.555)), 56);
        assert_eq!(decimal_to_cents(dec!(0.554)), 55);
        assert_eq!(decimal_to_cents(dec!(0.50)), 50);
        assert_eq!(decimal_to_cents(dec!(1)), 100);
        assert_eq!(decimal_to_cents(dec!(0)), 0);
    }

    #[test]
    fn test_cents_to_decimal() {
        assert_eq!(cents_to_decimal(55), dec!(0.55));
        assert_eq!(cents_to_decimal(1), dec!(0.01));
        assert_eq!(cents_to_decimal(100), dec!(1));
    }

    #[test]
    fn test_validate_order_price_bounds() {
        assert!(validate_order_price(dec!(0.01)).is_ok());
        assert!(validate_order_price(dec!(0.5)).is_ok());
        assert!(validate_order_price(dec!(0.99)).is_ok());

        assert!(matches!(
            validate_order_price(dec!(0)),
            Err(ExchangeError::OrderRejected { .. })
        ));
        assert!(matches!(
            validate_order_price(dec!(1)),
            Err(ExchangeError::OrderRejected { .. })
        ));
        assert!(matches!(
            validate_order_price(dec!(1.5)),
            Err(ExchangeError::OrderRejected { .. })
        ));
        assert!(matches!(
            validate_order_price(dec!(-0.1)),
            Err(ExchangeError::OrderRejected { .. })
        ));
    }
}
