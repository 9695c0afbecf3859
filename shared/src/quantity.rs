//! Fixed-point quantity arithmetic for stock levels
//!
//! Every stored quantity goes through [`round_qty`] so that many small
//! additions and deductions over the lifetime of a product never drift.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Number of fractional digits kept on every stored quantity
pub const QUANTITY_SCALE: u32 = 2;

/// Errors raised by quantity arithmetic
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} cannot be negative")]
    Negative { field: &'static str },

    #[error("insufficient stock: available {available}, requested {requested}")]
    Insufficient {
        available: Decimal,
        requested: Decimal,
    },
}

/// Round a quantity to the ledger precision
pub fn round_qty(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Normalise an input quantity that must be strictly positive
pub fn positive_qty(field: &'static str, value: Decimal) -> Result<Decimal, QuantityError> {
    let rounded = round_qty(value);
    if rounded <= Decimal::ZERO {
        return Err(QuantityError::NotPositive { field });
    }
    Ok(rounded)
}

/// Normalise an input quantity that may be zero but not negative
pub fn non_negative_qty(field: &'static str, value: Decimal) -> Result<Decimal, QuantityError> {
    let rounded = round_qty(value);
    if rounded < Decimal::ZERO {
        return Err(QuantityError::Negative { field });
    }
    Ok(rounded)
}

/// Add `delta` to a stored quantity
pub fn add_qty(current: Decimal, delta: Decimal) -> Decimal {
    round_qty(current + delta)
}

/// Deduct `delta` from a stored quantity, refusing to go below zero
pub fn deduct_qty(current: Decimal, delta: Decimal) -> Result<Decimal, QuantityError> {
    let requested = round_qty(delta);
    if requested > current {
        return Err(QuantityError::Insufficient {
            available: current,
            requested,
        });
    }
    Ok(round_qty(current - requested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round_qty_midpoint_away_from_zero() {
        assert_eq!(round_qty(dec("1.005")), dec("1.01"));
        assert_eq!(round_qty(dec("1.004")), dec("1.00"));
        assert_eq!(round_qty(dec("2.5")), dec("2.50"));
    }

    #[test]
    fn test_positive_qty_rejects_zero_after_rounding() {
        assert_eq!(
            positive_qty("quantity", dec("0.001")),
            Err(QuantityError::NotPositive { field: "quantity" })
        );
        assert!(positive_qty("quantity", dec("-3")).is_err());
        assert_eq!(positive_qty("quantity", dec("3.333")), Ok(dec("3.33")));
    }

    #[test]
    fn test_non_negative_qty_allows_zero() {
        assert_eq!(non_negative_qty("returned_quantity", Decimal::ZERO), Ok(Decimal::ZERO));
        assert!(non_negative_qty("returned_quantity", dec("-0.5")).is_err());
    }

    #[test]
    fn test_deduct_exact_balance_reaches_zero() {
        assert_eq!(deduct_qty(dec("30"), dec("30")), Ok(Decimal::ZERO));
    }

    #[test]
    fn test_deduct_beyond_balance_fails() {
        let err = deduct_qty(dec("20"), dec("30")).unwrap_err();
        assert_eq!(
            err,
            QuantityError::Insufficient {
                available: dec("20"),
                requested: dec("30"),
            }
        );
    }

    #[test]
    fn test_repeated_small_additions_do_not_drift() {
        let mut total = Decimal::ZERO;
        for _ in 0..1000 {
            total = add_qty(total, dec("0.1"));
        }
        assert_eq!(total, dec("100.00"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn qty_strategy() -> impl Strategy<Value = Decimal> {
            (0i64..1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn prop_deduct_never_goes_negative(current in qty_strategy(), delta in qty_strategy()) {
                match deduct_qty(current, delta) {
                    Ok(left) => {
                        prop_assert!(left >= Decimal::ZERO);
                        prop_assert_eq!(add_qty(left, delta), current);
                    }
                    Err(QuantityError::Insufficient { .. }) => prop_assert!(delta > current),
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
            }

            #[test]
            fn prop_round_qty_is_idempotent(cents in -10_000_000i64..10_000_000i64, extra in 0u32..4) {
                let value = Decimal::new(cents, 2 + extra);
                let once = round_qty(value);
                prop_assert_eq!(round_qty(once), once);
                prop_assert!(once.scale() <= QUANTITY_SCALE);
            }
        }
    }
}
