//! Integer cost-basis arithmetic.
//!
//! Averages are computed in `i128` and rounded half-up, so no intermediate
//! product can overflow and the result never depends on float precision.

use crate::{Error, Result};

/// Gross value of `qty` shares at `price`.
pub fn order_value(qty: i64, price: i64) -> Result<i64> {
    qty.checked_mul(price)
        .ok_or(Error::Overflow { qty, price })
}

/// Quantity-weighted average of an existing position and a new fill.
///
/// `round((held_qty * held_avg + qty * price) / (held_qty + qty))`, with ties
/// rounded up.
pub fn weighted_average(held_qty: i64, held_avg: i64, qty: i64, price: i64) -> Result<i64> {
    let total = i128::from(held_qty) + i128::from(qty);
    if total <= 0 {
        return Err(Error::InvalidQuantity(qty));
    }

    let numerator =
        i128::from(held_qty) * i128::from(held_avg) + i128::from(qty) * i128::from(price);
    let average = (numerator + total / 2) / total;

    i64::try_from(average).map_err(|_| Error::Overflow { qty, price })
}
