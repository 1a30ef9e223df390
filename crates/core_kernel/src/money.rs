//! Money utilities with precise decimal arithmetic
//!
//! Every monetary value in the ledger is a `rust_decimal::Decimal` carrying
//! two decimal places. This module owns the two primitives everything else
//! builds on:
//!
//! - [`round2`]: half-up rounding to cents, applied on every monetary write
//! - [`split_proportional`]: remainder-safe proportional distribution whose
//!   parts always sum to the input exactly
//!
//! Proportional splitting is carried out in integer cents so that no
//! intermediate rounding can leak a cent in either direction.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;

/// Number of decimal places used for every stored amount
pub const MONEY_SCALE: u32 = 2;

/// Errors that can occur during money operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid weight at position {index}: {weight}")]
    InvalidWeight { index: usize, weight: Decimal },

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Overflow during calculation")]
    Overflow,
}

/// Rounds an amount to two decimal places, midpoint away from zero
///
/// # Example
///
/// ```rust
/// use core_kernel::money::round2;
/// use rust_decimal_macros::dec;
///
/// assert_eq!(round2(dec!(10.005)), dec!(10.01));
/// assert_eq!(round2(dec!(10.004)), dec!(10.00));
/// ```
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Converts an amount into integer cents after rounding it with [`round2`]
pub fn to_cents(amount: Decimal) -> Result<i128, MoneyError> {
    let cents = round2(amount)
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or(MoneyError::Overflow)?;
    cents.trunc().to_i128().ok_or(MoneyError::Overflow)
}

/// Converts integer cents back into a two-place decimal amount
pub fn from_cents(cents: i128) -> Result<Decimal, MoneyError> {
    Decimal::try_from_i128_with_scale(cents, MONEY_SCALE).map_err(|_| MoneyError::Overflow)
}

/// Computes `pct` percent of `amount`, rounded to cents
pub fn percentage_of(amount: Decimal, pct: Decimal) -> Decimal {
    round2(amount * pct / Decimal::ONE_HUNDRED)
}

/// Returns true when the amount is strictly greater than zero
pub fn is_positive(amount: Decimal) -> bool {
    amount > Decimal::ZERO
}

/// Splits `total` across `weights` so that the parts sum to `total` exactly
///
/// Each entry first receives `floor(total * weight / sum(weights))` cents.
/// The leftover cents are then handed out one at a time to the entries with
/// the largest fractional remainder; ties go to the larger weight, then to the
/// lower position. Positions act as entry ids, so callers must pass weights in
/// a deterministic order.
///
/// An entry never receives more than `total`, and never more than its own
/// weight when `total <= sum(weights)` and weights are whole cents.
///
/// # Arguments
///
/// * `total` - Non-negative amount to distribute
/// * `weights` - Non-negative weights, one per recipient
///
/// # Errors
///
/// - `MoneyError::InvalidAmount` for a negative total or empty weights
/// - `MoneyError::InvalidWeight` for a negative weight
/// - `MoneyError::DivisionByZero` when the weights sum to zero and total is non-zero
///
/// # Example
///
/// ```rust
/// use core_kernel::money::split_proportional;
/// use rust_decimal_macros::dec;
///
/// let parts = split_proportional(dec!(1000), &[dec!(1), dec!(1), dec!(1)]).unwrap();
/// assert_eq!(parts, vec![dec!(333.34), dec!(333.33), dec!(333.33)]);
/// ```
pub fn split_proportional(total: Decimal, weights: &[Decimal]) -> Result<Vec<Decimal>, MoneyError> {
    if total < Decimal::ZERO {
        return Err(MoneyError::InvalidAmount(format!(
            "Cannot split a negative total: {}",
            total
        )));
    }

    if let Some((index, weight)) = weights.iter().enumerate().find(|(_, w)| **w < Decimal::ZERO) {
        return Err(MoneyError::InvalidWeight { index, weight: *weight });
    }

    let total_cents = to_cents(total)?;
    if total_cents == 0 {
        return weights.iter().map(|_| from_cents(0)).collect();
    }

    if weights.is_empty() {
        return Err(MoneyError::InvalidAmount(
            "Cannot split a non-zero total across no weights".to_string(),
        ));
    }

    // Bring every weight to a common scale so the division is exact integer math
    let scale = weights.iter().map(|w| w.scale()).max().unwrap_or(0);
    let scaled_weights = weights
        .iter()
        .map(|w| {
            let factor = 10_i128
                .checked_pow(scale - w.scale())
                .ok_or(MoneyError::Overflow)?;
            w.mantissa().checked_mul(factor).ok_or(MoneyError::Overflow)
        })
        .collect::<Result<Vec<i128>, MoneyError>>()?;

    let weight_sum = scaled_weights
        .iter()
        .try_fold(0_i128, |acc, w| acc.checked_add(*w))
        .ok_or(MoneyError::Overflow)?;
    if weight_sum == 0 {
        return Err(MoneyError::DivisionByZero);
    }

    let mut shares = Vec::with_capacity(weights.len());
    let mut remainders = Vec::with_capacity(weights.len());
    for weight in &scaled_weights {
        let numerator = total_cents.checked_mul(*weight).ok_or(MoneyError::Overflow)?;
        shares.push(numerator / weight_sum);
        remainders.push(numerator % weight_sum);
    }

    let floored: i128 = shares.iter().sum();
    let leftover = total_cents - floored;

    let mut order: Vec<usize> = (0..shares.len()).collect();
    order.sort_by(|&a, &b| {
        remainders[b]
            .cmp(&remainders[a])
            .then_with(|| scaled_weights[b].cmp(&scaled_weights[a]))
            .then_with(|| a.cmp(&b))
    });

    for &index in order.iter().take(leftover as usize) {
        shares[index] += 1;
    }

    shares.into_iter().map(from_cents).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round2_half_up() {
        assert_eq!(round2(dec!(1.005)), dec!(1.01));
        assert_eq!(round2(dec!(1.0049)), dec!(1.00));
        assert_eq!(round2(dec!(-1.005)), dec!(-1.01));
    }

    #[test]
    fn test_cents_conversion() {
        assert_eq!(to_cents(dec!(100.50)).unwrap(), 10050);
        assert_eq!(from_cents(10050).unwrap(), dec!(100.50));
    }

    #[test]
    fn test_split_three_ways() {
        let parts = split_proportional(dec!(1000), &[dec!(1), dec!(1), dec!(1)]).unwrap();
        assert_eq!(parts.iter().copied().sum::<Decimal>(), dec!(1000));
        assert_eq!(parts[0], dec!(333.34));
    }

    #[test]
    fn test_split_exact_ratios() {
        let parts = split_proportional(
            dec!(6000),
            &[dec!(5000), dec!(3000), dec!(2000)],
        ).unwrap();
        assert_eq!(parts, vec![dec!(3000), dec!(1800), dec!(1200)]);
    }

    #[test]
    fn test_split_zero_total() {
        let parts = split_proportional(Decimal::ZERO, &[dec!(1), dec!(2)]).unwrap();
        assert_eq!(parts, vec![Decimal::ZERO, Decimal::ZERO]);
    }

    #[test]
    fn test_split_rejects_negative_weight() {
        let result = split_proportional(dec!(10), &[dec!(1), dec!(-1)]);
        assert!(matches!(result, Err(MoneyError::InvalidWeight { index: 1, .. })));
    }

    #[test]
    fn test_split_rejects_zero_weights() {
        let result = split_proportional(dec!(10), &[Decimal::ZERO, Decimal::ZERO]);
        assert_eq!(result, Err(MoneyError::DivisionByZero));
    }

    #[test]
    fn test_percentage_of() {
        assert_eq!(percentage_of(dec!(1000), dec!(15)), dec!(150));
        assert_eq!(percentage_of(dec!(99.99), dec!(12.5)), dec!(12.50));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn split_sum_equals_total(
            total in 0i64..1_000_000_000i64,
            weights in proptest::collection::vec(1i64..10_000_000i64, 1..20)
        ) {
            let total = Decimal::new(total, 2);
            let weights: Vec<Decimal> = weights.into_iter().map(|w| Decimal::new(w, 2)).collect();
            let parts = split_proportional(total, &weights).unwrap();

            prop_assert_eq!(parts.len(), weights.len());
            prop_assert_eq!(parts.iter().copied().sum::<Decimal>(), total);
            for part in &parts {
                prop_assert!(*part >= Decimal::ZERO);
                prop_assert!(*part <= total);
            }
        }

        #[test]
        fn split_never_exceeds_weight_when_covered(
            weights in proptest::collection::vec(1i64..10_000_000i64, 1..20),
            fraction in 0u32..=100u32
        ) {
            let weights: Vec<Decimal> = weights.into_iter().map(|w| Decimal::new(w, 2)).collect();
            let weight_sum: Decimal = weights.iter().copied().sum();
            let total = round2(weight_sum * Decimal::from(fraction) / Decimal::ONE_HUNDRED);
            let parts = split_proportional(total, &weights).unwrap();

            for (part, weight) in parts.iter().zip(&weights) {
                prop_assert!(part <= weight);
            }
        }
    }
}
