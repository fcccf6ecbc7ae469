//! Proportional allocator.
//!
//! Distributes the pool's total-to-distribute across all product lines in
//! proportion to each line's share of the pooled foreign-currency FOB value.
//!
//! The proportion divides foreign FOB by foreign FOB, so the ratio is
//! dimensionless and safe to multiply against the local-currency total. Do not
//! "fix" this by converting the FOB figures to local currency first: the rate
//! cancels out and the conversion only adds rounding error.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::product::{PriceUpdate, ProductLine};
use crate::error::{CosteoError, Result};
use crate::money::Money;

/// Landed price for one product line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationLine {
    pub product_id: crate::domain::product::ProductId,
    pub sku: String,
    pub quantity: i64,
    /// This line's foreign-currency FOB (unit price x quantity).
    pub fob_foreign: Decimal,
    /// Landed unit price, local currency.
    pub unit_price_local: Money,
    /// Extended landed value, local currency. This is the conserved figure:
    /// the extended values of all lines sum exactly to the distributed total,
    /// and the unit price is derived from it.
    pub extended_value_local: Money,
}

impl AllocationLine {
    pub fn price_update(&self) -> PriceUpdate {
        PriceUpdate {
            product_id: self.product_id,
            price: self.unit_price_local,
            neto: self.extended_value_local,
        }
    }
}

/// Compute each product line's landed price.
///
/// Shares are computed exactly, floored to cents, and the leftover cents are
/// handed to the lines with the largest remainders, so the total conserves
/// exactly and no line is systematically favored.
///
/// Errors:
/// - pooled FOB of zero (division-by-zero guard)
/// - any line with a non-positive quantity
pub fn allocate(lines: &[ProductLine], total_to_distribute: Money) -> Result<Vec<AllocationLine>> {
    let mut total_fob = Decimal::ZERO;
    for line in lines {
        if line.quantity <= 0 {
            return Err(CosteoError::Validation(format!(
                "product '{}' has zero quantity, cannot allocate",
                line.sku
            )));
        }
        total_fob += line.fob_foreign();
    }
    if total_fob <= Decimal::ZERO {
        return Err(CosteoError::Validation(
            "pooled FOB value is zero, nothing to distribute against".to_string(),
        ));
    }

    let total = total_to_distribute.amount();
    let total_cents = (total * Decimal::ONE_HUNDRED)
        .to_i128()
        .ok_or_else(|| CosteoError::Validation("distribution total out of range".to_string()))?;

    // Exact share per line, floored to cents; remainders decide who gets the
    // leftover cents.
    let mut cents = Vec::with_capacity(lines.len());
    let mut remainders = Vec::with_capacity(lines.len());
    let mut floor_sum: i128 = 0;
    for line in lines {
        let share = total * line.fob_foreign() / total_fob;
        let scaled = share * Decimal::ONE_HUNDRED;
        let floored = scaled.floor();
        let value = floored
            .to_i128()
            .ok_or_else(|| CosteoError::Validation("allocated share out of range".to_string()))?;
        cents.push(value);
        remainders.push(scaled - floored);
        floor_sum += value;
    }

    let mut order: Vec<usize> = (0..lines.len()).collect();
    order.sort_by(|&a, &b| remainders[b].cmp(&remainders[a]).then(a.cmp(&b)));

    let mut residual = total_cents - floor_sum;
    for &i in &order {
        if residual <= 0 {
            break;
        }
        cents[i] += 1;
        residual -= 1;
    }
    // Flooring never over-assigns, but Decimal division rounds at 28 digits;
    // absorb a stray negative cent from the smallest remainders.
    for &i in order.iter().rev() {
        if residual >= 0 {
            break;
        }
        if cents[i] > 0 {
            cents[i] -= 1;
            residual += 1;
        }
    }

    let result = lines
        .iter()
        .zip(cents)
        .map(|(line, share_cents)| {
            let extended = Money::new(Decimal::from_i128_with_scale(share_cents, 2));
            let unit = Money::new(extended.amount() / Decimal::from(line.quantity));
            AllocationLine {
                product_id: line.id,
                sku: line.sku.clone(),
                quantity: line.quantity,
                fob_foreign: line.fob_foreign(),
                unit_price_local: unit,
                extended_value_local: extended,
            }
        })
        .collect();

    tracing::debug!(
        lines = lines.len(),
        total = %total_to_distribute,
        "allocated pool total across product lines"
    );

    Ok(result)
}
