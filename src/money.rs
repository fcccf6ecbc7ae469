//! Fixed-scale currency amounts and keystroke-driven amount entry.
//!
//! `Money` is the canonical value type for every currency figure in the crate:
//! a `rust_decimal` amount normalized to two fractional digits. Display
//! formatting follows the local convention (`1.234.567,89` - dot thousands,
//! comma decimals) and parsing inverts it exactly for values with at most two
//! fractional digits.
//!
//! `AmountInput` models the cost-entry fields of the wizard: an incremental
//! digit stream where each keystroke hands back the whole formatted field plus
//! the new character. The canonical value is always the `Money` derived from
//! the digit buffer, never re-parsed from a formatted string.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{CosteoError, Result};

/// A currency amount with a fixed scale of two fractional digits.
///
/// Construction always rounds half-away-from-zero to cents, so two `Money`
/// values that display the same compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Create a `Money` from a decimal amount, rounding to cents.
    pub fn new(amount: Decimal) -> Self {
        Money(amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Create a `Money` from an integer number of cents.
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    /// The underlying decimal amount (scale 2).
    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// The amount in integer cents. Saturates on overflow (amounts anywhere
    /// near i64 cents are far outside this domain).
    pub fn cents(&self) -> i64 {
        (self.0 * Decimal::ONE_HUNDRED)
            .to_i64()
            .unwrap_or(i64::MAX)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Render with dot thousands separators and a comma before two fractional
    /// digits, e.g. `1.234.567,89`.
    pub fn display(&self) -> String {
        let abs = self.0.abs();
        let text = abs.to_string();
        let (int_part, frac_part) = match text.split_once('.') {
            Some((i, f)) => (i.to_string(), format!("{f:0<2}")),
            None => (text, "00".to_string()),
        };
        let mut out = String::new();
        if self.0.is_sign_negative() && !abs.is_zero() {
            out.push('-');
        }
        out.push_str(&group_thousands(&int_part));
        out.push(',');
        out.push_str(&frac_part);
        out
    }

    /// Parse a string produced by [`Money::display`]. Inverts formatting
    /// exactly for amounts with at most two fractional digits.
    pub fn parse_display(text: &str) -> Result<Money> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CosteoError::Validation("empty amount".to_string()));
        }
        let stripped: String = trimmed.chars().filter(|c| *c != '.').collect();
        let normalized = stripped.replace(',', ".");
        if let Some((_, frac)) = normalized.split_once('.') {
            if frac.len() > 2 {
                return Err(CosteoError::Validation(format!(
                    "amount '{trimmed}' has more than two fractional digits"
                )));
            }
        }
        let value = normalized
            .parse::<Decimal>()
            .map_err(|e| CosteoError::Validation(format!("invalid amount '{trimmed}': {e}")))?;
        Ok(Money::new(value))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

fn group_thousands(digits: &str) -> String {
    let bytes = digits.as_bytes();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(*b as char);
    }
    out
}

/// Digit buffers longer than this are ignored; anything near this bound is
/// already garbage input, and the cap keeps the buffer inside i128 range.
const MAX_DIGITS: usize = 20;

/// Incremental amount entry for the cost form.
///
/// Each keystroke in the UI hands back the whole field content (the previous
/// formatted render plus the new character). `set` strips everything that is
/// not a digit and drops leading zeros before storing; the leading-zero strip
/// matters because the render left-pads small amounts (`0,05` -> digits `005`)
/// and without it the padding would accumulate on every keystroke.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmountInput {
    digits: String,
}

impl AmountInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the buffer from the raw field content.
    pub fn set(&mut self, raw: &str) {
        let mut digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        digits = digits.trim_start_matches('0').to_string();
        digits.truncate(MAX_DIGITS);
        self.digits = digits;
    }

    /// Formatted field content: last two digits are the fraction, the rest the
    /// thousands-grouped integer part. Empty buffer renders empty.
    pub fn display(&self) -> String {
        if self.digits.is_empty() {
            return String::new();
        }
        let padded = format!("{:0>3}", self.digits);
        let (int_part, frac_part) = padded.split_at(padded.len() - 2);
        format!("{},{}", group_thousands(int_part), frac_part)
    }

    /// The committed amount. Empty buffer is zero.
    pub fn value(&self) -> Money {
        if self.digits.is_empty() {
            return Money::ZERO;
        }
        // The buffer is digit-only and capped at MAX_DIGITS, so this parse
        // cannot fail.
        let cents: i128 = self.digits.parse().unwrap_or(0);
        Money::new(Decimal::from_i128_with_scale(cents, 2))
    }
}
