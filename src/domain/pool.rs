//! Cost pool model and margin calculation.
//!
//! The pool is ephemeral: it is never persisted as an entity. It holds the
//! exchange rate, the fixed list of manually entered cost categories, and the
//! per-dispatch FOB totals reported by the ingestion service. The margin rate
//! is fixed at 23%.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CosteoError, Result};
use crate::money::Money;

/// Fixed markup applied to FOB plus costs before distribution: 0.23.
pub const MARGIN_RATE: Decimal = Decimal::from_parts(23, 0, 0, false, 2);

/// The fixed set of pooled cost categories entered on the cost form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Freight,
    Duties,
    Statistics,
    InternationalTaxes,
    CountryTax,
    CustomsClearance,
    Certification,
    InternalHandling,
    Terminal,
    Storage,
    /// SIMI regulatory fee
    RegulatoryFee,
    /// SEDI administrative fee
    AdministrativeFee,
    ProfessionalFees,
}

impl CostCategory {
    pub const ALL: [CostCategory; 13] = [
        CostCategory::Freight,
        CostCategory::Duties,
        CostCategory::Statistics,
        CostCategory::InternationalTaxes,
        CostCategory::CountryTax,
        CostCategory::CustomsClearance,
        CostCategory::Certification,
        CostCategory::InternalHandling,
        CostCategory::Terminal,
        CostCategory::Storage,
        CostCategory::RegulatoryFee,
        CostCategory::AdministrativeFee,
        CostCategory::ProfessionalFees,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CostCategory::Freight => "Freight",
            CostCategory::Duties => "Duties",
            CostCategory::Statistics => "Statistics fee",
            CostCategory::InternationalTaxes => "International taxes",
            CostCategory::CountryTax => "Country tax",
            CostCategory::CustomsClearance => "Customs clearance fee",
            CostCategory::Certification => "Certification fee",
            CostCategory::InternalHandling => "Internal handling",
            CostCategory::Terminal => "Terminal",
            CostCategory::Storage => "Storage",
            CostCategory::RegulatoryFee => "SIMI fee",
            CostCategory::AdministrativeFee => "SEDI fee",
            CostCategory::ProfessionalFees => "Professional fees",
        }
    }
}

/// Local-currency amounts per cost category. Every category defaults to zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSchedule {
    amounts: BTreeMap<CostCategory, Money>,
}

impl CostSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a category amount. Negative amounts are rejected.
    pub fn set(&mut self, category: CostCategory, amount: Money) -> Result<()> {
        if amount.amount() < Decimal::ZERO {
            return Err(CosteoError::Validation(format!(
                "{} amount cannot be negative",
                category.label()
            )));
        }
        self.amounts.insert(category, amount);
        Ok(())
    }

    pub fn get(&self, category: CostCategory) -> Money {
        self.amounts.get(&category).copied().unwrap_or(Money::ZERO)
    }

    /// Sum over all categories.
    pub fn total(&self) -> Money {
        self.amounts.values().copied().sum()
    }
}

/// Pool-wide financial summary, recomputed from current inputs on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    /// (fob_primary + fob_secondary) * exchange_rate
    pub total_fob_local: Money,
    /// Sum of all cost category amounts
    pub total_costs: Money,
    /// total_fob_local + total_costs
    pub subtotal: Money,
    /// subtotal * MARGIN_RATE
    pub margin: Money,
    /// subtotal + margin; the figure the allocator distributes
    pub total_to_distribute: Money,
}

/// The cost pool for one allocation run: exchange rate, cost schedule, and
/// the FOB totals of the one or two pooled dispatches.
#[derive(Debug, Clone)]
pub struct CostPool {
    exchange_rate: Decimal,
    costs: CostSchedule,
    fob_primary_foreign: Money,
    fob_secondary_foreign: Money,
    margin_reviewed: bool,
}

impl CostPool {
    pub fn new(fob_primary_foreign: Money, fob_secondary_foreign: Option<Money>) -> Self {
        CostPool {
            exchange_rate: Decimal::ZERO,
            costs: CostSchedule::new(),
            fob_primary_foreign,
            fob_secondary_foreign: fob_secondary_foreign.unwrap_or(Money::ZERO),
            margin_reviewed: false,
        }
    }

    /// Set the local-per-foreign exchange rate. Non-positive rates are
    /// rejected up front; `summary` guards again at computation time.
    pub fn set_exchange_rate(&mut self, rate: Decimal) -> Result<()> {
        if rate <= Decimal::ZERO {
            return Err(CosteoError::Validation(
                "exchange rate must be positive".to_string(),
            ));
        }
        self.exchange_rate = rate;
        Ok(())
    }

    pub fn exchange_rate(&self) -> Decimal {
        self.exchange_rate
    }

    pub fn set_cost(&mut self, category: CostCategory, amount: Money) -> Result<()> {
        self.costs.set(category, amount)
    }

    pub fn cost(&self, category: CostCategory) -> Money {
        self.costs.get(category)
    }

    pub fn fob_primary_foreign(&self) -> Money {
        self.fob_primary_foreign
    }

    pub fn fob_secondary_foreign(&self) -> Money {
        self.fob_secondary_foreign
    }

    /// Combined foreign-currency FOB of the pooled dispatches.
    pub fn total_fob_foreign(&self) -> Money {
        self.fob_primary_foreign + self.fob_secondary_foreign
    }

    /// Compute the pool summary from current inputs.
    ///
    /// Rejects a missing/zero exchange rate; both the margin step and the
    /// commit path go through here, so neither can act on a zero rate.
    pub fn summary(&self) -> Result<PoolSummary> {
        if self.exchange_rate <= Decimal::ZERO {
            return Err(CosteoError::Validation(
                "exchange rate is missing or zero".to_string(),
            ));
        }
        let total_fob_local = self.total_fob_foreign().amount() * self.exchange_rate;
        let total_costs = self.costs.total().amount();
        let subtotal = total_fob_local + total_costs;
        let margin = subtotal * MARGIN_RATE;
        Ok(PoolSummary {
            total_fob_local: Money::new(total_fob_local),
            total_costs: Money::new(total_costs),
            subtotal: Money::new(subtotal),
            margin: Money::new(margin),
            total_to_distribute: Money::new(subtotal + margin),
        })
    }

    /// The explicit margin-calculation action. Computes the summary and marks
    /// the pool as reviewed; this manual gate exists so a human looks at the
    /// figures before commit. Commit recomputes from current inputs and never
    /// trusts the summary returned here.
    pub fn compute_margin(&mut self) -> Result<PoolSummary> {
        let summary = self.summary()?;
        self.margin_reviewed = true;
        Ok(summary)
    }

    /// Whether `compute_margin` has run at least once.
    pub fn margin_reviewed(&self) -> bool {
        self.margin_reviewed
    }
}
