//! Product lines - the catalog rows landed costs are written back to.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dispatch::DispatchNumber;
use crate::money::Money;

/// Unique identifier for a product line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub Uuid);

impl From<Uuid> for ProductId {
    fn from(uuid: Uuid) -> Self {
        ProductId(uuid)
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One imported product row, associated to exactly one dispatch by number.
///
/// `quantity` and `unit_price_usd` come from the ingestion service; `price`
/// and `neto` are written only by the commit step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductLine {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    /// FOB unit price, foreign currency.
    pub unit_price_usd: Money,
    /// Landed unit price, local currency. Set at commit.
    pub price: Option<Money>,
    /// Extended landed value (price x quantity). Set at commit.
    pub neto: Option<Money>,
    pub dispatch_number: DispatchNumber,
}

impl ProductLine {
    /// This line's share of the pool expressed in foreign currency:
    /// unit FOB price times quantity.
    pub fn fob_foreign(&self) -> Decimal {
        self.unit_price_usd.amount() * Decimal::from(self.quantity)
    }
}

/// Landed price figures to apply to one product line at commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub product_id: ProductId,
    pub price: Money,
    pub neto: Money,
}
