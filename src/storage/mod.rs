//! Storage traits for the external collaborators.
//!
//! The product catalog is the source of truth for quantities and FOB unit
//! prices; this crate never invents product rows. The dispatch registry owns
//! dispatch records. `AllocationStore` adds the two things the commit step
//! needs on top: an exclusive lease per dispatch pool and an atomic batch
//! write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::dispatch::{
    Dispatch, DispatchDraft, DispatchId, DispatchNumber, DispatchPage, DispatchStatus, FobTotals,
};
use crate::domain::product::{PriceUpdate, ProductLine};
use crate::error::Result;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// Identity of one allocation run; doubles as the lease holder id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// An exclusive lease over one dispatch, held for the duration of a commit.
/// A run leases every dispatch in its pool, so two runs whose pools overlap
/// in even one dispatch cannot double-allocate it.
#[derive(Debug, Clone)]
pub struct Lease {
    pub dispatch_number: DispatchNumber,
    pub holder: RunId,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Everything the commit step writes, applied atomically: either every price
/// row and every dispatch completion lands, or none of them do.
#[derive(Debug, Clone)]
pub struct AllocationCommit {
    pub price_updates: Vec<PriceUpdate>,
    pub completions: Vec<DispatchCompletion>,
}

/// Status advance plus FOB totals for one dispatch in the pool.
#[derive(Debug, Clone)]
pub struct DispatchCompletion {
    pub dispatch_id: DispatchId,
    pub fob_totals: FobTotals,
}

/// Product catalog store.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// All product lines belonging to the given dispatch numbers.
    async fn list_by_dispatch_numbers(
        &self,
        numbers: &[DispatchNumber],
    ) -> Result<Vec<ProductLine>>;

    /// Write landed price figures to a single product line.
    async fn update_price(&self, update: &PriceUpdate) -> Result<()>;

    /// Remove every product line associated with a dispatch. Returns the
    /// number of rows removed. Used by the cascading dispatch delete.
    async fn delete_by_dispatch(&self, dispatch_id: DispatchId) -> Result<u64>;
}

/// Dispatch registry.
#[async_trait]
pub trait DispatchRegistry: Send + Sync {
    /// Search dispatches by number substring, paged. `page` is zero-based.
    async fn search(&self, term: &str, page: u32, page_size: u32) -> Result<DispatchPage>;

    async fn get(&self, id: DispatchId) -> Result<Dispatch>;

    /// Create a dispatch in status `new`.
    async fn create(&self, draft: DispatchDraft) -> Result<Dispatch>;

    /// Advance a dispatch's status, optionally recording its FOB totals.
    async fn update_status(
        &self,
        id: DispatchId,
        status: DispatchStatus,
        fob_totals: Option<FobTotals>,
    ) -> Result<()>;

    /// Remove the dispatch record. Product lines must already be gone; use
    /// [`crate::domain::wizard::delete_dispatch`] for the cascading form.
    async fn delete(&self, id: DispatchId) -> Result<()>;
}

/// Combined store the commit orchestrator runs against.
#[async_trait]
pub trait AllocationStore: CatalogStore + DispatchRegistry {
    /// Acquire the exclusive lease for one dispatch.
    ///
    /// Succeeds if no lease exists, the existing lease has expired, or the
    /// existing lease belongs to the same holder (re-acquire extends it).
    /// An unexpired lease held by someone else fails with
    /// [`crate::CosteoError::LeaseHeld`].
    async fn acquire_lease(
        &self,
        number: &DispatchNumber,
        holder: RunId,
        ttl_ms: i64,
    ) -> Result<Lease>;

    /// Release a held lease. Releasing a lease that was already taken over is
    /// a no-op.
    async fn release_lease(&self, lease: &Lease) -> Result<()>;

    /// Apply an allocation commit atomically.
    ///
    /// Implementations must guarantee that dispatch statuses advance only if
    /// every price row was written: a failure on any row leaves all product
    /// lines and all dispatch statuses untouched.
    async fn commit_allocation(&self, commit: &AllocationCommit) -> Result<()>;
}
