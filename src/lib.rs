//! Import cost allocation core.
//!
//! This crate pools one or two import dispatches, distributes their shared
//! landed costs (freight, duties, taxes, handling, margin) across the pooled
//! product lines in proportion to each line's share of the foreign-currency
//! FOB value, and commits the resulting local-currency unit prices back to
//! the product catalog.
//!
//! The flow is a three-step wizard: select the dispatch group, upload the
//! dispatch documents to the ingestion service, then enter costs and commit.
//! The wizard is a typestate machine, the commit is staged and atomic, and an
//! exclusive lease per dispatch pool keeps two operators from allocating the
//! same dispatches at once.

pub mod commit;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod money;
pub mod storage;

// Re-export commonly used types
pub use commit::{CommitSummary, DispatchFobReport};
pub use domain::allocation::{allocate, AllocationLine};
pub use domain::dispatch::{
    CompanyId, Dispatch, DispatchDraft, DispatchId, DispatchNumber, DispatchPage, DispatchStatus,
    FobTotals,
};
pub use domain::pool::{CostCategory, CostPool, CostSchedule, PoolSummary, MARGIN_RATE};
pub use domain::product::{PriceUpdate, ProductId, ProductLine};
pub use domain::wizard::{
    create_dispatch, delete_dispatch, CommitFailure, DispatchGroup, Selection, Wizard,
};
pub use error::{CosteoError, Result};
pub use ingest::{
    DispatchRole, DispatchUpload, HttpIngestionClient, IngestionClient, IngestionReceipt,
    MockIngestionClient, SpreadsheetDocument,
};
pub use money::{AmountInput, Money};
pub use storage::memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use storage::postgres::PostgresStore;
pub use storage::{AllocationCommit, AllocationStore, CatalogStore, DispatchRegistry, Lease, RunId};

/// Get the costeo database migrator
///
/// Returns a migrator that can be run against a connection pool.
#[cfg(feature = "postgres")]
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
