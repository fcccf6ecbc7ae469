//! Wizard state transitions.
//!
//! ```text
//! Wizard<SelectingPrimary> ──select_primary(new/open)──> Wizard<GroupConfirmed>
//!          │                                                  │
//!          │                                   pair_secondary / unpair_secondary
//!          │                                                  │
//!          │                                            begin_upload
//!          │                                                  ▼
//!          │                                          Wizard<Uploading> ──upload──> Wizard<EnteringCosts>
//!          │                                                                             │
//!          └──select_primary(pending/completed)──────────────────────────────────────────┤
//!                                          (resume: upload already happened)             │
//!                                                                                 compute_margin, commit
//!                                                                                        ▼
//!                                                                                Wizard<Committed>
//! ```
//!
//! Navigating backward before commit has no persisted side effects: selection
//! and upload acknowledgement are the only state advanced, and both are
//! idempotent to repeat. Once commit begins, the orchestrator owns
//! abortability (see `crate::commit`).

use chrono::Utc;
use rust_decimal::Decimal;

use super::state::{
    Committed, DispatchGroup, EnteringCosts, GroupConfirmed, SelectingPrimary, Uploading, Wizard,
};
use crate::commit::{run_commit, CommitSummary};
use crate::domain::dispatch::{Dispatch, DispatchDraft, DispatchPage, DispatchStatus};
use crate::domain::pool::{CostCategory, CostPool, PoolSummary};
use crate::error::{CosteoError, Result};
use crate::ingest::{DispatchRole, DispatchUpload, IngestionClient, SpreadsheetDocument};
use crate::money::Money;
use crate::storage::{AllocationStore, DispatchRegistry};

/// Outcome of choosing a primary dispatch: either the group is confirmed and
/// the run proceeds through upload, or the dispatch already has its products
/// loaded and the run resumes straight at cost entry.
#[derive(Debug)]
pub enum Selection {
    Confirmed(Wizard<GroupConfirmed>),
    Resumed(Box<Wizard<EnteringCosts>>),
}

impl Wizard<SelectingPrimary> {
    /// Choose the primary dispatch.
    ///
    /// A `pending` dispatch skips to cost entry (upload already happened,
    /// costs were not yet run); whether it originally had a paired secondary
    /// is not persisted, so the resumed run is single-dispatch. A `completed`
    /// dispatch also skips to cost entry for review or a full re-run.
    pub fn select_primary(self, dispatch: Dispatch) -> Selection {
        if dispatch.status.resumes_at_costs() {
            tracing::info!(
                run_id = %self.run_id,
                dispatch = %dispatch.number,
                status = %dispatch.status,
                "resuming at cost entry"
            );
            let pool = CostPool::new(dispatch.total_fob_usd, None);
            return Selection::Resumed(Box::new(Wizard {
                run_id: self.run_id,
                state: EnteringCosts {
                    group: DispatchGroup::single(dispatch),
                    pool,
                    resumed: true,
                    entered_at: Utc::now(),
                },
            }));
        }

        Selection::Confirmed(Wizard {
            run_id: self.run_id,
            state: GroupConfirmed {
                group: DispatchGroup::single(dispatch),
                confirmed_at: Utc::now(),
            },
        })
    }
}

impl Wizard<GroupConfirmed> {
    /// Pair a secondary dispatch into the pool. Pairing the primary with
    /// itself is rejected.
    pub fn pair_secondary(mut self, dispatch: Dispatch) -> Result<Self> {
        if dispatch.number == self.state.group.primary.number {
            return Err(CosteoError::Validation(format!(
                "dispatch {} is already the primary of this pool",
                dispatch.number
            )));
        }
        self.state.group.secondary = Some(dispatch);
        Ok(self)
    }

    /// Drop the chosen secondary, returning to single-dispatch mode. No side
    /// effects.
    pub fn unpair_secondary(mut self) -> Self {
        self.state.group.secondary = None;
        self
    }

    /// Candidate rows for the secondary-selection list: the already-chosen
    /// primary is excluded so the pool cannot pair with itself.
    pub fn filter_candidates(&self, page: DispatchPage) -> DispatchPage {
        let primary = &self.state.group.primary.number;
        let before = page.rows.len() as i64;
        let rows: Vec<Dispatch> = page
            .rows
            .into_iter()
            .filter(|d| &d.number != primary)
            .collect();
        let excluded = before - rows.len() as i64;
        DispatchPage {
            rows,
            total_count: (page.total_count - excluded).max(0),
        }
    }

    pub fn begin_upload(self) -> Wizard<Uploading> {
        Wizard {
            run_id: self.run_id,
            state: Uploading {
                group: self.state.group,
                started_at: Utc::now(),
            },
        }
    }
}

impl Wizard<Uploading> {
    /// Send the group's documents to the ingestion service and collect the
    /// FOB totals it reports.
    ///
    /// Uploads are strictly sequential: the primary's document is sent and
    /// acknowledged before the secondary's upload begins; the primary sits in
    /// `pending` while that happens. A dual group without a secondary
    /// document (or the reverse) is rejected before any network call.
    pub async fn upload<I: IngestionClient + ?Sized>(
        self,
        ingestion: &I,
        primary_document: SpreadsheetDocument,
        secondary_document: Option<SpreadsheetDocument>,
    ) -> Result<Wizard<EnteringCosts>> {
        let group = self.state.group;
        if group.is_dual() != secondary_document.is_some() {
            return Err(CosteoError::Validation(
                "one document is required per dispatch in the group".to_string(),
            ));
        }
        let pool_size = if group.is_dual() { 2 } else { 1 };

        let mut primary = group.primary;
        let primary_receipt = ingestion
            .submit(DispatchUpload {
                dispatch_number: primary.number.clone(),
                description: primary.description.clone(),
                origin: primary.origin.clone(),
                role: DispatchRole::Primary,
                pool_size,
                document: primary_document,
            })
            .await?;
        primary.id = primary_receipt.dispatch_id;
        primary.status = DispatchStatus::Pending;
        primary.total_fob_usd = primary_receipt.total_fob_foreign;

        let mut secondary = group.secondary;
        let mut secondary_fob = None;
        if let (Some(dispatch), Some(document)) = (secondary.as_mut(), secondary_document) {
            let receipt = ingestion
                .submit(DispatchUpload {
                    dispatch_number: dispatch.number.clone(),
                    description: dispatch.description.clone(),
                    origin: dispatch.origin.clone(),
                    role: DispatchRole::Secondary,
                    pool_size,
                    document,
                })
                .await?;
            dispatch.id = receipt.dispatch_id;
            dispatch.status = DispatchStatus::Pending;
            dispatch.total_fob_usd = receipt.total_fob_foreign;
            secondary_fob = Some(receipt.total_fob_foreign);
        }

        let pool = CostPool::new(primary_receipt.total_fob_foreign, secondary_fob);

        tracing::info!(
            run_id = %self.run_id,
            primary = %primary.number,
            dual = secondary.is_some(),
            "documents ingested, entering cost form"
        );

        Ok(Wizard {
            run_id: self.run_id,
            state: EnteringCosts {
                group: DispatchGroup { primary, secondary },
                pool,
                resumed: false,
                entered_at: Utc::now(),
            },
        })
    }
}

/// A failed commit hands the run back so the operator can correct inputs and
/// retry; nothing was persisted.
#[derive(Debug)]
pub struct CommitFailure {
    pub wizard: Box<Wizard<EnteringCosts>>,
    pub error: CosteoError,
}

impl Wizard<EnteringCosts> {
    pub fn set_exchange_rate(&mut self, rate: Decimal) -> Result<()> {
        self.state.pool.set_exchange_rate(rate)
    }

    pub fn set_cost(&mut self, category: CostCategory, amount: Money) -> Result<()> {
        self.state.pool.set_cost(category, amount)
    }

    /// The explicit margin-calculation action; a commit without it is
    /// rejected.
    pub fn compute_margin(&mut self) -> Result<PoolSummary> {
        self.state.pool.compute_margin()
    }

    /// Run the staged commit: re-fetch product lines, recompute the summary
    /// and allocation from current inputs, and apply everything atomically
    /// under the pool lease.
    ///
    /// On failure the run is returned intact inside [`CommitFailure`]: no
    /// product line and no dispatch status changed.
    pub async fn commit<S: AllocationStore + ?Sized>(
        self,
        store: &S,
    ) -> std::result::Result<Wizard<Committed>, CommitFailure> {
        match run_commit(store, self.run_id, &self.state.group, &self.state.pool).await {
            Ok(summary) => {
                let mut group = self.state.group;
                apply_completion(&mut group.primary, &summary);
                if let Some(secondary) = group.secondary.as_mut() {
                    apply_completion(secondary, &summary);
                }
                Ok(Wizard {
                    run_id: self.run_id,
                    state: Committed {
                        group,
                        committed_at: summary.committed_at,
                        summary,
                    },
                })
            }
            Err(error) => Err(CommitFailure {
                wizard: Box::new(self),
                error,
            }),
        }
    }
}

/// Mirror the persisted completion into the in-memory record. The FOB totals
/// come from the catalog rows the commit re-fetched and wrote, which win over
/// the ingestion-reported figure when the two disagree.
fn apply_completion(dispatch: &mut Dispatch, summary: &CommitSummary) {
    dispatch.status = DispatchStatus::Completed;
    if let Some(report) = summary
        .per_dispatch
        .iter()
        .find(|r| r.number == dispatch.number)
    {
        dispatch.total_fob_usd = report.fob_foreign;
        dispatch.total_fob_ars = Some(report.fob_local);
    }
}

impl Wizard<Committed> {
    pub fn summary(&self) -> &CommitSummary {
        &self.state.summary
    }
}

// ============================================================================
// Registry operations owned by the aggregator
// ============================================================================

/// Create a new dispatch.
///
/// A draft with no resolvable company association is rejected with a
/// consistency error rather than silently defaulting.
pub async fn create_dispatch<R: DispatchRegistry + ?Sized>(
    registry: &R,
    draft: DispatchDraft,
) -> Result<Dispatch> {
    if draft.company_id.is_none() {
        return Err(CosteoError::Consistency(format!(
            "dispatch {} has no resolvable company association",
            draft.number
        )));
    }
    registry.create(draft).await
}

/// Delete a dispatch and everything under it: product lines first, then the
/// dispatch record. Irreversible; the caller must pass explicit confirmation.
pub async fn delete_dispatch<S: AllocationStore + ?Sized>(
    store: &S,
    dispatch: &Dispatch,
    confirmed: bool,
) -> Result<u64> {
    if !confirmed {
        return Err(CosteoError::Validation(
            "dispatch deletion requires explicit confirmation".to_string(),
        ));
    }
    let removed = store.delete_by_dispatch(dispatch.id).await?;
    store.delete(dispatch.id).await?;
    tracing::info!(
        dispatch = %dispatch.number,
        product_lines_removed = removed,
        "dispatch deleted"
    );
    Ok(removed)
}
