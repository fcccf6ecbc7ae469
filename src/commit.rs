//! Commit orchestrator.
//!
//! The commit is staged: acquire the pool lease, re-fetch the product lines
//! from the catalog (the in-memory rows may be stale), recompute the summary
//! and the allocation from current inputs, validate every line, then apply
//! all price rows and dispatch completions in one atomic store operation.
//! Any failure before or during that write leaves every product line and
//! every dispatch status untouched; the run can be corrected and retried.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::allocation::allocate;
use crate::domain::dispatch::{DispatchNumber, FobTotals};
use crate::domain::pool::{CostPool, PoolSummary};
use crate::domain::wizard::state::DispatchGroup;
use crate::error::{CosteoError, Result};
use crate::money::Money;
use crate::storage::{AllocationCommit, AllocationStore, DispatchCompletion, Lease, RunId};

/// How long a commit may hold the pool lease before a crashed run can be
/// taken over.
const LEASE_TTL_MS: i64 = 5 * 60 * 1000;

/// Per-dispatch FOB subtotals reported after commit. The allocator itself
/// works on the combined pool; these exist only for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchFobReport {
    pub number: DispatchNumber,
    pub fob_foreign: Money,
    pub fob_local: Money,
}

/// Human-readable recap of a successful commit.
#[derive(Debug, Clone, Serialize)]
pub struct CommitSummary {
    pub pool_key: String,
    pub summary: PoolSummary,
    pub per_dispatch: Vec<DispatchFobReport>,
    pub lines_updated: usize,
    pub committed_at: DateTime<Utc>,
}

impl CommitSummary {
    /// Render the recap surfaced to the operator on success.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Allocation committed for pool {}\n", self.pool_key));
        out.push_str(&format!(
            "  FOB (local):          {}\n",
            self.summary.total_fob_local
        ));
        out.push_str(&format!(
            "  Costs:                {}\n",
            self.summary.total_costs
        ));
        out.push_str(&format!(
            "  Subtotal:             {}\n",
            self.summary.subtotal
        ));
        out.push_str(&format!(
            "  Margin (23%):         {}\n",
            self.summary.margin
        ));
        out.push_str(&format!(
            "  Total distributed:    {}\n",
            self.summary.total_to_distribute
        ));
        for report in &self.per_dispatch {
            out.push_str(&format!(
                "  Dispatch {}: FOB {} foreign / {} local\n",
                report.number, report.fob_foreign, report.fob_local
            ));
        }
        out.push_str(&format!("  Product lines updated: {}", self.lines_updated));
        out
    }
}

/// Execute the staged commit for one allocation run.
#[tracing::instrument(skip(store, group, pool), fields(run_id = %run_id, pool_key = %group.pool_key()))]
pub(crate) async fn run_commit<S: AllocationStore + ?Sized>(
    store: &S,
    run_id: RunId,
    group: &DispatchGroup,
    pool: &CostPool,
) -> Result<CommitSummary> {
    if !pool.margin_reviewed() {
        return Err(CosteoError::Validation(
            "margin has not been computed; review the figures before committing".to_string(),
        ));
    }
    // Always recompute from current inputs; an earlier margin calculation is
    // never trusted at commit time.
    let summary = pool.summary()?;

    // One lease per dispatch, taken in sorted order so two runs whose pools
    // overlap cannot deadlock. If any dispatch is already held the commit
    // backs off, handing back whatever it had taken so far.
    let mut numbers = group.numbers();
    numbers.sort_unstable();
    let mut leases = Vec::with_capacity(numbers.len());
    for number in &numbers {
        match store.acquire_lease(number, run_id, LEASE_TTL_MS).await {
            Ok(lease) => leases.push(lease),
            Err(error) => {
                release_leases(store, &leases).await;
                return Err(error);
            }
        }
    }

    let result = commit_under_lease(store, group, pool, &summary).await;

    release_leases(store, &leases).await;

    match &result {
        Ok(summary) => {
            counter!("costeo_commits_total", "outcome" => "committed").increment(1);
            tracing::info!(
                lines = summary.lines_updated,
                total = %summary.summary.total_to_distribute,
                "allocation committed"
            );
        }
        Err(error) => {
            counter!("costeo_commits_total", "outcome" => "aborted").increment(1);
            tracing::error!(error = %error, "commit aborted, nothing was written");
        }
    }

    result
}

async fn release_leases<S: AllocationStore + ?Sized>(store: &S, leases: &[Lease]) {
    for lease in leases {
        if let Err(e) = store.release_lease(lease).await {
            tracing::warn!(
                dispatch = %lease.dispatch_number,
                error = %e,
                "failed to release dispatch lease"
            );
        }
    }
}

async fn commit_under_lease<S: AllocationStore + ?Sized>(
    store: &S,
    group: &DispatchGroup,
    pool: &CostPool,
    summary: &PoolSummary,
) -> Result<CommitSummary> {
    let numbers = group.numbers();
    let lines = store.list_by_dispatch_numbers(&numbers).await?;
    if lines.is_empty() {
        return Err(CosteoError::NotFound(group.primary.number.clone()));
    }
    for number in &numbers {
        if !lines.iter().any(|l| &l.dispatch_number == number) {
            return Err(CosteoError::NotFound(number.clone()));
        }
    }

    let allocation = allocate(&lines, summary.total_to_distribute)?;

    // Per-dispatch FOB subtotals from the re-fetched rows, kept for the recap
    // and recorded on each dispatch at completion.
    let mut fob_by_number: BTreeMap<DispatchNumber, Decimal> = BTreeMap::new();
    for line in &lines {
        *fob_by_number
            .entry(line.dispatch_number.clone())
            .or_default() += line.fob_foreign();
    }

    let rate = pool.exchange_rate();
    let mut completions = Vec::new();
    let mut per_dispatch = Vec::new();
    for number in &numbers {
        let dispatch = if number == &group.primary.number {
            &group.primary
        } else {
            group
                .secondary
                .as_ref()
                .ok_or_else(|| CosteoError::NotFound(number.clone()))?
        };
        let fob_foreign = fob_by_number.get(number).copied().unwrap_or_default();
        let totals = FobTotals {
            foreign: Money::new(fob_foreign),
            local: Money::new(fob_foreign * rate),
        };
        completions.push(DispatchCompletion {
            dispatch_id: dispatch.id,
            fob_totals: totals,
        });
        per_dispatch.push(DispatchFobReport {
            number: number.clone(),
            fob_foreign: totals.foreign,
            fob_local: totals.local,
        });
    }

    let commit = AllocationCommit {
        price_updates: allocation.iter().map(|a| a.price_update()).collect(),
        completions,
    };

    store.commit_allocation(&commit).await?;

    Ok(CommitSummary {
        pool_key: group.pool_key(),
        summary: *summary,
        per_dispatch,
        lines_updated: commit.price_updates.len(),
        committed_at: Utc::now(),
    })
}
