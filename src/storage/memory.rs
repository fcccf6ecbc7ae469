//! In-memory store for tests.
//!
//! Implements the full `AllocationStore` contract against hash maps, with
//! injectable per-row failures so the atomicity guarantees of the commit path
//! can be exercised without a database.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use super::{AllocationCommit, AllocationStore, CatalogStore, DispatchRegistry, Lease, RunId};
use crate::domain::dispatch::{
    Dispatch, DispatchDraft, DispatchId, DispatchNumber, DispatchPage, DispatchStatus, FobTotals,
};
use crate::domain::product::{PriceUpdate, ProductId, ProductLine};
use crate::error::{CosteoError, Result};
use crate::money::Money;

/// In-memory catalog + registry + lease store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    dispatches: Arc<Mutex<HashMap<DispatchId, Dispatch>>>,
    products: Arc<Mutex<HashMap<ProductId, ProductLine>>>,
    leases: Arc<Mutex<HashMap<DispatchNumber, Lease>>>,
    failing_products: Arc<Mutex<HashSet<ProductId>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a dispatch record.
    pub fn insert_dispatch(&self, dispatch: Dispatch) {
        self.dispatches.lock().insert(dispatch.id, dispatch);
    }

    /// Seed a product line (normally the ingestion service's job).
    pub fn insert_product(&self, line: ProductLine) {
        self.products.lock().insert(line.id, line);
    }

    /// Make every future write to this product line fail, simulating a
    /// catalog fault mid-batch.
    pub fn fail_updates_for(&self, id: ProductId) {
        self.failing_products.lock().insert(id);
    }

    pub fn dispatch(&self, id: DispatchId) -> Option<Dispatch> {
        self.dispatches.lock().get(&id).cloned()
    }

    pub fn product(&self, id: ProductId) -> Option<ProductLine> {
        self.products.lock().get(&id).cloned()
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn list_by_dispatch_numbers(
        &self,
        numbers: &[DispatchNumber],
    ) -> Result<Vec<ProductLine>> {
        let products = self.products.lock();
        let mut rows: Vec<ProductLine> = products
            .values()
            .filter(|p| numbers.contains(&p.dispatch_number))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(rows)
    }

    async fn update_price(&self, update: &PriceUpdate) -> Result<()> {
        if self.failing_products.lock().contains(&update.product_id) {
            return Err(CosteoError::ExternalService(anyhow::anyhow!(
                "injected write failure for product {}",
                update.product_id
            )));
        }
        let mut products = self.products.lock();
        let line = products.get_mut(&update.product_id).ok_or_else(|| {
            CosteoError::ExternalService(anyhow::anyhow!(
                "product {} does not exist",
                update.product_id
            ))
        })?;
        line.price = Some(update.price);
        line.neto = Some(update.neto);
        Ok(())
    }

    async fn delete_by_dispatch(&self, dispatch_id: DispatchId) -> Result<u64> {
        let number = self
            .dispatches
            .lock()
            .get(&dispatch_id)
            .map(|d| d.number.clone())
            .ok_or(CosteoError::DispatchNotFound(dispatch_id))?;
        let mut products = self.products.lock();
        let before = products.len();
        products.retain(|_, p| p.dispatch_number != number);
        Ok((before - products.len()) as u64)
    }
}

#[async_trait]
impl DispatchRegistry for InMemoryStore {
    async fn search(&self, term: &str, page: u32, page_size: u32) -> Result<DispatchPage> {
        let dispatches = self.dispatches.lock();
        let mut matches: Vec<Dispatch> = dispatches
            .values()
            .filter(|d| d.number.as_str().contains(term))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.number.cmp(&b.number));
        let total_count = matches.len() as i64;
        let start = (page as usize) * (page_size as usize);
        let rows = matches
            .into_iter()
            .skip(start)
            .take(page_size as usize)
            .collect();
        Ok(DispatchPage { rows, total_count })
    }

    async fn get(&self, id: DispatchId) -> Result<Dispatch> {
        self.dispatches
            .lock()
            .get(&id)
            .cloned()
            .ok_or(CosteoError::DispatchNotFound(id))
    }

    async fn create(&self, draft: DispatchDraft) -> Result<Dispatch> {
        let dispatch = Dispatch {
            id: DispatchId(uuid::Uuid::new_v4()),
            number: draft.number,
            origin: draft.origin,
            description: draft.description,
            status: DispatchStatus::New,
            company_id: draft.company_id,
            total_fob_usd: Money::ZERO,
            total_fob_ars: None,
            created_at: Utc::now(),
        };
        self.dispatches.lock().insert(dispatch.id, dispatch.clone());
        Ok(dispatch)
    }

    async fn update_status(
        &self,
        id: DispatchId,
        status: DispatchStatus,
        fob_totals: Option<FobTotals>,
    ) -> Result<()> {
        let mut dispatches = self.dispatches.lock();
        let dispatch = dispatches
            .get_mut(&id)
            .ok_or(CosteoError::DispatchNotFound(id))?;
        if !dispatch.status.allows_transition_to(status) {
            return Err(CosteoError::InvalidState(
                id,
                dispatch.status.as_str().to_string(),
                status.as_str().to_string(),
            ));
        }
        dispatch.status = status;
        if let Some(totals) = fob_totals {
            dispatch.total_fob_usd = totals.foreign;
            dispatch.total_fob_ars = Some(totals.local);
        }
        Ok(())
    }

    async fn delete(&self, id: DispatchId) -> Result<()> {
        self.dispatches
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(CosteoError::DispatchNotFound(id))
    }
}

#[async_trait]
impl AllocationStore for InMemoryStore {
    async fn acquire_lease(
        &self,
        number: &DispatchNumber,
        holder: RunId,
        ttl_ms: i64,
    ) -> Result<Lease> {
        let now = Utc::now();
        let mut leases = self.leases.lock();
        if let Some(existing) = leases.get(number) {
            if existing.holder != holder && existing.expires_at > now {
                return Err(CosteoError::LeaseHeld(number.to_string()));
            }
        }
        let lease = Lease {
            dispatch_number: number.clone(),
            holder,
            acquired_at: now,
            expires_at: now + Duration::milliseconds(ttl_ms),
        };
        leases.insert(number.clone(), lease.clone());
        Ok(lease)
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        let mut leases = self.leases.lock();
        if let Some(existing) = leases.get(&lease.dispatch_number) {
            if existing.holder == lease.holder {
                leases.remove(&lease.dispatch_number);
            }
        }
        Ok(())
    }

    async fn commit_allocation(&self, commit: &AllocationCommit) -> Result<()> {
        // Validate-all then apply-all under the same guards: nothing else can
        // touch the catalog or the registry between the two phases, so a
        // batch that validates cannot half-apply.
        let mut products = self.products.lock();
        let mut dispatches = self.dispatches.lock();
        let failing = self.failing_products.lock();

        for update in &commit.price_updates {
            if failing.contains(&update.product_id) {
                return Err(CosteoError::ExternalService(anyhow::anyhow!(
                    "injected write failure for product {}",
                    update.product_id
                )));
            }
            if !products.contains_key(&update.product_id) {
                return Err(CosteoError::ExternalService(anyhow::anyhow!(
                    "product {} does not exist",
                    update.product_id
                )));
            }
        }
        for completion in &commit.completions {
            if !dispatches.contains_key(&completion.dispatch_id) {
                return Err(CosteoError::DispatchNotFound(completion.dispatch_id));
            }
        }

        for update in &commit.price_updates {
            // Presence was validated above and the guard is still held.
            if let Some(line) = products.get_mut(&update.product_id) {
                line.price = Some(update.price);
                line.neto = Some(update.neto);
            }
        }
        for completion in &commit.completions {
            if let Some(dispatch) = dispatches.get_mut(&completion.dispatch_id) {
                dispatch.status = DispatchStatus::Completed;
                dispatch.total_fob_usd = completion.fob_totals.foreign;
                dispatch.total_fob_ars = Some(completion.fob_totals.local);
            }
        }
        Ok(())
    }
}
