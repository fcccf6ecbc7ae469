//! PostgreSQL implementation of the storage traits.
//!
//! The catalog and the registry live in the same database, which is what
//! makes the commit contract cheap to honor: `commit_allocation` runs every
//! price row and every dispatch completion inside one transaction, so a
//! failure on any row rolls the whole batch back and no dispatch status
//! advances.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::Row;

use super::{AllocationCommit, AllocationStore, CatalogStore, DispatchRegistry, Lease, RunId};
use crate::domain::dispatch::{
    Dispatch, DispatchDraft, DispatchId, DispatchNumber, DispatchPage, DispatchStatus, FobTotals,
};
use crate::domain::product::{PriceUpdate, ProductLine};
use crate::error::{CosteoError, Result};
use crate::money::Money;

/// PostgreSQL-backed catalog, registry and lease store.
///
/// # Example
/// ```ignore
/// use costeo::PostgresStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgresql://localhost/costeo").await?;
/// costeo::migrator().run(&pool).await?;
/// let store = PostgresStore::new(pool);
/// ```
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_product(row: &sqlx::postgres::PgRow) -> ProductLine {
    ProductLine {
        id: crate::domain::product::ProductId(row.get("id")),
        sku: row.get("sku"),
        name: row.get("name"),
        quantity: row.get("quantity"),
        unit_price_usd: Money::new(row.get::<Decimal, _>("unit_price_usd")),
        price: row
            .get::<Option<Decimal>, _>("price")
            .map(Money::new),
        neto: row.get::<Option<Decimal>, _>("neto").map(Money::new),
        dispatch_number: DispatchNumber(row.get("dispatch_number")),
    }
}

fn status_from_str(status: &str) -> Result<DispatchStatus> {
    match status {
        "new" => Ok(DispatchStatus::New),
        "pending" => Ok(DispatchStatus::Pending),
        "open" => Ok(DispatchStatus::Open),
        "completed" => Ok(DispatchStatus::Completed),
        other => Err(CosteoError::Other(anyhow!(
            "unknown dispatch status '{other}' in database"
        ))),
    }
}

fn row_to_dispatch(row: &sqlx::postgres::PgRow) -> Result<Dispatch> {
    let status: String = row.get("status");
    let status = status_from_str(&status)?;
    Ok(Dispatch {
        id: DispatchId(row.get("id")),
        number: DispatchNumber(row.get("number")),
        origin: row.get("origin"),
        description: row.get("description"),
        status,
        company_id: row
            .get::<Option<uuid::Uuid>, _>("company_id")
            .map(crate::domain::dispatch::CompanyId),
        total_fob_usd: Money::new(row.get::<Decimal, _>("total_fob_usd")),
        total_fob_ars: row
            .get::<Option<Decimal>, _>("total_fob_ars")
            .map(Money::new),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl CatalogStore for PostgresStore {
    #[tracing::instrument(skip(self, numbers), fields(count = numbers.len()))]
    async fn list_by_dispatch_numbers(
        &self,
        numbers: &[DispatchNumber],
    ) -> Result<Vec<ProductLine>> {
        let values: Vec<String> = numbers.iter().map(|n| n.0.clone()).collect();
        let rows = sqlx::query(
            r#"
            SELECT id, sku, name, quantity, unit_price_usd, price, neto, dispatch_number
            FROM product_lines
            WHERE dispatch_number = ANY($1)
            ORDER BY sku
            "#,
        )
        .bind(&values)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CosteoError::ExternalService(anyhow!("failed to list product lines: {e}")))?;

        Ok(rows.iter().map(row_to_product).collect())
    }

    async fn update_price(&self, update: &PriceUpdate) -> Result<()> {
        let result = sqlx::query(
            "UPDATE product_lines SET price = $1, neto = $2 WHERE id = $3",
        )
        .bind(update.price.amount())
        .bind(update.neto.amount())
        .bind(update.product_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| CosteoError::ExternalService(anyhow!("failed to update price: {e}")))?;

        if result.rows_affected() != 1 {
            return Err(CosteoError::ExternalService(anyhow!(
                "product {} does not exist",
                update.product_id
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_by_dispatch(&self, dispatch_id: DispatchId) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM product_lines
            WHERE dispatch_number = (SELECT number FROM dispatches WHERE id = $1)
            "#,
        )
        .bind(dispatch_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            CosteoError::ExternalService(anyhow!("failed to delete product lines: {e}"))
        })?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl DispatchRegistry for PostgresStore {
    async fn search(&self, term: &str, page: u32, page_size: u32) -> Result<DispatchPage> {
        let pattern = format!("%{term}%");
        let total_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM dispatches WHERE number LIKE $1")
                .bind(&pattern)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    CosteoError::ExternalService(anyhow!("failed to count dispatches: {e}"))
                })?;

        let rows = sqlx::query(
            r#"
            SELECT id, number, origin, description, status, company_id,
                   total_fob_usd, total_fob_ars, created_at
            FROM dispatches
            WHERE number LIKE $1
            ORDER BY number
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(&pattern)
        .bind(page_size as i64)
        .bind((page as i64) * (page_size as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CosteoError::ExternalService(anyhow!("failed to search dispatches: {e}")))?;

        let rows = rows
            .iter()
            .map(row_to_dispatch)
            .collect::<Result<Vec<_>>>()?;
        Ok(DispatchPage { rows, total_count })
    }

    async fn get(&self, id: DispatchId) -> Result<Dispatch> {
        let row = sqlx::query(
            r#"
            SELECT id, number, origin, description, status, company_id,
                   total_fob_usd, total_fob_ars, created_at
            FROM dispatches
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CosteoError::ExternalService(anyhow!("failed to get dispatch: {e}")))?;

        match row {
            Some(row) => row_to_dispatch(&row),
            None => Err(CosteoError::DispatchNotFound(id)),
        }
    }

    #[tracing::instrument(skip(self, draft), fields(number = %draft.number))]
    async fn create(&self, draft: DispatchDraft) -> Result<Dispatch> {
        let id = uuid::Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO dispatches (id, number, origin, description, status, company_id,
                                    total_fob_usd, created_at)
            VALUES ($1, $2, $3, $4, 'new', $5, 0, $6)
            "#,
        )
        .bind(id)
        .bind(&draft.number.0)
        .bind(&draft.origin)
        .bind(&draft.description)
        .bind(draft.company_id.map(|c| c.0))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| CosteoError::ExternalService(anyhow!("failed to create dispatch: {e}")))?;

        Ok(Dispatch {
            id: DispatchId(id),
            number: draft.number,
            origin: draft.origin,
            description: draft.description,
            status: DispatchStatus::New,
            company_id: draft.company_id,
            total_fob_usd: Money::ZERO,
            total_fob_ars: None,
            created_at: now,
        })
    }

    async fn update_status(
        &self,
        id: DispatchId,
        status: DispatchStatus,
        fob_totals: Option<FobTotals>,
    ) -> Result<()> {
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM dispatches WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    CosteoError::ExternalService(anyhow!("failed to read status: {e}"))
                })?;
        let current = status_from_str(&current.ok_or(CosteoError::DispatchNotFound(id))?)?;
        if !current.allows_transition_to(status) {
            return Err(CosteoError::InvalidState(
                id,
                current.as_str().to_string(),
                status.as_str().to_string(),
            ));
        }

        let result = match fob_totals {
            Some(totals) => sqlx::query(
                r#"
                UPDATE dispatches
                SET status = $1, total_fob_usd = $2, total_fob_ars = $3
                WHERE id = $4
                "#,
            )
            .bind(status.as_str())
            .bind(totals.foreign.amount())
            .bind(totals.local.amount())
            .bind(id.0)
            .execute(&self.pool)
            .await,
            None => sqlx::query("UPDATE dispatches SET status = $1 WHERE id = $2")
                .bind(status.as_str())
                .bind(id.0)
                .execute(&self.pool)
                .await,
        }
        .map_err(|e| CosteoError::ExternalService(anyhow!("failed to update status: {e}")))?;

        if result.rows_affected() != 1 {
            return Err(CosteoError::DispatchNotFound(id));
        }
        Ok(())
    }

    async fn delete(&self, id: DispatchId) -> Result<()> {
        let result = sqlx::query("DELETE FROM dispatches WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| CosteoError::ExternalService(anyhow!("failed to delete dispatch: {e}")))?;
        if result.rows_affected() != 1 {
            return Err(CosteoError::DispatchNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl AllocationStore for PostgresStore {
    #[tracing::instrument(skip(self), fields(dispatch = %number, holder = %holder))]
    async fn acquire_lease(
        &self,
        number: &DispatchNumber,
        holder: RunId,
        ttl_ms: i64,
    ) -> Result<Lease> {
        let now = Utc::now();
        let expires_at = now + Duration::milliseconds(ttl_ms);
        // Take over only an expired lease or our own; an unexpired foreign
        // lease makes the upsert a no-op and we fail with LeaseHeld.
        let row = sqlx::query(
            r#"
            INSERT INTO dispatch_leases (dispatch_number, holder, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (dispatch_number) DO UPDATE
            SET holder = EXCLUDED.holder,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at
            WHERE dispatch_leases.expires_at < $3
               OR dispatch_leases.holder = EXCLUDED.holder
            RETURNING dispatch_number
            "#,
        )
        .bind(number.as_str())
        .bind(holder.0)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CosteoError::ExternalService(anyhow!("failed to acquire lease: {e}")))?;

        if row.is_none() {
            return Err(CosteoError::LeaseHeld(number.to_string()));
        }
        Ok(Lease {
            dispatch_number: number.clone(),
            holder,
            acquired_at: now,
            expires_at,
        })
    }

    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        sqlx::query("DELETE FROM dispatch_leases WHERE dispatch_number = $1 AND holder = $2")
            .bind(lease.dispatch_number.as_str())
            .bind(lease.holder.0)
            .execute(&self.pool)
            .await
            .map_err(|e| CosteoError::ExternalService(anyhow!("failed to release lease: {e}")))?;
        Ok(())
    }

    #[tracing::instrument(skip(self, commit), fields(lines = commit.price_updates.len(), dispatches = commit.completions.len()))]
    async fn commit_allocation(&self, commit: &AllocationCommit) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            CosteoError::ExternalService(anyhow!("failed to begin transaction: {e}"))
        })?;

        for update in &commit.price_updates {
            let result = sqlx::query(
                "UPDATE product_lines SET price = $1, neto = $2 WHERE id = $3",
            )
            .bind(update.price.amount())
            .bind(update.neto.amount())
            .bind(update.product_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                CosteoError::ExternalService(anyhow!(
                    "failed to update product {}: {e}",
                    update.product_id
                ))
            })?;
            if result.rows_affected() != 1 {
                tx.rollback().await.ok();
                return Err(CosteoError::ExternalService(anyhow!(
                    "product {} disappeared during commit",
                    update.product_id
                )));
            }
        }

        for completion in &commit.completions {
            let result = sqlx::query(
                r#"
                UPDATE dispatches
                SET status = 'completed', total_fob_usd = $1, total_fob_ars = $2
                WHERE id = $3
                "#,
            )
            .bind(completion.fob_totals.foreign.amount())
            .bind(completion.fob_totals.local.amount())
            .bind(completion.dispatch_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                CosteoError::ExternalService(anyhow!(
                    "failed to complete dispatch {}: {e}",
                    completion.dispatch_id
                ))
            })?;
            if result.rows_affected() != 1 {
                tx.rollback().await.ok();
                return Err(CosteoError::DispatchNotFound(completion.dispatch_id));
            }
        }

        tx.commit()
            .await
            .map_err(|e| CosteoError::ExternalService(anyhow!("failed to commit transaction: {e}")))
    }
}
