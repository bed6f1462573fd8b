//! `PoolStore` — warm-pool claim/release/refresh bookkeeping (spec.md §4.3).
//! `claim` uses `SELECT ... FOR UPDATE SKIP LOCKED` so two concurrent
//! claimants never observe the same row as ready (§5 Shared resources).

use async_trait::async_trait;
use harness_core::error::HarnessError;
use harness_core::ports::{PoolStore, Result};
use harness_core::types::EnvironmentPoolEntry;
use sqlx::PgPool;
use uuid::Uuid;

use crate::sqlx_types::PgPoolEntryRow;

pub struct PgPoolStore {
    pool: PgPool,
}

impl PgPoolStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, template_id, template_schema, namespace_name, status, \
    last_used_at, last_refreshed_at, claimant_id, claim_time, created_at, updated_at";

#[async_trait]
impl PoolStore for PgPoolStore {
    async fn insert(&self, entry: EnvironmentPoolEntry) -> Result<EnvironmentPoolEntry> {
        let row = sqlx::query_as::<_, PgPoolEntryRow>(&format!(
            r#"
            INSERT INTO environment_pool_entries
                (id, template_id, template_schema, namespace_name, status,
                 last_refreshed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now(), now(), now())
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(entry.id)
        .bind(entry.template_id)
        .bind(&entry.template_schema)
        .bind(&entry.namespace_name)
        .bind(entry.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn claim(
        &self,
        template_id: Uuid,
        claimant_id: Uuid,
    ) -> Result<Option<EnvironmentPoolEntry>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        let candidate = sqlx::query_as::<_, PgPoolEntryRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM environment_pool_entries
            WHERE template_id = $1 AND status = 'ready'
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#
        ))
        .bind(template_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        let Some(candidate) = candidate else {
            tx.rollback()
                .await
                .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
            return Ok(None);
        };

        let claimed = sqlx::query_as::<_, PgPoolEntryRow>(&format!(
            r#"
            UPDATE environment_pool_entries
            SET status = 'in_use', claimant_id = $2, claim_time = now(),
                last_used_at = now(), updated_at = now()
            WHERE id = $1
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(candidate.id)
        .bind(claimant_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        tracing::debug!(template_id = %template_id, entry_id = %claimed.id, "claimed pool entry");
        claimed.try_into().map(Some).map_err(HarnessError::Internal)
    }

    async fn mark_dirty(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE environment_pool_entries SET status = 'dirty', claimant_id = NULL, \
             claim_time = NULL, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn mark_refreshing(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE environment_pool_entries SET status = 'refreshing', updated_at = now() \
             WHERE id = $1 AND status = 'dirty'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn mark_ready(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE environment_pool_entries SET status = 'ready', last_refreshed_at = now(), \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn count_ready(&self, template_id: Uuid) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM environment_pool_entries \
             WHERE template_id = $1 AND status IN ('ready', 'refreshing')",
        )
        .bind(template_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(count)
    }

    async fn list_dirty(&self) -> Result<Vec<EnvironmentPoolEntry>> {
        let rows = sqlx::query_as::<_, PgPoolEntryRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM environment_pool_entries WHERE status = 'dirty'"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(HarnessError::Internal))
            .collect()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM environment_pool_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}
