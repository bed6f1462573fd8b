//! `RuntimeEnvironmentStore` — the per-caller live namespace catalog
//! (spec.md §3 "RuntimeEnvironment").

use async_trait::async_trait;
use chrono::Utc;
use harness_core::error::HarnessError;
use harness_core::ports::{Result, RuntimeEnvironmentStore};
use harness_core::types::{RuntimeEnvironment, RuntimeEnvironmentStatus};
use sqlx::PgPool;
use uuid::Uuid;

use crate::sqlx_types::PgRuntimeEnvironmentRow;

pub struct PgRuntimeEnvironmentStore {
    pool: PgPool,
}

impl PgRuntimeEnvironmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, template_id, namespace_name, pool_entry_id, status, permanent, \
    expires_at, max_idle_seconds, last_used_at, creator_id, impersonate_user_id, \
    impersonate_email, created_at, updated_at";

#[async_trait]
impl RuntimeEnvironmentStore for PgRuntimeEnvironmentStore {
    async fn create(&self, env: RuntimeEnvironment) -> Result<RuntimeEnvironment> {
        let row = sqlx::query_as::<_, PgRuntimeEnvironmentRow>(&format!(
            r#"
            INSERT INTO run_time_environments
                (id, template_id, namespace_name, pool_entry_id, status, permanent, expires_at,
                 max_idle_seconds, last_used_at, creator_id, impersonate_user_id,
                 impersonate_email, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now(), $9, $10, $11, now(), now())
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(env.id)
        .bind(env.template_id)
        .bind(&env.namespace_name)
        .bind(env.pool_entry_id)
        .bind(env.status.as_str())
        .bind(env.permanent)
        .bind(env.expires_at)
        .bind(env.max_idle_seconds)
        .bind(&env.creator_id)
        .bind(&env.impersonate_user_id)
        .bind(&env.impersonate_email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn get(&self, id: Uuid) -> Result<RuntimeEnvironment> {
        let row = sqlx::query_as::<_, PgRuntimeEnvironmentRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM run_time_environments WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .ok_or_else(|| HarnessError::NotFound(format!("environment {id}")))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn update_status(&self, id: Uuid, status: RuntimeEnvironmentStatus) -> Result<()> {
        sqlx::query(
            "UPDATE run_time_environments SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn touch(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE run_time_environments SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Environments whose explicit `expires_at` has passed, or whose
    /// `last_used_at` is older than their `max_idle_seconds` (§3 lifecycle:
    /// "ready→expired by the maintenance loop").
    async fn list_expired(&self) -> Result<Vec<RuntimeEnvironment>> {
        let now = Utc::now();
        let rows = sqlx::query_as::<_, PgRuntimeEnvironmentRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM run_time_environments
            WHERE status = 'ready'
              AND NOT permanent
              AND (
                    (expires_at IS NOT NULL AND expires_at <= $1)
                 OR (last_used_at + (max_idle_seconds || ' seconds')::interval <= $1)
              )
            "#
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(HarnessError::Internal))
            .collect()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM run_time_environments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}
