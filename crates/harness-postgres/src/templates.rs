//! `TemplateStore` — Postgres-backed template catalog (spec.md §4.2, §3
//! "TemplateEnvironment"). Templates are immutable once registered; a new
//! version supersedes rather than overwriting.

use async_trait::async_trait;
use harness_core::error::HarnessError;
use harness_core::ports::{Result, TemplateStore};
use harness_core::types::TemplateEnvironment;
use sqlx::PgPool;
use uuid::Uuid;

use crate::sqlx_types::PgTemplateRow;

pub struct PgTemplateStore {
    pool: PgPool,
}

impl PgTemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn create(&self, template: TemplateEnvironment) -> Result<TemplateEnvironment> {
        let table_order = template
            .table_order
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        let row = sqlx::query_as::<_, PgTemplateRow>(
            r#"
            INSERT INTO environments
                (id, service, name, version, visibility, owner_id, kind, location,
                 table_order, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())
            ON CONFLICT (service, name, version, owner_id) DO NOTHING
            RETURNING id, service, name, version, visibility, owner_id, kind, location,
                      table_order, created_at, updated_at
            "#,
        )
        .bind(template.id)
        .bind(&template.service)
        .bind(&template.name)
        .bind(template.version)
        .bind(template.visibility.as_str())
        .bind(&template.owner_id)
        .bind(template.kind.as_str())
        .bind(&template.location)
        .bind(table_order)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        match row {
            Some(row) => row
                .try_into()
                .map_err(|e: anyhow::Error| HarnessError::Internal(e)),
            None => Err(HarnessError::Conflict(format!(
                "template {}/{} v{} already registered for owner {:?}",
                template.service, template.name, template.version, template.owner_id
            ))),
        }
    }

    async fn get(&self, id: Uuid) -> Result<TemplateEnvironment> {
        let row = sqlx::query_as::<_, PgTemplateRow>(
            "SELECT id, service, name, version, visibility, owner_id, kind, location, \
             table_order, created_at, updated_at FROM environments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .ok_or_else(|| HarnessError::NotFound(format!("template {id}")))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn get_latest(&self, service: &str, name: &str) -> Result<TemplateEnvironment> {
        let row = sqlx::query_as::<_, PgTemplateRow>(
            "SELECT id, service, name, version, visibility, owner_id, kind, location, \
             table_order, created_at, updated_at FROM environments \
             WHERE service = $1 AND name = $2 ORDER BY version DESC LIMIT 1",
        )
        .bind(service)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .ok_or_else(|| HarnessError::NotFound(format!("template {service}/{name}")))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn get_version(
        &self,
        service: &str,
        name: &str,
        version: i32,
    ) -> Result<TemplateEnvironment> {
        let row = sqlx::query_as::<_, PgTemplateRow>(
            "SELECT id, service, name, version, visibility, owner_id, kind, location, \
             table_order, created_at, updated_at FROM environments \
             WHERE service = $1 AND name = $2 AND version = $3",
        )
        .bind(service)
        .bind(name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .ok_or_else(|| HarnessError::NotFound(format!("template {service}/{name} v{version}")))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    /// Lists one row per (service, name), deduplicated with newest kept
    /// (§4.2). Visibility filtering (public-or-owned-by-caller) happens in
    /// the caller, since that's a principal-scoped decision, not a storage
    /// one.
    async fn list(
        &self,
        service: Option<&str>,
        owner_id: Option<&str>,
    ) -> Result<Vec<TemplateEnvironment>> {
        let rows = sqlx::query_as::<_, PgTemplateRow>(
            r#"
            SELECT DISTINCT ON (service, name)
                   id, service, name, version, visibility, owner_id, kind, location,
                   table_order, created_at, updated_at
            FROM environments
            WHERE ($1::text IS NULL OR service = $1)
              AND (visibility = 'public' OR owner_id = $2)
            ORDER BY service, name, version DESC
            "#,
        )
        .bind(service)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        rows.into_iter()
            .map(|r| r.try_into().map_err(HarnessError::Internal))
            .collect()
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM environments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}
