//! `ChangeJournalStore` — the logical-replication-backed alternative to
//! snapshot diffing (spec.md §4.5 "ChangeJournal"). Rows are appended
//! verbatim by `harness-replication`'s worker as WAL changes decode; this
//! store only persists and replays them, it never collapses duplicates.

use async_trait::async_trait;
use harness_core::error::HarnessError;
use harness_core::ports::{ChangeJournalStore, Result};
use harness_core::types::ChangeJournalRow;
use sqlx::PgPool;
use uuid::Uuid;

pub struct PgChangeJournalStore {
    pool: PgPool,
}

impl PgChangeJournalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeJournalStore for PgChangeJournalStore {
    async fn append(&self, rows: Vec<ChangeJournalRow>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        for row in &rows {
            sqlx::query(
                r#"
                INSERT INTO change_journal
                    (id, environment_id, run_id, lsn, table_name, operation,
                     primary_key, before, after, recorded_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(row.id)
            .bind(row.environment_id)
            .bind(row.run_id)
            .bind(&row.lsn)
            .bind(&row.table_name)
            .bind(row.operation.as_str())
            .bind(&row.primary_key)
            .bind(&row.before)
            .bind(&row.after)
            .bind(row.recorded_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        }
        tx.commit()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Ordered by `(recorded_at, lsn)` — the order the WAL actually emitted
    /// them in, which is the order assertions replay against (§4.5).
    async fn list_for_run(&self, run_id: Uuid) -> Result<Vec<ChangeJournalRow>> {
        let rows = sqlx::query_as::<_, PgChangeJournalRow>(
            r#"
            SELECT id, environment_id, run_id, lsn, table_name, operation,
                   primary_key, before, after, recorded_at
            FROM change_journal
            WHERE run_id = $1
            ORDER BY recorded_at, lsn
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(HarnessError::Internal))
            .collect()
    }

    async fn delete_for_run(&self, run_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM change_journal WHERE run_id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PgChangeJournalRow {
    id: Uuid,
    environment_id: Uuid,
    run_id: Uuid,
    lsn: String,
    table_name: String,
    operation: String,
    primary_key: serde_json::Value,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
    recorded_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PgChangeJournalRow> for ChangeJournalRow {
    type Error = anyhow::Error;

    fn try_from(row: PgChangeJournalRow) -> anyhow::Result<Self> {
        Ok(Self {
            id: row.id,
            environment_id: row.environment_id,
            run_id: row.run_id,
            lsn: row.lsn,
            table_name: row.table_name,
            operation: harness_core::types::ChangeOp::from_str(&row.operation)
                .ok_or_else(|| anyhow::anyhow!("bad operation: {}", row.operation))?,
            primary_key: row.primary_key,
            before: row.before,
            after: row.after,
            recorded_at: row.recorded_at,
        })
    }
}
