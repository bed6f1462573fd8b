//! Background change-journal worker (spec.md §4.5, §5 "a single dedicated
//! tokio::task"). Modeled directly on the teacher's `OutboxDispatcher::run`
//! loop shape: poll, process, sleep-on-empty, log-and-retry-on-error, never
//! return under normal operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use harness_core::ports::ChangeJournalStore;
use harness_core::types::ChangeJournalRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::decode::{decode_wal2json, DEFAULT_PLUGIN_OPTIONS};
use crate::registry::InMemoryReplicationRegistry;

pub struct ReplicationWorker {
    pool: PgPool,
    registry: Arc<InMemoryReplicationRegistry>,
    journal: Arc<dyn ChangeJournalStore>,
    slot_name: String,
    batch_size: i32,
    poll_interval: Duration,
}

impl ReplicationWorker {
    pub fn new(
        pool: PgPool,
        registry: Arc<InMemoryReplicationRegistry>,
        journal: Arc<dyn ChangeJournalStore>,
        slot_name: String,
        batch_size: i32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            registry,
            journal,
            slot_name,
            batch_size,
            poll_interval,
        }
    }

    /// Runs forever. Spawn with `tokio::spawn`, never `std::thread::spawn`
    /// (spec.md §9 REDESIGN FLAGS — this is the idiomatic Rust
    /// re-architecture of the Python original's `threading.Thread`).
    pub async fn run(&self) {
        tracing::info!(
            slot = %self.slot_name,
            batch_size = self.batch_size,
            "replication worker started"
        );
        loop {
            match self.poll_once().await {
                Ok(0) => tokio::time::sleep(self.poll_interval).await,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "replication poll failed, retrying");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Polls the slot once, journals matched changes, and returns how many
    /// rows were read (0 means the slot was empty this tick).
    async fn poll_once(&self) -> anyhow::Result<usize> {
        let options_clause: String = DEFAULT_PLUGIN_OPTIONS
            .iter()
            .map(|(k, v)| format!("'{k}', '{v}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT lsn::text, data FROM pg_logical_slot_get_changes($1, NULL, $2, {options_clause})"
        );

        let rows = sqlx::query(&sql)
            .bind(&self.slot_name)
            .bind(self.batch_size)
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let active = self.registry.snapshot();
        let mut by_run: HashMap<Uuid, Vec<ChangeJournalRow>> = HashMap::new();

        for row in &rows {
            let lsn: String = row.get("lsn");
            let data: String = row.get("data");
            let recorded_at = Utc::now();

            for change in decode_wal2json(&data)? {
                let Some((environment_id, run_id)) = active.get(&change.schema).copied() else {
                    continue;
                };
                by_run.entry(run_id).or_default().push(ChangeJournalRow {
                    id: Uuid::new_v4(),
                    environment_id,
                    run_id,
                    lsn: lsn.clone(),
                    table_name: change.table,
                    operation: change.operation,
                    primary_key: change.primary_key,
                    before: change.before,
                    after: change.after,
                    recorded_at,
                });
            }
        }

        for (run_id, journal_rows) in by_run {
            let count = journal_rows.len();
            if let Err(e) = self.journal.append(journal_rows).await {
                tracing::error!(run_id = %run_id, error = %e, "failed to append journal rows");
            } else {
                tracing::debug!(run_id = %run_id, count, "journaled changes");
            }
        }

        Ok(rows.len())
    }
}
