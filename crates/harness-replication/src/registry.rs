//! In-memory `schema -> ActiveRun` fan-out map (spec.md §4.5 "Registration
//! API", §5 "single dedicated tokio::task ... Arc<Mutex<HashMap<...>>>").
//! Slot lifecycle (`create_slot`/`drop_slot`) lives here too since both are
//! facets of the same "one global replication slot" resource.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use harness_core::error::HarnessError;
use harness_core::ports::{ReplicationRegistry, Result};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct ActiveRun {
    environment_id: Uuid,
    run_id: Uuid,
}

pub struct InMemoryReplicationRegistry {
    pool: PgPool,
    active: Mutex<HashMap<String, ActiveRun>>,
}

impl InMemoryReplicationRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the current schema->(environment_id, run_id) map, used by
    /// the worker each poll tick without holding the lock across I/O.
    pub(crate) fn snapshot(&self) -> HashMap<String, (Uuid, Uuid)> {
        self.active
            .lock()
            .expect("replication registry mutex poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), (v.environment_id, v.run_id)))
            .collect()
    }
}

#[async_trait]
impl ReplicationRegistry for InMemoryReplicationRegistry {
    /// Creates the slot the first time it's needed; calling this again for
    /// a slot that already exists is a no-op (idempotent per spec.md §4.5).
    /// One global slot for the whole server, never one per run (§9).
    async fn ensure_global_slot(&self, slot_name: &str, plugin: &str) -> Result<()> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM pg_replication_slots WHERE slot_name = $1)",
        )
        .bind(slot_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        if !exists.0 {
            sqlx::query("SELECT pg_create_logical_replication_slot($1, $2)")
                .bind(slot_name)
                .bind(plugin)
                .execute(&self.pool)
                .await
                .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        }
        tracing::info!(slot_name, plugin, "global replication slot ready");
        Ok(())
    }

    async fn drop_slot(&self, slot_name: &str) -> Result<()> {
        sqlx::query("SELECT pg_drop_replication_slot($1)")
            .bind(slot_name)
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Idempotent per schema — last write wins, matching spec.md §4.5.
    async fn register_active_run(&self, namespace: &str, environment_id: Uuid, run_id: Uuid) {
        self.active.lock().expect("replication registry mutex poisoned").insert(
            namespace.to_string(),
            ActiveRun {
                environment_id,
                run_id,
            },
        );
    }

    async fn unregister_active_run(&self, namespace: &str) {
        self.active.lock().expect("replication registry mutex poisoned").remove(namespace);
    }

    async fn unregister_run(&self, run_id: Uuid) {
        self.active
            .lock()
            .expect("replication registry mutex poisoned")
            .retain(|_, active| active.run_id != run_id);
    }

    async fn cleanup_environment(&self, environment_id: Uuid) {
        self.active
            .lock()
            .expect("replication registry mutex poisoned")
            .retain(|_, active| active.environment_id != environment_id);
    }

    async fn active_run_for(&self, namespace: &str) -> Option<(Uuid, Uuid)> {
        self.active
            .lock()
            .expect("replication registry mutex poisoned")
            .get(namespace)
            .map(|r| (r.environment_id, r.run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_registered_runs() {
        // Exercises the sync map directly — no pool needed for this path.
        let registry = InMemoryReplicationRegistry {
            pool: sqlx::PgPool::connect_lazy("postgres://localhost/nonexistent").unwrap(),
            active: Mutex::new(HashMap::new()),
        };
        registry
            .active
            .lock()
            .unwrap()
            .insert("state_abc".into(), ActiveRun { environment_id: Uuid::nil(), run_id: Uuid::nil() });
        assert_eq!(registry.snapshot().len(), 1);
    }
}
