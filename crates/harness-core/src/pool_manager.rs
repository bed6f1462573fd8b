//! Keeps warm, ready namespaces per template so `initEnv` can skip the clone
//! cost (`spec.md` §4.3). Thin orchestration over [`PoolStore`] (the
//! claim/status bookkeeping, implemented with `FOR UPDATE SKIP LOCKED`) and
//! [`NamespaceHandler`] (the actual schema clone/drop).

use std::sync::Arc;
use uuid::Uuid;

use crate::ports::{NamespaceHandler, PoolStore, Result};
use crate::types::EnvironmentPoolEntry;

pub struct PoolManager {
    namespaces: Arc<dyn NamespaceHandler>,
    pool: Arc<dyn PoolStore>,
}

impl PoolManager {
    pub fn new(namespaces: Arc<dyn NamespaceHandler>, pool: Arc<dyn PoolStore>) -> Self {
        Self { namespaces, pool }
    }

    /// Atomically claims the oldest `ready` entry for `template_id`,
    /// transitioning it to `in_use`. `None` means the pool was empty —
    /// callers fall back to on-demand clone (§4.3 `claim` contract).
    pub async fn claim(
        &self,
        template_id: Uuid,
        claimant_id: Uuid,
    ) -> Result<Option<EnvironmentPoolEntry>> {
        self.pool.claim(template_id, claimant_id).await
    }

    /// Releases a claimed entry back to `dirty` when its owning environment
    /// is deleted. The namespace is NOT dropped here — `refresh` drops and
    /// re-clones it later, so the pool entry's schema identity is stable
    /// across claims (§3 "Ownership rules": pool entry owns the namespace
    /// until claimed, then ownership transfers and back on release).
    pub async fn release(&self, entry_id: Uuid) -> Result<()> {
        self.pool.mark_dirty(entry_id).await
    }

    /// Drops and re-clones a dirty entry's namespace from its template,
    /// `dirty` -> `refreshing` -> `ready`. Quarantines (leaves `refreshing`,
    /// logs, does not panic) on failure so a bad template doesn't wedge the
    /// whole pool into a retry storm; the maintenance loop will try again
    /// next cycle.
    pub async fn refresh(&self, entry: &EnvironmentPoolEntry) -> Result<()> {
        self.pool.mark_refreshing(entry.id).await?;

        let outcome: Result<()> = async {
            self.namespaces.drop_namespace(&entry.namespace_name).await?;
            self.namespaces
                .clone_namespace(&entry.template_schema, &entry.namespace_name)
                .await?;
            self.namespaces
                .set_replica_identity_full(&entry.namespace_name)
                .await
        }
        .await;

        match outcome {
            Ok(()) => self.pool.mark_ready(entry.id).await,
            Err(e) => {
                tracing::error!(
                    entry_id = %entry.id, template_schema = %entry.template_schema,
                    error = %e, "pool entry refresh failed, left quarantined in refreshing"
                );
                Err(e)
            }
        }
    }

    /// Creates a brand-new pool entry for `template_schema` by cloning it,
    /// inserted directly in `ready` state.
    pub async fn create_entry(
        &self,
        template_id: Uuid,
        template_schema: &str,
    ) -> Result<EnvironmentPoolEntry> {
        let namespace_name = format!("state_pool_{}", Uuid::new_v4().simple());
        self.namespaces
            .clone_namespace(template_schema, &namespace_name)
            .await?;
        self.namespaces
            .set_replica_identity_full(&namespace_name)
            .await?;

        let now = chrono::Utc::now();
        self.pool
            .insert(EnvironmentPoolEntry {
                id: Uuid::new_v4(),
                template_id,
                template_schema: template_schema.to_string(),
                namespace_name,
                status: crate::types::PoolEntryStatus::Ready,
                last_used_at: None,
                last_refreshed_at: Some(now),
                claimant_id: None,
                claim_time: None,
                created_at: now,
                updated_at: now,
            })
            .await
    }

    /// Enqueues refreshes/clones for `template_schema` until
    /// `ready + refreshing` count reaches `target` (§4.3 `ensure_target`).
    /// Idempotent and work-stealing: safe to call concurrently from several
    /// maintenance ticks, since `claim`/`mark_refreshing` serialize on rows.
    pub async fn ensure_target(
        &self,
        template_id: Uuid,
        template_schema: &str,
        target: i64,
    ) -> Result<()> {
        let deficit = target - self.pool.count_ready(template_id).await?;
        if deficit <= 0 {
            return Ok(());
        }
        for _ in 0..deficit {
            if let Err(e) = self.create_entry(template_id, template_schema).await {
                tracing::error!(template_schema, error = %e, "failed to refill pool entry");
                return Err(e);
            }
        }
        Ok(())
    }

    /// One maintenance-loop tick: refresh every `dirty` entry back to
    /// `ready`. Quarantined (`refreshing`) entries from a prior failed
    /// attempt are retried too, since `refresh` re-marks them `refreshing`
    /// idempotently.
    pub async fn refresh_all_dirty(&self) -> Result<usize> {
        let dirty = self.pool.list_dirty().await?;
        let count = dirty.len();
        for entry in dirty {
            if let Err(e) = self.refresh(&entry).await {
                tracing::warn!(entry_id = %entry.id, error = %e, "dirty pool entry refresh failed this cycle");
            }
        }
        Ok(count)
    }
}
