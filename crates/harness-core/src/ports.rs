//! Storage and infrastructure port traits — implemented by `harness-postgres`
//! and `harness-replication`. Core logic depends only on these traits, never
//! on sqlx or the replication protocol directly.

use async_trait::async_trait;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::error::HarnessError;
use crate::types::*;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Creates and tears down the Postgres namespace (schema) backing a runtime
/// environment, and configures its replica identity for journal capture.
#[async_trait]
pub trait NamespaceHandler: Send + Sync {
    /// Create an empty namespace with the given name.
    async fn create_empty(&self, namespace: &str) -> Result<()>;

    /// Clone the structure and contents of `source` into a freshly created
    /// namespace named `target`.
    async fn clone_namespace(&self, source: &str, target: &str) -> Result<()>;

    /// Drop a namespace and everything in it. Idempotent: dropping a
    /// namespace that does not exist is not an error.
    async fn drop_namespace(&self, namespace: &str) -> Result<()>;

    /// Set `REPLICA IDENTITY FULL` on every table in the namespace so that
    /// logical replication emits full before-images for updates and deletes.
    async fn set_replica_identity_full(&self, namespace: &str) -> Result<()>;

    /// List the names of user tables in a namespace, in a stable order
    /// (dependency order if known, else alphabetical).
    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn create(&self, template: TemplateEnvironment) -> Result<TemplateEnvironment>;
    async fn get(&self, id: Uuid) -> Result<TemplateEnvironment>;
    async fn get_latest(&self, service: &str, name: &str) -> Result<TemplateEnvironment>;
    async fn get_version(&self, service: &str, name: &str, version: i32) -> Result<TemplateEnvironment>;
    async fn list(&self, service: Option<&str>, owner_id: Option<&str>) -> Result<Vec<TemplateEnvironment>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Insert a freshly refreshed entry in `ready` state.
    async fn insert(&self, entry: EnvironmentPoolEntry) -> Result<EnvironmentPoolEntry>;

    /// Atomically claim one `ready` entry for `template_id`, transitioning it
    /// to `in_use` and recording the claimant. Implemented with
    /// `FOR UPDATE SKIP LOCKED` so concurrent claimants never contend.
    /// Returns `None` if the pool is empty for this template.
    async fn claim(&self, template_id: Uuid, claimant_id: Uuid) -> Result<Option<EnvironmentPoolEntry>>;

    /// Mark an entry `dirty` after a failed or completed run so the
    /// maintenance loop recycles it.
    async fn mark_dirty(&self, id: Uuid) -> Result<()>;

    /// Mark an entry `refreshing` while the maintenance loop repopulates it.
    async fn mark_refreshing(&self, id: Uuid) -> Result<()>;

    /// Transition a `dirty`/`refreshing` entry back to `ready` after the
    /// maintenance loop has re-cloned the template into it.
    async fn mark_ready(&self, id: Uuid) -> Result<()>;

    async fn count_ready(&self, template_id: Uuid) -> Result<i64>;
    async fn list_dirty(&self) -> Result<Vec<EnvironmentPoolEntry>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait RuntimeEnvironmentStore: Send + Sync {
    async fn create(&self, env: RuntimeEnvironment) -> Result<RuntimeEnvironment>;
    async fn get(&self, id: Uuid) -> Result<RuntimeEnvironment>;
    async fn update_status(&self, id: Uuid, status: RuntimeEnvironmentStatus) -> Result<()>;
    async fn touch(&self, id: Uuid) -> Result<()>;
    async fn list_expired(&self) -> Result<Vec<RuntimeEnvironment>>;
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Point-in-time snapshot/diff engine, keyed by environment + suffix
/// (`before`/`after`, or a caller-chosen label).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `CREATE TABLE <table>_snapshot_<suffix> AS SELECT * FROM <table>` for
    /// every table in the namespace, recording row count and checksum against
    /// `environment_id` so a later `diff` can short-circuit unchanged tables
    /// (`spec.md` §4.4 "Table-skip optimization").
    async fn capture(
        &self,
        environment_id: Uuid,
        namespace: &str,
        suffix: &str,
    ) -> Result<Vec<SnapshotMetadata>>;

    /// Drop the snapshot tables for a given suffix.
    async fn discard(&self, namespace: &str, suffix: &str) -> Result<()>;

    /// Compute the diff between two previously captured snapshots (or between
    /// a snapshot and live table state when `after_suffix` is `None`). Tables
    /// whose stored `(row_count, checksum)` fingerprint is unchanged between
    /// `before_suffix` and `after_suffix` are skipped without re-fetching
    /// rows.
    async fn diff(
        &self,
        environment_id: Uuid,
        namespace: &str,
        before_suffix: &str,
        after_suffix: Option<&str>,
    ) -> Result<ChangeSet>;
}

#[async_trait]
pub trait ChangeJournalStore: Send + Sync {
    async fn append(&self, rows: Vec<ChangeJournalRow>) -> Result<()>;
    async fn list_for_run(&self, run_id: Uuid) -> Result<Vec<ChangeJournalRow>>;
    async fn delete_for_run(&self, run_id: Uuid) -> Result<()>;
}

/// Tracks which (environment, run) pair a namespace's changes belong to while
/// a logical-replication worker fans decoded WAL changes out by schema.
#[async_trait]
pub trait ReplicationRegistry: Send + Sync {
    /// Creates the single global slot if it doesn't already exist. Called
    /// once at server startup, never per-run (§9 rejects per-run slots).
    async fn ensure_global_slot(&self, slot_name: &str, plugin: &str) -> Result<()>;
    async fn drop_slot(&self, slot_name: &str) -> Result<()>;
    async fn register_active_run(&self, namespace: &str, environment_id: Uuid, run_id: Uuid);
    async fn unregister_active_run(&self, namespace: &str);
    /// Removes every schema entry registered for `run_id`, regardless of
    /// which namespace it lives under. Used when a run ends and the caller
    /// doesn't have the namespace handy (§4.5).
    async fn unregister_run(&self, run_id: Uuid);
    /// Removes every schema entry registered under `environment_id`, across
    /// every run. Called when an environment is deleted or expires, so a
    /// later reused schema name never fans out to a stale run (§4.5, §4.2
    /// environment lifecycle).
    async fn cleanup_environment(&self, environment_id: Uuid);
    async fn active_run_for(&self, namespace: &str) -> Option<(Uuid, Uuid)>;
}

#[async_trait]
pub trait TestStore: Send + Sync {
    async fn create(&self, test: Test) -> Result<Test>;
    async fn get(&self, id: Uuid) -> Result<Test>;
    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<Test>>;
    async fn update(&self, test: Test) -> Result<Test>;
    async fn delete(&self, id: Uuid) -> Result<()>;

    async fn create_suite(&self, suite: TestSuite) -> Result<TestSuite>;
    async fn get_suite(&self, id: Uuid) -> Result<TestSuite>;
    async fn list_suites(&self, owner_id: Option<&str>) -> Result<Vec<TestSuite>>;
    async fn add_member(&self, suite_id: Uuid, test_id: Uuid, ordinal: i32) -> Result<()>;
    async fn list_members(&self, suite_id: Uuid) -> Result<Vec<Test>>;
}

#[async_trait]
pub trait TestRunStore: Send + Sync {
    async fn create(&self, run: TestRun) -> Result<TestRun>;
    async fn get(&self, id: Uuid) -> Result<TestRun>;
    async fn update_status(&self, id: Uuid, status: TestRunStatus) -> Result<()>;
    async fn record_result(&self, id: Uuid, result: Json) -> Result<()>;
    async fn list_for_suite(&self, suite_id: Uuid) -> Result<Vec<TestRun>>;
}
