//! Postgres adapters implementing `harness-core`'s port traits (spec.md
//! §4.1–§4.6). Every adapter is a thin wrapper over a shared `PgPool`;
//! `PgStores` bundles them behind `Arc<dyn Trait>` the way `harness-server`
//! wires its router state.

pub mod environments;
pub mod journal;
pub mod namespace;
pub mod pool;
pub mod snapshot;
pub mod sqlx_types;
pub mod templates;
pub mod testcatalog;

use std::sync::Arc;

use harness_core::ports::{
    ChangeJournalStore, PoolStore, RuntimeEnvironmentStore, SnapshotStore, TemplateStore,
    TestRunStore, TestStore,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub use environments::PgRuntimeEnvironmentStore;
pub use journal::PgChangeJournalStore;
pub use namespace::{NamespaceSession, PgNamespaceHandler};
pub use pool::PgPoolStore;
pub use snapshot::PgSnapshotStore;
pub use templates::PgTemplateStore;
pub use testcatalog::{PgTestRunStore, PgTestStore};

/// Every storage adapter the harness needs, bundled for `harness-server`'s
/// app state. Constructed once from a `DATABASE_URL` at startup.
#[derive(Clone)]
pub struct PgStores {
    pub pool: PgPool,
    pub namespaces: Arc<PgNamespaceHandler>,
    pub templates: Arc<dyn TemplateStore>,
    pub pool_store: Arc<dyn PoolStore>,
    pub environments: Arc<dyn RuntimeEnvironmentStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub journal: Arc<dyn ChangeJournalStore>,
    pub tests: Arc<dyn TestStore>,
    pub runs: Arc<dyn TestRunStore>,
}

impl PgStores {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            namespaces: Arc::new(PgNamespaceHandler::new(pool.clone())),
            templates: Arc::new(PgTemplateStore::new(pool.clone())),
            pool_store: Arc::new(PgPoolStore::new(pool.clone())),
            environments: Arc::new(PgRuntimeEnvironmentStore::new(pool.clone())),
            snapshots: Arc::new(PgSnapshotStore::new(pool.clone())),
            journal: Arc::new(PgChangeJournalStore::new(pool.clone())),
            tests: Arc::new(PgTestStore::new(pool.clone())),
            runs: Arc::new(PgTestRunStore::new(pool.clone())),
            pool,
        }
    }
}
