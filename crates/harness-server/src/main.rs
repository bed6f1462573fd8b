//! harness-server — HTTP control plane for the agent evaluation harness.
//!
//! Reads config from env vars:
//!   DATABASE_URL                       — Postgres connection string (required)
//!   ENVIRONMENT                        — `development` bypasses auth entirely
//!   CONTROL_PLANE_URL                  — base URL of the API-key validation service
//!                                        (required unless ENVIRONMENT=development)
//!   CONTROL_PLANE_TIMEOUT_SECONDS      — request timeout, default 5
//!   BIND_ADDR                          — listen address, default 0.0.0.0:4200
//!   LOGICAL_REPLICATION_DSN            — connection string for the replication
//!                                        worker's dedicated connection (defaults
//!                                        to DATABASE_URL)
//!   LOGICAL_REPLICATION_SLOT_NAME      — global slot name, default `diffslot_global`
//!   LOGICAL_REPLICATION_PLUGIN         — output plugin, default `wal2json`
//!   LOGICAL_REPLICATION_POLL_INTERVAL_MS — default 250
//!   LOGICAL_REPLICATION_BATCH_SIZE     — rows per poll, default 500
//!   MAINTENANCE_INTERVAL_SECONDS       — pool refill / expiry sweep cadence, default 30

use std::sync::Arc;
use std::time::Duration;

use harness_core::orchestrator::RunOrchestrator;
use harness_core::ports::ReplicationRegistry as _;
use harness_core::{EnvironmentService, PoolManager, TemplateManager};
use harness_postgres::PgStores;
use harness_replication::{InMemoryReplicationRegistry, ReplicationWorker};
use harness_server::auth::ControlPlaneAuth;
use harness_server::maintenance::MaintenanceLoop;
use harness_server::router::build_router;
use harness_server::state::AppState;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_duration_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default_ms),
    )
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("warning: failed to load .env: {e}");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harness_server=debug".into()),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let environment = env_or("ENVIRONMENT", "production");
    let bind_addr = env_or("BIND_ADDR", "0.0.0.0:4200");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");
    tracing::info!("connected to database");

    let stores = PgStores::from_pool(pool.clone());

    let replication_dsn = env_or("LOGICAL_REPLICATION_DSN", &database_url);
    let replication_pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&replication_dsn)
        .await
        .expect("failed to connect replication worker to database");
    let slot_name = env_or("LOGICAL_REPLICATION_SLOT_NAME", "diffslot_global");
    let plugin = env_or("LOGICAL_REPLICATION_PLUGIN", "wal2json");
    let poll_interval = env_duration_ms("LOGICAL_REPLICATION_POLL_INTERVAL_MS", 250);
    let batch_size: i32 = std::env::var("LOGICAL_REPLICATION_BATCH_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(500);

    let replication = Arc::new(InMemoryReplicationRegistry::new(replication_pool.clone()));
    replication
        .ensure_global_slot(&slot_name, &plugin)
        .await
        .expect("failed to ensure global replication slot");

    let worker = ReplicationWorker::new(
        replication_pool,
        replication.clone(),
        stores.journal.clone(),
        slot_name.clone(),
        batch_size,
        poll_interval,
    );
    tokio::spawn(async move {
        worker.run().await;
    });
    tracing::info!(slot = %slot_name, plugin = %plugin, "replication worker spawned");

    let pool_manager = Arc::new(PoolManager::new(
        stores.namespaces.clone(),
        stores.pool_store.clone(),
    ));
    let template_manager = Arc::new(TemplateManager::new(
        stores.templates.clone(),
        stores.tests.clone(),
    ));
    let environments = Arc::new(EnvironmentService::new(
        stores.namespaces.clone(),
        pool_manager.clone(),
        stores.environments.clone(),
        template_manager.clone(),
        replication.clone(),
    ));
    let orchestrator = Arc::new(RunOrchestrator::new(
        stores.environments.clone(),
        stores.pool_store.clone(),
        stores.snapshots.clone(),
        stores.journal.clone(),
        replication.clone(),
        stores.tests.clone(),
        stores.runs.clone(),
        slot_name,
        plugin,
    ));

    let maintenance_interval =
        Duration::from_secs(env_or("MAINTENANCE_INTERVAL_SECONDS", "30").parse().unwrap_or(30));
    let maintenance = MaintenanceLoop::new(
        environments.clone(),
        pool_manager.clone(),
        maintenance_interval,
    );
    tokio::spawn(async move {
        maintenance.run().await;
    });

    let auth = if environment == "development" {
        tracing::warn!("ENVIRONMENT=development — authentication bypassed, all callers are dev-user");
        ControlPlaneAuth::dev_mode()
    } else {
        let control_plane_url =
            std::env::var("CONTROL_PLANE_URL").expect("CONTROL_PLANE_URL must be set outside development");
        let timeout = Duration::from_secs(
            env_or("CONTROL_PLANE_TIMEOUT_SECONDS", "5").parse().unwrap_or(5),
        );
        ControlPlaneAuth::new(control_plane_url, timeout)
    };

    let state = Arc::new(AppState {
        stores,
        orchestrator,
        environments,
        pool_manager,
        template_manager,
        replication,
        auth,
    });

    let app = build_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {bind_addr}: {e}"));
    tracing::info!("harness-server listening on {bind_addr}");

    axum::serve(listener, app).await.expect("server error");
}
