//! Background maintenance loop (spec.md §9 "Background cleanup"): sweeps
//! expired environments and refills warm pool entries on a fixed interval.
//! Grounded on the teacher's `OutboxDispatcher` — a single struct owning its
//! interval, spawned once from `main` via `tokio::spawn`, that never returns
//! under normal operation.

use std::sync::Arc;
use std::time::Duration;

use harness_core::{EnvironmentService, PoolManager};

pub struct MaintenanceLoop {
    environments: Arc<EnvironmentService>,
    pool_manager: Arc<PoolManager>,
    interval: Duration,
}

impl MaintenanceLoop {
    pub fn new(
        environments: Arc<EnvironmentService>,
        pool_manager: Arc<PoolManager>,
        interval: Duration,
    ) -> Self {
        Self {
            environments,
            pool_manager,
            interval,
        }
    }

    /// Runs forever. Each tick: expire overdue environments, then refresh
    /// any pool entries left `dirty` by a `deleteEnv`/expiry cleanup. Errors
    /// are logged and retried next tick rather than crashing the process —
    /// a single bad template shouldn't take the whole pool down.
    pub async fn run(&self) {
        tracing::info!(interval = ?self.interval, "maintenance loop started");
        loop {
            match self.environments.run_expiry_sweep().await {
                Ok(count) if count > 0 => {
                    tracing::info!(count, "expired environments swept");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
            }

            match self.pool_manager.refresh_all_dirty().await {
                Ok(count) if count > 0 => {
                    tracing::info!(count, "dirty pool entries refreshed");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "pool refresh failed"),
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
