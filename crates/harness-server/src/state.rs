//! Shared application state threaded through every handler via
//! `Extension<Arc<AppState>>` — the harness's analogue of the teacher's
//! `Extension<Arc<dyn CoreService>>`, bundling the orchestrator, template
//! manager, and raw stores a handler needs.

use std::sync::Arc;

use harness_core::{EnvironmentService, PoolManager, TemplateManager};
use harness_core::orchestrator::RunOrchestrator;
use harness_postgres::PgStores;
use harness_replication::InMemoryReplicationRegistry;

use crate::auth::ControlPlaneAuth;

pub struct AppState {
    pub stores: PgStores,
    pub orchestrator: Arc<RunOrchestrator>,
    pub environments: Arc<EnvironmentService>,
    pub pool_manager: Arc<PoolManager>,
    pub template_manager: Arc<TemplateManager>,
    pub replication: Arc<InMemoryReplicationRegistry>,
    pub auth: ControlPlaneAuth,
}
