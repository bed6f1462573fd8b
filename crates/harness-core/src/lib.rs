//! Pure domain logic for the agent evaluation harness: entity types, the
//! port traits storage adapters implement, the row-level diff currency, the
//! DSL compiler + assertion engine, and the run orchestrator that ties them
//! together. Nothing here touches sqlx, axum, or the network — adapters in
//! `harness-postgres`, `harness-replication` and `harness-server` depend on
//! this crate, never the other way around.

pub mod diff;
pub mod dsl;
pub mod environment_service;
pub mod error;
pub mod orchestrator;
pub mod pool_manager;
pub mod ports;
pub mod principal;
pub mod template_manager;
pub mod types;

pub use environment_service::{EnvironmentService, InitEnvRequest};
pub use error::HarnessError;
pub use pool_manager::PoolManager;
pub use principal::Principal;
pub use template_manager::{ResolvedTemplate, TemplateManager, TemplateRef};
