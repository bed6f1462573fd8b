//! `POST /startRun` (spec.md §4.6) — captures the before-state for an
//! environment, either via snapshot or by registering the environment's
//! namespace against the shared replication slot.

use std::sync::Arc;

use axum::{Extension, Json};
use harness_core::orchestrator::CaptureStrategy;
use harness_core::Principal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunBody {
    pub environment_id: Uuid,
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    #[serde(default)]
    pub capture_mode: Option<CaptureModeBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureModeBody {
    Snapshot,
    Journal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunResponse {
    pub run_id: Uuid,
    pub status: String,
}

pub async fn start_run(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<StartRunBody>,
) -> Result<Json<StartRunResponse>, AppError> {
    let strategy = match body.capture_mode {
        Some(CaptureModeBody::Snapshot) | None => CaptureStrategy::Snapshot,
        Some(CaptureModeBody::Journal) => CaptureStrategy::Journal,
    };

    let run = state
        .orchestrator
        .start_run(
            &principal,
            body.environment_id,
            body.test_id,
            body.suite_id,
            strategy,
        )
        .await?;

    Ok(Json(StartRunResponse {
        run_id: run.id,
        status: run.status.as_str().to_string(),
    }))
}
