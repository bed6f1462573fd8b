//! `POST /evaluateRun` (spec.md §6) — re-reads the stored score/diff for a
//! completed run without recomputing or mutating it; a read-only twin of
//! the scoring `endRun` already performed.

use std::sync::Arc;

use axum::{Extension, Json};
use harness_core::{HarnessError, Principal};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json_;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRunBody {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRunResponse {
    pub run_id: Uuid,
    pub status: String,
    pub result: Json_,
}

pub async fn evaluate_run(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<EvaluateRunBody>,
) -> Result<Json<EvaluateRunResponse>, AppError> {
    let run = state.orchestrator.get_run(&principal, body.run_id).await?;
    let result = run.result.ok_or_else(|| {
        HarnessError::Conflict(format!("run {} has not completed endRun yet", body.run_id))
    })?;

    Ok(Json(EvaluateRunResponse {
        run_id: run.id,
        status: run.status.as_str().to_string(),
        result,
    }))
}
