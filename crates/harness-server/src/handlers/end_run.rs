//! `POST /endRun` (spec.md §4.6, §4.8) — materializes the diff against the
//! before-state captured by `startRun` and scores it against the test's
//! assertion spec (or an inline override).

use std::sync::Arc;

use axum::{Extension, Json};
use harness_core::dsl::Score;
use harness_core::Principal;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json_;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRunBody {
    pub run_id: Uuid,
    pub expected_output: Option<Json_>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRunResponse {
    pub run_id: Uuid,
    pub status: String,
    pub passed: bool,
    pub score: Score,
    pub failures: Vec<String>,
}

pub async fn end_run(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<EndRunBody>,
) -> Result<Json<EndRunResponse>, AppError> {
    let (_diff, result) = state
        .orchestrator
        .end_run(&principal, body.run_id, body.expected_output)
        .await?;

    Ok(Json(EndRunResponse {
        run_id: body.run_id,
        status: if result.passed { "passed" } else { "failed" }.to_string(),
        passed: result.passed,
        score: result.score,
        failures: result.failures,
    }))
}
