//! `POST /diffRun` (spec.md §6) — returns a materialized diff: for a
//! finished run, the diff persisted by `endRun`; for a bare environment, an
//! ad hoc comparison between two snapshot suffixes.

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
pub struct DiffRunBody {
    pub run_id: Option<Uuid>,
    pub env_id: Option<Uuid>,
    #[serde(default)]
    pub before_suffix: Option<String>,
    #[serde(default)]
    pub after_suffix: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRunResponse {
    pub before_snapshot: Option<String>,
    pub after_snapshot: Option<String>,
    pub diff: Json_,
}

pub async fn diff_run(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<DiffRunBody>,
) -> Result<Json<DiffRunResponse>, AppError> {
    if let Some(run_id) = body.run_id {
        let run = state.orchestrator.get_run(&principal, run_id).await?;
        let result = run.result.ok_or_else(|| {
            HarnessError::Conflict(format!("run {run_id} has not completed endRun yet"))
        })?;
        let diff = result.get("diff").cloned().unwrap_or(Json_::Null);
        return Ok(Json(DiffRunResponse {
            before_snapshot: run.before_snapshot_suffix,
            after_snapshot: run.after_snapshot_suffix,
            diff,
        }));
    }

    let env_id = body.env_id.ok_or_else(|| {
        HarnessError::InvalidInput("diffRun requires either runId or envId".into())
    })?;
    let before_suffix = body.before_suffix.as_deref().unwrap_or("before");
    let diff = state
        .orchestrator
        .diff_environment(&principal, env_id, before_suffix, body.after_suffix.as_deref())
        .await?;

    Ok(Json(DiffRunResponse {
        before_snapshot: Some(before_suffix.to_string()),
        after_snapshot: body.after_suffix,
        diff: serde_json::to_value(&diff).map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?,
    }))
}
