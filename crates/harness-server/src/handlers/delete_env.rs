//! `POST /deleteEnv` (spec.md §6) — tears down a runtime environment,
//! releasing its pool entry or dropping its namespace.

use std::sync::Arc;

use axum::{Extension, Json};
use harness_core::Principal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEnvBody {
    pub environment_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteEnvResponse {
    pub environment_id: Uuid,
    pub status: String,
}

pub async fn delete_env(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<DeleteEnvBody>,
) -> Result<Json<DeleteEnvResponse>, AppError> {
    state
        .environments
        .delete_env(&principal, body.environment_id)
        .await?;

    Ok(Json(DeleteEnvResponse {
        environment_id: body.environment_id,
        status: "deleted".to_string(),
    }))
}
