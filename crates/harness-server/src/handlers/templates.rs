//! `GET /templates` (spec.md §6) — lists templates visible to the caller
//! (public, or owned by the caller).

use std::sync::Arc;

use axum::{Extension, Json};
use harness_core::Principal;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use harness_core::types::TemplateEnvironment;

pub async fn list_templates(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<TemplateEnvironment>>, AppError> {
    let templates = state.template_manager.list(&principal).await?;
    Ok(Json(templates))
}

pub async fn get_template(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    axum::extract::Path(template_id): axum::extract::Path<Uuid>,
) -> Result<Json<TemplateEnvironment>, AppError> {
    let template = state.template_manager.get_visible(&principal, template_id).await?;
    Ok(Json(template))
}
