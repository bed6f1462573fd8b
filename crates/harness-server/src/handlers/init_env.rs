//! `POST /initEnv` (spec.md §6) — resolves a template reference, provisions
//! a runtime environment (warm-pool claim or on-demand clone), and returns
//! enough for the caller to address it through the service facades mounted
//! at `/api/env/{env_id}/services/{service}/…`.

use std::sync::Arc;

use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use harness_core::{HarnessError, InitEnvRequest, Principal, TemplateRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitEnvBody {
    pub template_id: Option<Uuid>,
    pub template_service: Option<String>,
    pub template_name: Option<String>,
    pub template_schema: Option<String>,
    pub test_id: Option<Uuid>,
    pub ttl_seconds: Option<i64>,
    #[serde(default)]
    pub permanent: bool,
    pub impersonate_user_id: Option<String>,
    pub impersonate_email: Option<String>,
}

impl InitEnvBody {
    /// Priority order from §4.2: explicit template id, then test id, then
    /// service+name, then a raw location string.
    fn into_template_ref(self) -> Result<TemplateRef, AppError> {
        if let Some(id) = self.template_id {
            return Ok(TemplateRef::Id(id));
        }
        if let Some(test_id) = self.test_id {
            return Ok(TemplateRef::TestId(test_id));
        }
        if let (Some(service), Some(name)) = (self.template_service, self.template_name) {
            return Ok(TemplateRef::ServiceName { service, name });
        }
        if let Some(location) = self.template_schema {
            return Ok(TemplateRef::RawLocation(location));
        }
        Err(HarnessError::InvalidInput(
            "initEnv requires one of templateId, testId, templateService+templateName, or templateSchema"
                .into(),
        )
        .into())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitEnvResponse {
    pub environment_id: Uuid,
    pub template_schema: String,
    pub schema_name: String,
    pub service: String,
    pub environment_url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

pub async fn init_env(
    Extension(state): Extension<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<InitEnvBody>,
) -> Result<Json<InitEnvResponse>, AppError> {
    let ttl_seconds = body.ttl_seconds;
    let permanent = body.permanent;
    let impersonate_user_id = body.impersonate_user_id.clone();
    let impersonate_email = body.impersonate_email.clone();
    let template_ref = body.into_template_ref()?;

    let (env, resolved) = state
        .environments
        .init_env(
            &principal,
            InitEnvRequest {
                template_ref,
                ttl_seconds,
                permanent,
                impersonate_user_id,
                impersonate_email,
            },
        )
        .await?;

    Ok(Json(InitEnvResponse {
        environment_id: env.id,
        template_schema: resolved.location,
        schema_name: env.namespace_name,
        service: resolved.service,
        environment_url: format!("/api/env/{}/services/{}", env.id, resolved.service),
        expires_at: env.expires_at,
    }))
}
