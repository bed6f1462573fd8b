//! Authentication against the external control plane (spec.md §6
//! "Authentication"): a bearer token or `X-API-Key` header is validated by
//! POSTing `{api_key, action}` to `CONTROL_PLANE_URL` and reading back
//! `{valid, user_id, reason?}`. In dev mode (`ENVIRONMENT=development`) every
//! request is the fixed `dev-user` principal and no network call happens.

use std::time::Duration;

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use harness_core::Principal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    api_key: &'a str,
    action: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    user_id: Option<String>,
    #[allow(dead_code)]
    reason: Option<String>,
}

/// Talks to the external control plane that owns API key validation. Built
/// once at startup and shared — never constructed per-request (§9 "Re-
/// architect as an explicitly constructed connection pool owned by the
/// process root").
#[derive(Clone)]
pub struct ControlPlaneAuth {
    dev_mode: bool,
    base_url: String,
    client: reqwest::Client,
}

impl ControlPlaneAuth {
    pub fn dev_mode() -> Self {
        Self {
            dev_mode: true,
            base_url: String::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            dev_mode: false,
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("failed to build control-plane HTTP client"),
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Validates `api_key` for `action` (the route name, used by the
    /// control plane for coarse auditing). Returns the resolved principal.
    async fn validate(&self, api_key: &str, action: &str) -> Result<Principal, AppError> {
        if self.dev_mode {
            return Ok(Principal::dev());
        }

        let resp = self
            .client
            .post(format!("{}/validate", self.base_url.trim_end_matches('/')))
            .json(&ValidateRequest { api_key, action })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    harness_core::HarnessError::ServiceUnavailable(
                        "control plane timed out".into(),
                    )
                } else {
                    harness_core::HarnessError::ServiceUnavailable(format!(
                        "control plane unreachable: {e}"
                    ))
                }
            })?;

        match resp.status().as_u16() {
            200..=299 => {
                let body: ValidateResponse = resp.json().await.map_err(|e| {
                    harness_core::HarnessError::Internal(anyhow::anyhow!(
                        "malformed control-plane response: {e}"
                    ))
                })?;
                if !body.valid {
                    return Err(harness_core::HarnessError::Unauthorized(
                        "control plane rejected API key".into(),
                    )
                    .into());
                }
                let user_id = body
                    .user_id
                    .ok_or_else(|| {
                        harness_core::HarnessError::Internal(anyhow::anyhow!(
                            "control plane marked key valid but returned no user_id"
                        ))
                    })?;
                Ok(Principal::new(user_id))
            }
            401 => Err(harness_core::HarnessError::Unauthorized("invalid API key".into()).into()),
            429 => Err(harness_core::HarnessError::ServiceUnavailable(
                "control plane rate limited this request".into(),
            )
            .into()),
            status => Err(harness_core::HarnessError::ServiceUnavailable(format!(
                "control plane returned unexpected status {status}"
            ))
            .into()),
        }
    }
}

/// Extracts `Authorization: Bearer <key>` or `X-API-Key: <key>`, validates
/// it, and inserts the resolved [`Principal`] into request extensions.
pub async fn require_principal(mut req: Request, next: Next) -> Result<Response, Response> {
    let state = req
        .extensions()
        .get::<std::sync::Arc<AppState>>()
        .cloned()
        .expect("AppState extension missing — router must layer it before this middleware");

    if state.auth.is_dev_mode() {
        req.extensions_mut().insert(Principal::dev());
        return Ok(next.run(req).await);
    }

    let api_key = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| {
            req.headers()
                .get("X-API-Key")
                .and_then(|v| v.to_str().ok())
        })
        .map(str::to_string);

    let Some(api_key) = api_key else {
        return Err(AppError::from(harness_core::HarnessError::Unauthorized(
            "missing Authorization bearer token or X-API-Key header".into(),
        ))
        .into_response());
    };

    let action = req.uri().path().to_string();
    let principal = state
        .auth
        .validate(&api_key, &action)
        .await
        .map_err(IntoResponse::into_response)?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}
