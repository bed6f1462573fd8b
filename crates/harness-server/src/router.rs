//! Router construction for the evaluation harness's control plane.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Extension, Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::require_principal;
use crate::handlers;
use crate::state::AppState;

/// Build the full axum router. Every route is mounted under `/api/platform`
/// (spec.md §6). `/health` is unauthenticated; everything else requires a
/// valid bearer token / API key (or dev-mode bypass).
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/initEnv", post(handlers::init_env::init_env))
        .route("/deleteEnv", post(handlers::delete_env::delete_env))
        .route("/startRun", post(handlers::start_run::start_run))
        .route("/endRun", post(handlers::end_run::end_run))
        .route("/evaluateRun", post(handlers::evaluate_run::evaluate_run))
        .route("/diffRun", post(handlers::diff_run::diff_run))
        .route("/templates", get(handlers::templates::list_templates))
        .route("/templates/:id", get(handlers::templates::get_template))
        .route(
            "/tests",
            post(handlers::tests::create_test).get(handlers::tests::list_tests),
        )
        .route("/tests/:id", get(handlers::tests::get_test))
        .route(
            "/testSuites",
            post(handlers::tests::create_test_suite).get(handlers::tests::list_test_suites),
        )
        .route(
            "/testSuites/:id/members",
            post(handlers::tests::add_suite_member).get(handlers::tests::list_suite_members),
        )
        .layer(axum_mw::from_fn(require_principal))
        .layer(Extension(state.clone()));

    let public = Router::new()
        .route("/health", get(handlers::health::health))
        .layer(Extension(state));

    Router::new()
        .nest("/api/platform", public.merge(protected))
        .layer(TraceLayer::new_for_http())
}
