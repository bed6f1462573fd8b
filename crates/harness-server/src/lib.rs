//! harness-server — HTTP control plane for the agent evaluation harness.
//!
//! Routes (spec.md §6):
//!   GET  /health      — liveness (no auth)
//!   POST /initEnv     — provision a runtime environment
//!   POST /startRun    — capture the before-state of a run
//!   POST /endRun      — materialize and score the diff
//!   POST /evaluateRun — re-read a completed run's stored score/diff
//!   POST /diffRun     — fetch a materialized diff by run or by environment
//!   POST /deleteEnv   — tear down a runtime environment
//!   GET  /templates   — list templates visible to the caller
//!   POST /tests, GET /tests, POST /testSuites, GET /testSuites — test catalog

pub mod auth;
pub mod error;
pub mod handlers;
pub mod maintenance;
pub mod router;
pub mod state;
