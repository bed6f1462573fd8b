//! Wire and canonical shapes for the assertion DSL. `Raw*` types accept the
//! shorthand a test author writes; `Compiled*` types are what
//! [`super::compiler::compile`] produces and [`super::engine::evaluate`]
//! consumes. Normalization happens entirely in the compiler — these types
//! just carry data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::predicate::Predicate;

/// `diff_type` on an assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Removed,
    Changed,
}

// ── Raw (as submitted by a test author) ───────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RawSpec {
    #[serde(default = "default_true")]
    pub strict: bool,
    #[serde(default)]
    pub ignore_fields: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub assertions: Vec<RawAssertion>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAssertion {
    pub diff_type: ChangeType,
    pub entity: String,
    #[serde(default)]
    pub r#where: HashMap<String, Json>,
    #[serde(default)]
    pub ignore_fields: Vec<String>,
    #[serde(default)]
    pub expected_changes: HashMap<String, Json>,
    pub expected_count: Option<Json>,
}

// ── Compiled (canonical, post-normalization) ──────────────────

#[derive(Debug, Clone)]
pub struct CompiledSpec {
    pub strict: bool,
    pub ignore_fields_global: Vec<String>,
    pub ignore_fields_entity: HashMap<String, Vec<String>>,
    pub assertions: Vec<CompiledAssertion>,
}

#[derive(Debug, Clone)]
pub struct CompiledAssertion {
    pub diff_type: ChangeType,
    pub entity: String,
    pub r#where: HashMap<String, Predicate>,
    pub ignore_fields: Vec<String>,
    pub expected_changes: HashMap<String, ExpectedChange>,
    pub expected_count: CountSpec,
}

/// Normalized form of `expected_changes.<col>`: `{from, to}`, either side
/// optional (a `to`-only predicate is most common — "this field changed to
/// X", without constraining what it changed from).
#[derive(Debug, Clone, Default)]
pub struct ExpectedChange {
    pub from: Option<Predicate>,
    pub to: Option<Predicate>,
}

/// Normalized `expected_count`: a missing spec means "at least 1" (§4.8).
/// `defaulted` records whether the author actually wrote an `expected_count`
/// — the failure message reads differently ("expected at least 1 match" vs
/// "expected count N") depending on it.
#[derive(Debug, Clone, Copy)]
pub struct CountSpec {
    pub min: u64,
    pub max: Option<u64>,
    pub defaulted: bool,
}

impl CountSpec {
    pub fn at_least_one() -> Self {
        Self {
            min: 1,
            max: None,
            defaulted: true,
        }
    }

    pub fn exactly(n: u64) -> Self {
        Self {
            min: n,
            max: Some(n),
            defaulted: false,
        }
    }

    pub fn range(min: u64, max: Option<u64>) -> Self {
        Self {
            min,
            max,
            defaulted: false,
        }
    }

    pub fn matches(&self, count: u64) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

/// One table's contribution to a compiled diff — re-exported for callers
/// that want to build a [`crate::diff::ChangeSet`] incrementally per table
/// without pulling in the full diff module.
pub type CompiledChange = crate::diff::RowChange;
