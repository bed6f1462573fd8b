//! Evaluates a [`CompiledSpec`] against a [`ChangeSet`], producing
//! pass/fail, a score, and a flat failure list (`spec.md` §4.8). Pure:
//! `evaluate` depends only on its arguments — no clock, no I/O, no
//! hidden state.

use serde_json::Value as Json;

use crate::diff::{ChangeSet, RowChange};

use super::raw::{ChangeType, CompiledAssertion, CompiledSpec};

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Score {
    pub passed: usize,
    pub total: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssertionResult {
    pub passed: bool,
    pub failures: Vec<String>,
    pub score: Score,
}

/// Evaluate every assertion in `spec` against `diff`. An empty assertion
/// list always passes with `total=0, percent=100` (§8 boundary behaviors).
pub fn evaluate(spec: &CompiledSpec, diff: &ChangeSet) -> AssertionResult {
    let total = spec.assertions.len();
    let mut failures = Vec::new();

    for (idx, assertion) in spec.assertions.iter().enumerate() {
        if let Err(reason) = evaluate_one(spec, idx, assertion, diff) {
            failures.push(reason);
        }
    }

    let passed = total - failures.len();
    let percent = if total == 0 {
        100.0
    } else {
        (passed as f64 / total as f64) * 100.0
    };

    AssertionResult {
        passed: failures.is_empty(),
        failures,
        score: Score {
            passed,
            total,
            percent,
        },
    }
}

fn evaluate_one(
    spec: &CompiledSpec,
    idx: usize,
    assertion: &CompiledAssertion,
    diff: &ChangeSet,
) -> Result<(), String> {
    match assertion.diff_type {
        ChangeType::Added => evaluate_count(idx, assertion, diff.inserts(), |c| &c.after),
        ChangeType::Removed => evaluate_count(idx, assertion, diff.deletes(), |c| &c.before),
        ChangeType::Changed => evaluate_changed(spec, idx, assertion, diff),
    }
}

fn row_matches_where(r#where: &std::collections::HashMap<String, super::Predicate>, row: &Json) -> bool {
    r#where
        .iter()
        .all(|(path, predicate)| predicate.matches(lookup_dotted(row, path)))
}

/// Resolve a dotted path (`a.b.c`) against a JSON object image.
fn lookup_dotted<'a>(value: &'a Json, path: &str) -> Option<&'a Json> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn evaluate_count<'a>(
    idx: usize,
    assertion: &CompiledAssertion,
    rows: impl Iterator<Item = &'a RowChange>,
    image: impl Fn(&'a RowChange) -> &'a Option<Json>,
) -> Result<(), String> {
    let matched = rows
        .filter(|c| c.table == assertion.entity)
        .filter(|c| {
            image(c)
                .as_ref()
                .is_some_and(|img| row_matches_where(&assertion.r#where, img))
        })
        .count() as u64;

    if assertion.expected_count.matches(matched) {
        Ok(())
    } else {
        Err(count_failure_message(idx, assertion, matched))
    }
}

fn evaluate_changed(
    spec: &CompiledSpec,
    idx: usize,
    assertion: &CompiledAssertion,
    diff: &ChangeSet,
) -> Result<(), String> {
    let global_ignore = &spec.ignore_fields_global;
    let entity_ignore = spec
        .ignore_fields_entity
        .get(&assertion.entity)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut matched_count = 0u64;

    for row in diff.updates().filter(|c| c.table == assertion.entity) {
        let before_matches = row
            .before
            .as_ref()
            .is_some_and(|img| row_matches_where(&assertion.r#where, img));
        let after_matches = row
            .after
            .as_ref()
            .is_some_and(|img| row_matches_where(&assertion.r#where, img));
        if !assertion.r#where.is_empty() && !before_matches && !after_matches {
            continue;
        }

        let changed: Vec<String> = row
            .changed_columns()
            .into_iter()
            .map(|c| c.column)
            .filter(|col| {
                !global_ignore.contains(col)
                    && !entity_ignore.contains(col)
                    && !assertion.ignore_fields.contains(col)
            })
            .collect();

        let expected_keys: Vec<&String> = assertion.expected_changes.keys().collect();

        if spec.strict {
            let extra: Vec<&String> = changed
                .iter()
                .filter(|c| !expected_keys.contains(c))
                .collect();
            if !extra.is_empty() {
                let mut sorted_changed = changed.clone();
                sorted_changed.sort();
                let mut sorted_expected: Vec<String> =
                    expected_keys.iter().map(|s| s.to_string()).collect();
                sorted_expected.sort();
                return Err(format!(
                    "assertion#{} {} changed fields [{}] not subset of expected [{}]",
                    idx + 1,
                    assertion.entity,
                    sorted_changed.join(","),
                    sorted_expected.join(",")
                ));
            }
        }

        let all_keys_present = expected_keys.iter().all(|k| changed.contains(k));
        if !all_keys_present {
            continue;
        }

        let predicates_hold = assertion.expected_changes.iter().all(|(col, expected)| {
            let before_val = row.before.as_ref().and_then(|img| lookup_dotted(img, col));
            let after_val = row.after.as_ref().and_then(|img| lookup_dotted(img, col));
            expected.from.as_ref().is_none_or(|p| p.matches(before_val))
                && expected.to.as_ref().is_none_or(|p| p.matches(after_val))
        });
        if !predicates_hold {
            continue;
        }

        matched_count += 1;
    }

    if assertion.expected_count.matches(matched_count) {
        Ok(())
    } else {
        Err(count_failure_message(idx, assertion, matched_count))
    }
}

/// Builds the `expected_count` failure message. An author who never wrote
/// `expected_count` gets the plain "at least 1 match" phrasing; one who
/// specified a count (or range) sees exactly what they wrote (§4.8).
fn count_failure_message(idx: usize, assertion: &CompiledAssertion, actual: u64) -> String {
    if assertion.expected_count.defaulted {
        format!(
            "assertion#{} {} expected at least 1 match but got {actual}",
            idx + 1,
            assertion.entity
        )
    } else {
        format!(
            "assertion#{} {} expected count {} but got {actual}",
            idx + 1,
            assertion.entity,
            describe_count(assertion.expected_count)
        )
    }
}

fn describe_count(count: super::raw::CountSpec) -> String {
    match count.max {
        Some(max) if max == count.min => format!("{max}"),
        Some(max) => format!("[{}..{}]", count.min, max),
        None => format!(">={}", count.min),
    }
}
