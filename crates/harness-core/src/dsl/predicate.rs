//! The predicate vocabulary (`spec.md` §4.8): `eq`, `ne`, `in`, `not_in`,
//! `contains`, `not_contains`, `i_contains`, `starts_with`, `ends_with`,
//! `i_starts_with`, `i_ends_with`, `regex`, `gt`, `gte`, `lt`, `lte`,
//! `exists`, `has_any`, `has_all`. A predicate object may carry more than
//! one op; all present ops are AND-composed.

use chrono::DateTime;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as Json;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Predicate {
    pub eq: Option<Json>,
    pub ne: Option<Json>,
    pub r#in: Option<Vec<Json>>,
    pub not_in: Option<Vec<Json>>,
    pub contains: Option<Json>,
    pub not_contains: Option<Json>,
    pub i_contains: Option<Json>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
    pub i_starts_with: Option<String>,
    pub i_ends_with: Option<String>,
    pub regex: Option<String>,
    pub gt: Option<Json>,
    pub gte: Option<Json>,
    pub lt: Option<Json>,
    pub lte: Option<Json>,
    pub exists: Option<bool>,
    pub has_any: Option<Vec<Json>>,
    pub has_all: Option<Vec<Json>>,
}

impl Predicate {
    /// Shorthand: a bare scalar normalizes to `{eq: scalar}` (§4.7).
    pub fn eq_scalar(value: Json) -> Self {
        Self {
            eq: Some(value),
            ..Default::default()
        }
    }

    /// Evaluate every op present against `value`, AND-composed. A predicate
    /// with no ops set (the empty object) vacuously matches.
    pub fn matches(&self, value: Option<&Json>) -> bool {
        let missing = value.is_none() || matches!(value, Some(Json::Null));

        if let Some(want) = self.exists {
            if want == missing {
                return false;
            }
        }
        // Every remaining op treats a missing value as non-matching, except
        // `ne`/`not_in`/`not_contains`, which are true precisely because
        // there is nothing to equal/contain.
        if missing {
            return self.eq.is_none()
                && self.r#in.is_none()
                && self.contains.is_none()
                && self.i_contains.is_none()
                && self.starts_with.is_none()
                && self.ends_with.is_none()
                && self.i_starts_with.is_none()
                && self.i_ends_with.is_none()
                && self.regex.is_none()
                && self.gt.is_none()
                && self.gte.is_none()
                && self.lt.is_none()
                && self.lte.is_none()
                && self.has_any.is_none()
                && self.has_all.is_none();
        }
        let value = value.expect("checked above");

        if let Some(want) = &self.eq {
            if !values_equal(value, want) {
                return false;
            }
        }
        if let Some(want) = &self.ne {
            if values_equal(value, want) {
                return false;
            }
        }
        if let Some(set) = &self.r#in {
            if !set.iter().any(|v| values_equal(value, v)) {
                return false;
            }
        }
        if let Some(set) = &self.not_in {
            if set.iter().any(|v| values_equal(value, v)) {
                return false;
            }
        }
        if let Some(needle) = &self.contains {
            if !string_contains(value, needle, false) {
                return false;
            }
        }
        if let Some(needle) = &self.not_contains {
            if string_contains(value, needle, false) {
                return false;
            }
        }
        if let Some(needle) = &self.i_contains {
            if !string_contains(value, needle, true) {
                return false;
            }
        }
        if let Some(prefix) = &self.starts_with {
            let Some(s) = value.as_str() else {
                return false;
            };
            if !s.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(suffix) = &self.ends_with {
            let Some(s) = value.as_str() else {
                return false;
            };
            if !s.ends_with(suffix.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.i_starts_with {
            let Some(s) = value.as_str() else {
                return false;
            };
            if !s.to_lowercase().starts_with(&prefix.to_lowercase()) {
                return false;
            }
        }
        if let Some(suffix) = &self.i_ends_with {
            let Some(s) = value.as_str() else {
                return false;
            };
            if !s.to_lowercase().ends_with(&suffix.to_lowercase()) {
                return false;
            }
        }
        if let Some(pattern) = &self.regex {
            let Some(s) = value.as_str() else {
                return false;
            };
            let Ok(re) = Regex::new(pattern) else {
                return false;
            };
            if !re.is_match(s) {
                return false;
            }
        }
        if let Some(bound) = &self.gt {
            if !ordered_compare(value, bound).is_some_and(|o| o == std::cmp::Ordering::Greater) {
                return false;
            }
        }
        if let Some(bound) = &self.gte {
            if !ordered_compare(value, bound).is_some_and(|o| o != std::cmp::Ordering::Less) {
                return false;
            }
        }
        if let Some(bound) = &self.lt {
            if !ordered_compare(value, bound).is_some_and(|o| o == std::cmp::Ordering::Less) {
                return false;
            }
        }
        if let Some(bound) = &self.lte {
            if !ordered_compare(value, bound).is_some_and(|o| o != std::cmp::Ordering::Greater) {
                return false;
            }
        }
        if let Some(any) = &self.has_any {
            if !sequence_has_any(value, any) {
                return false;
            }
        }
        if let Some(all) = &self.has_all {
            if !sequence_has_all(value, all) {
                return false;
            }
        }
        true
    }
}

/// Temporal values normalize to ISO-8601 strings before comparison (§4.8);
/// everything else compares structurally.
fn values_equal(a: &Json, b: &Json) -> bool {
    match (normalize_temporal(a), normalize_temporal(b)) {
        (Json::String(a), Json::String(b)) => a == b,
        (a, b) => a == b,
    }
}

fn normalize_temporal(v: &Json) -> Json {
    if let Json::String(s) = v {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Json::String(dt.to_rfc3339());
        }
    }
    v.clone()
}

/// `contains`/`i_contains` auto-serialize JSON structures (objects, arrays)
/// to compact JSON before matching (§4.8) — unlike `starts_with`/`ends_with`/
/// `regex`, which require an actual string on both sides and fail instead of
/// stringifying numbers or booleans.
fn to_compare_string(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn string_contains(haystack: &Json, needle: &Json, case_insensitive: bool) -> bool {
    let haystack = to_compare_string(haystack);
    let needle = to_compare_string(needle);
    if case_insensitive {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    } else {
        haystack.contains(&needle)
    }
}

fn ordered_compare(value: &Json, bound: &Json) -> Option<std::cmp::Ordering> {
    match (value, bound) {
        (Json::Number(a), Json::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Json::String(a), Json::String(b)) => {
            match (
                DateTime::parse_from_rfc3339(a).ok(),
                DateTime::parse_from_rfc3339(b).ok(),
            ) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        _ => None,
    }
}

fn sequence_has_any(value: &Json, wanted: &[Json]) -> bool {
    let Json::Array(items) = value else {
        return false;
    };
    wanted.iter().any(|w| items.iter().any(|i| values_equal(i, w)))
}

fn sequence_has_all(value: &Json, wanted: &[Json]) -> bool {
    let Json::Array(items) = value else {
        return false;
    };
    wanted.iter().all(|w| items.iter().any(|i| values_equal(i, w)))
}
