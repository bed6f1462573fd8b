//! Validates a raw assertion spec against [`super::schema::SCHEMA`] and
//! normalizes shorthand into the canonical [`CompiledSpec`] (`spec.md`
//! §4.7). Pure function: `compile(compile_raw(spec)) == compile(spec)` for
//! any valid spec — re-compiling an already-canonical spec is a no-op,
//! since every normalization rule is idempotent on its own output shape.

use std::collections::HashMap;
use std::sync::OnceLock;

use jsonschema::JSONSchema;
use serde_json::Value as Json;
use thiserror::Error;

use super::predicate::Predicate;
use super::raw::{CompiledAssertion, CompiledSpec, CountSpec, ExpectedChange, RawSpec};
use super::schema::SCHEMA;

#[derive(Debug, Error)]
pub enum DslError {
    #[error("invalid DSL at {path}: {message}")]
    Invalid { path: String, message: String },
}

fn compiled_schema() -> &'static JSONSchema {
    static SCHEMA_CELL: OnceLock<JSONSchema> = OnceLock::new();
    SCHEMA_CELL.get_or_init(|| {
        let schema: Json = serde_json::from_str(SCHEMA).expect("SCHEMA is valid JSON");
        JSONSchema::compile(&schema).expect("SCHEMA is a valid JSON Schema")
    })
}

/// Every predicate op name. An object `where`/`expected_changes` value is
/// treated as a predicate iff at least one of its keys is one of these;
/// otherwise the whole object is an `eq` target (e.g. asserting a JSONB
/// column equals a literal object).
const PREDICATE_OPS: &[&str] = &[
    "eq",
    "ne",
    "in",
    "not_in",
    "contains",
    "not_contains",
    "i_contains",
    "starts_with",
    "ends_with",
    "i_starts_with",
    "i_ends_with",
    "regex",
    "gt",
    "gte",
    "lt",
    "lte",
    "exists",
    "has_any",
    "has_all",
];

fn looks_like_predicate(value: &Json) -> bool {
    matches!(value, Json::Object(map) if map.keys().any(|k| PREDICATE_OPS.contains(&k.as_str())))
}

fn normalize_predicate(path: String, value: Json) -> Result<Predicate, DslError> {
    if looks_like_predicate(&value) {
        serde_json::from_value(value).map_err(|e| DslError::Invalid {
            path,
            message: e.to_string(),
        })
    } else {
        Ok(Predicate::eq_scalar(value))
    }
}

fn normalize_expected_change(path: String, value: Json) -> Result<ExpectedChange, DslError> {
    match value {
        Json::Object(map) if map.contains_key("from") || map.contains_key("to") => {
            let from = map
                .get("from")
                .cloned()
                .map(|v| normalize_predicate(format!("{path}.from"), v))
                .transpose()?;
            let to = map
                .get("to")
                .cloned()
                .map(|v| normalize_predicate(format!("{path}.to"), v))
                .transpose()?;
            Ok(ExpectedChange { from, to })
        }
        // Shorthand: `expected_changes: {field: scalar}` => `{field: {to: {eq: scalar}}}`.
        scalar => Ok(ExpectedChange {
            from: None,
            to: Some(Predicate::eq_scalar(scalar)),
        }),
    }
}

fn normalize_count(value: Option<Json>) -> Result<CountSpec, DslError> {
    match value {
        None => Ok(CountSpec::at_least_one()),
        Some(Json::Number(n)) => {
            let n = n.as_u64().ok_or_else(|| DslError::Invalid {
                path: "expected_count".into(),
                message: "must be a non-negative integer".into(),
            })?;
            Ok(CountSpec::exactly(n))
        }
        Some(Json::Object(map)) => {
            let min = map.get("min").and_then(Json::as_u64).unwrap_or(0);
            let max = map.get("max").and_then(Json::as_u64);
            Ok(CountSpec::range(min, max))
        }
        Some(other) => Err(DslError::Invalid {
            path: "expected_count".into(),
            message: format!("expected integer or {{min,max}}, got {other}"),
        }),
    }
}

/// Validate `raw` against the published schema, then normalize it into a
/// [`CompiledSpec`]. Fails with [`DslError::Invalid`] naming the offending
/// path on schema violation or unrecognized shorthand.
pub fn compile(raw: &Json) -> Result<CompiledSpec, DslError> {
    let schema = compiled_schema();
    if let Err(mut errors) = schema.validate(raw) {
        let first = errors.next().expect("validate() Err implies >=1 error");
        return Err(DslError::Invalid {
            path: first.instance_path.to_string(),
            message: first.to_string(),
        });
    }

    let raw_spec: RawSpec = serde_json::from_value(raw.clone()).map_err(|e| DslError::Invalid {
        path: String::new(),
        message: e.to_string(),
    })?;

    let mut ignore_fields_global = Vec::new();
    let mut ignore_fields_entity = HashMap::new();
    for (key, cols) in raw_spec.ignore_fields {
        if key == "global" {
            ignore_fields_global = cols;
        } else {
            ignore_fields_entity.insert(key, cols);
        }
    }

    let mut assertions = Vec::with_capacity(raw_spec.assertions.len());
    for (idx, a) in raw_spec.assertions.into_iter().enumerate() {
        let mut r#where = HashMap::with_capacity(a.r#where.len());
        for (field, value) in a.r#where {
            let predicate =
                normalize_predicate(format!("assertions[{idx}].where.{field}"), value)?;
            r#where.insert(field, predicate);
        }

        let mut expected_changes = HashMap::with_capacity(a.expected_changes.len());
        for (field, value) in a.expected_changes {
            let change = normalize_expected_change(
                format!("assertions[{idx}].expected_changes.{field}"),
                value,
            )?;
            expected_changes.insert(field, change);
        }

        assertions.push(CompiledAssertion {
            diff_type: a.diff_type,
            entity: a.entity,
            r#where,
            ignore_fields: a.ignore_fields,
            expected_changes,
            expected_count: normalize_count(a.expected_count)?,
        });
    }

    Ok(CompiledSpec {
        strict: raw_spec.strict,
        ignore_fields_global,
        ignore_fields_entity,
        assertions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_scalar_where_expands_to_eq() {
        let spec = compile(&json!({
            "assertions": [{
                "diff_type": "added",
                "entity": "messages",
                "where": {"message_text": "Hello team!"},
                "expected_count": 1
            }]
        }))
        .unwrap();
        let a = &spec.assertions[0];
        assert_eq!(a.r#where["message_text"].eq, Some(json!("Hello team!")));
        assert!(spec.strict);
    }

    #[test]
    fn expected_changes_shorthand_expands_to_to_eq() {
        let spec = compile(&json!({
            "assertions": [{
                "diff_type": "changed",
                "entity": "box_folders",
                "expected_changes": {"name": "Renamed"}
            }]
        }))
        .unwrap();
        let change = &spec.assertions[0].expected_changes["name"];
        assert!(change.from.is_none());
        assert_eq!(change.to.as_ref().unwrap().eq, Some(json!("Renamed")));
    }

    #[test]
    fn missing_expected_count_is_at_least_one() {
        let spec = compile(&json!({
            "assertions": [{"diff_type": "added", "entity": "issues"}]
        }))
        .unwrap();
        let count = spec.assertions[0].expected_count;
        assert_eq!(count.min, 1);
        assert_eq!(count.max, None);
    }

    #[test]
    fn count_range_normalizes_min_max() {
        let spec = compile(&json!({
            "assertions": [{
                "diff_type": "added",
                "entity": "issues",
                "expected_count": {"min": 2, "max": 5}
            }]
        }))
        .unwrap();
        assert!(spec.assertions[0].expected_count.matches(3));
        assert!(!spec.assertions[0].expected_count.matches(6));
    }

    #[test]
    fn missing_required_field_fails_with_path() {
        let err = compile(&json!({"assertions": [{"diff_type": "added"}]})).unwrap_err();
        match err {
            DslError::Invalid { message, .. } => assert!(message.contains("entity")),
        }
    }

    #[test]
    fn empty_spec_compiles_to_zero_assertions() {
        let spec = compile(&json!({"assertions": []})).unwrap();
        assert!(spec.assertions.is_empty());
    }

    #[test]
    fn recompiling_a_compiled_shape_is_idempotent() {
        let canonical = json!({
            "strict": true,
            "assertions": [{
                "diff_type": "changed",
                "entity": "box_folders",
                "where": {"id": {"eq": 1}},
                "expected_changes": {"name": {"to": {"eq": "Renamed"}}},
                "expected_count": {"min": 1}
            }]
        });
        let once = compile(&canonical).unwrap();
        let twice = compile(&canonical).unwrap();
        assert_eq!(once.assertions.len(), twice.assertions.len());
        assert_eq!(
            once.assertions[0].expected_changes["name"].to.as_ref().unwrap().eq,
            twice.assertions[0].expected_changes["name"].to.as_ref().unwrap().eq
        );
    }
}
