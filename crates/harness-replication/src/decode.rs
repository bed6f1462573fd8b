//! wal2json change decoding (spec.md §4.5, grounded on
//! `original_source/backend/src/platform/evaluationEngine/replication.py`).
//! `pg_logical_slot_get_changes` with the `wal2json` plugin returns one row
//! per transaction; each row's `data` column is a JSON document shaped
//! `{"change": [{table, schema, kind, oldkeys, columnnames, columnvalues}]}`.
//! A single transaction can touch several schemas, so decoding stays
//! schema-tagged until the worker resolves each change against the active
//! run registry.

use harness_core::types::ChangeOp;
use serde_json::Value as Json;

/// The `wal2json` plugin options this worker always passes, merged with any
/// operator-supplied overrides (`LOGICAL_REPLICATION_PLUGIN_OPTIONS`).
pub const DEFAULT_PLUGIN_OPTIONS: &[(&str, &str)] = &[
    ("include-lsn", "true"),
    ("include-timestamp", "true"),
    ("include-schemas", "true"),
    ("include-types", "true"),
];

/// One decoded change, still tagged with its source schema — not yet a
/// [`harness_core::types::ChangeJournalRow`] because that requires the
/// `environment_id`/`run_id` the worker resolves from its schema->run map.
#[derive(Debug, Clone)]
pub struct DecodedChange {
    pub schema: String,
    pub table: String,
    pub operation: ChangeOp,
    pub primary_key: Json,
    pub before: Option<Json>,
    pub after: Option<Json>,
}

/// Decode one `pg_logical_slot_get_changes` row's `data` JSON blob into zero
/// or more decoded changes. Unrecognized `kind` values are logged and
/// skipped rather than erroring the whole batch.
pub fn decode_wal2json(data: &str) -> anyhow::Result<Vec<DecodedChange>> {
    let parsed: Json = serde_json::from_str(data)?;
    let changes = parsed
        .get("change")
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    let mut out = Vec::with_capacity(changes.len());
    for change in changes {
        if let Some(decoded) = decode_one(&change)? {
            out.push(decoded);
        }
    }
    Ok(out)
}

fn decode_one(change: &Json) -> anyhow::Result<Option<DecodedChange>> {
    let kind = change.get("kind").and_then(|k| k.as_str()).unwrap_or("");
    let schema = change
        .get("schema")
        .and_then(|s| s.as_str())
        .ok_or_else(|| anyhow::anyhow!("wal2json change missing schema"))?
        .to_string();
    let table = change
        .get("table")
        .and_then(|t| t.as_str())
        .ok_or_else(|| anyhow::anyhow!("wal2json change missing table"))?
        .to_string();

    let operation = match kind {
        "insert" => ChangeOp::Insert,
        "update" => ChangeOp::Update,
        "delete" => ChangeOp::Delete,
        other => {
            tracing::warn!(kind = other, "unrecognized wal2json change kind, skipping");
            return Ok(None);
        }
    };

    let before = zip_oldkeys(change.get("oldkeys"));
    let after = match operation {
        ChangeOp::Delete => None,
        _ => Some(zip_columns(
            change.get("columnnames"),
            change.get("columnvalues"),
        )),
    };

    let primary_key = match operation {
        ChangeOp::Insert => after.clone().unwrap_or(Json::Null),
        _ => before.clone().unwrap_or(Json::Null),
    };

    Ok(Some(DecodedChange {
        schema,
        table,
        operation,
        primary_key,
        before,
        after,
    }))
}

fn zip_oldkeys(oldkeys: Option<&Json>) -> Option<Json> {
    let obj = oldkeys?;
    zip_columns(obj.get("keynames"), obj.get("keyvalues"))
}

fn zip_columns(names: Option<&Json>, values: Option<&Json>) -> Option<Json> {
    let names = names?.as_array()?;
    let values = values?.as_array()?;
    let mut map = serde_json::Map::new();
    for (name, value) in names.iter().zip(values.iter()) {
        if let Some(name) = name.as_str() {
            map.insert(name.to_string(), value.clone());
        }
    }
    Some(Json::Object(map))
}
