//! Row-level change sets produced by the snapshot differ and by the
//! logical-replication decoder — the common currency both capture modes
//! hand to the assertion engine.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::types::{ChangeJournalRow, ChangeOp};

/// A single row-level change. `table` is carried on the entry itself (rather
/// than keyed separately) so a `ChangeSet` can be flattened into one ordered
/// list for the DSL engine without losing provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RowChange {
    pub table: String,
    pub operation: ChangeOp,
    pub primary_key: Json,
    pub before: Option<Json>,
    pub after: Option<Json>,
}

impl RowChange {
    pub fn insert(table: impl Into<String>, primary_key: Json, after: Json) -> Self {
        Self {
            table: table.into(),
            operation: ChangeOp::Insert,
            primary_key,
            before: None,
            after: Some(after),
        }
    }

    pub fn update(table: impl Into<String>, primary_key: Json, before: Json, after: Json) -> Self {
        Self {
            table: table.into(),
            operation: ChangeOp::Update,
            primary_key,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn delete(table: impl Into<String>, primary_key: Json, before: Json) -> Self {
        Self {
            table: table.into(),
            operation: ChangeOp::Delete,
            primary_key,
            before: Some(before),
            after: None,
        }
    }

    /// Column-level diff of an update; empty for inserts/deletes.
    pub fn changed_columns(&self) -> Vec<ColumnDiff> {
        let (Some(before), Some(after)) = (&self.before, &self.after) else {
            return Vec::new();
        };
        let (Json::Object(b), Json::Object(a)) = (before, after) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for (key, after_val) in a {
            let before_val = b.get(key).cloned().unwrap_or(Json::Null);
            if &before_val != after_val {
                out.push(ColumnDiff {
                    column: key.clone(),
                    before: before_val,
                    after: after_val.clone(),
                });
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDiff {
    pub column: String,
    pub before: Json,
    pub after: Json,
}

/// The full set of row changes observed during a run, in the order they were
/// recorded (snapshot diff: table order then insert/update/delete; journal:
/// WAL commit order).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<RowChange>,
}

impl ChangeSet {
    pub fn new(changes: Vec<RowChange>) -> Self {
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn for_table<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a RowChange> {
        self.changes.iter().filter(move |c| c.table == table)
    }

    pub fn inserts(&self) -> impl Iterator<Item = &RowChange> {
        self.changes.iter().filter(|c| c.operation == ChangeOp::Insert)
    }

    pub fn updates(&self) -> impl Iterator<Item = &RowChange> {
        self.changes.iter().filter(|c| c.operation == ChangeOp::Update)
    }

    pub fn deletes(&self) -> impl Iterator<Item = &RowChange> {
        self.changes.iter().filter(|c| c.operation == ChangeOp::Delete)
    }

    /// Assemble a [`ChangeSet`] from drained journal rows. Per `spec.md`
    /// §4.5 this specification requires verbatim emission: a key touched by
    /// insert-then-update-then-delete within one run appears as three
    /// independent entries, not a collapsed logical insert. Rows are
    /// expected pre-sorted by `(recorded_at, lsn)`, the journal's durability
    /// order (§5 Ordering guarantees).
    pub fn from_journal_verbatim(rows: Vec<ChangeJournalRow>) -> Self {
        let changes = rows
            .into_iter()
            .map(|row| RowChange {
                table: row.table_name,
                operation: row.operation,
                primary_key: row.primary_key,
                before: row.before,
                after: row.after,
            })
            .collect();
        Self { changes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn changed_columns_reports_only_differing_keys() {
        let change = RowChange::update(
            "orders",
            json!({"id": 1}),
            json!({"id": 1, "status": "pending", "total": 10}),
            json!({"id": 1, "status": "shipped", "total": 10}),
        );
        let diffs = change.changed_columns();
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].column, "status");
        assert_eq!(diffs[0].before, json!("pending"));
        assert_eq!(diffs[0].after, json!("shipped"));
    }

    #[test]
    fn insert_and_delete_have_no_changed_columns() {
        let insert = RowChange::insert("orders", json!({"id": 2}), json!({"id": 2}));
        assert!(insert.changed_columns().is_empty());
        let delete = RowChange::delete("orders", json!({"id": 2}), json!({"id": 2}));
        assert!(delete.changed_columns().is_empty());
    }

    #[test]
    fn change_set_filters_by_table_and_op() {
        let set = ChangeSet::new(vec![
            RowChange::insert("orders", json!({"id": 1}), json!({"id": 1})),
            RowChange::insert("customers", json!({"id": 1}), json!({"id": 1})),
            RowChange::delete("orders", json!({"id": 2}), json!({"id": 2})),
        ]);
        assert_eq!(set.for_table("orders").count(), 2);
        assert_eq!(set.inserts().count(), 2);
        assert_eq!(set.deletes().count(), 1);
    }
}
