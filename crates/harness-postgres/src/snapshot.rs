//! `SnapshotStore` — point-in-time table copies and the PK-equi-join differ
//! built on top of them (spec.md §4.4). Every table in a namespace gets a
//! sibling `<table>_snapshot_<suffix>` table; `diff` compares two such
//! siblings (or a snapshot against the live table) one table at a time.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use harness_core::diff::{ChangeSet, RowChange};
use harness_core::error::HarnessError;
use harness_core::ports::{NamespaceHandler, Result, SnapshotStore};
use harness_core::types::SnapshotMetadata;
use serde_json::Value as Json;
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::namespace::PgNamespaceHandler;
use crate::sqlx_types::quote_ident;

pub struct PgSnapshotStore {
    pool: PgPool,
    namespaces: PgNamespaceHandler,
}

impl PgSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        let namespaces = PgNamespaceHandler::new(pool.clone());
        Self { pool, namespaces }
    }

    fn snapshot_table_name(table: &str, suffix: &str) -> String {
        format!("{table}_snapshot_{suffix}")
    }

    /// Primary key columns for a table, in ordinal order. `Ok(None)` means
    /// the table has no primary key — callers must skip it (§4.4 Open
    /// Question: non-PK tables are not diffable row-by-row and are reported,
    /// not silently ignored).
    async fn primary_key_columns(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> Result<Option<Vec<String>>> {
        let rows = sqlx::query(
            r#"
            SELECT kcu.column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
               AND tc.table_schema = kcu.table_schema
            WHERE tc.constraint_type = 'PRIMARY KEY'
              AND tc.table_schema = $1
              AND tc.table_name = $2
            ORDER BY kcu.ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.into_iter().map(|r| r.get("column_name")).collect()))
        }
    }

    /// All column names for a table, in ordinal order.
    async fn all_columns(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(rows.into_iter().map(|r| r.get("column_name")).collect())
    }

    /// Column names whose Postgres type is `bytea` — the harness is not a
    /// binary differ, so these get sanitized to a placeholder (§4.4).
    async fn binary_columns(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 AND data_type = 'bytea'",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(rows.into_iter().map(|r| r.get("column_name")).collect())
    }

    /// Persists a captured fingerprint so a later `diff` call can read it
    /// back instead of re-fetching rows (§4.4 "Table-skip optimization").
    async fn upsert_metadata(&self, conn: &mut PgConnection, meta: &SnapshotMetadata) -> Result<()> {
        sqlx::query(
            "INSERT INTO snapshot_metadata \
             (environment_id, schema_name, snapshot_suffix, table_name, row_count, checksum, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (environment_id, schema_name, snapshot_suffix, table_name) \
             DO UPDATE SET row_count = EXCLUDED.row_count, checksum = EXCLUDED.checksum, \
                           created_at = EXCLUDED.created_at",
        )
        .bind(meta.environment_id)
        .bind(&meta.schema_name)
        .bind(&meta.snapshot_suffix)
        .bind(&meta.table_name)
        .bind(meta.row_count)
        .bind(&meta.checksum)
        .bind(meta.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Looks up a previously stored fingerprint for one (environment,
    /// namespace, suffix, table). `None` if no snapshot was captured for it
    /// (the differ falls through to a full comparison in that case, per
    /// §4.4: "If fingerprints are missing for either side, fall through").
    async fn load_metadata(
        &self,
        environment_id: Uuid,
        namespace: &str,
        suffix: &str,
        table: &str,
    ) -> Result<Option<(i64, String)>> {
        let row = sqlx::query(
            "SELECT row_count, checksum FROM snapshot_metadata \
             WHERE environment_id = $1 AND schema_name = $2 AND snapshot_suffix = $3 AND table_name = $4",
        )
        .bind(environment_id)
        .bind(namespace)
        .bind(suffix)
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(row.map(|r| (r.get("row_count"), r.get("checksum"))))
    }

    /// Fetch every row of `schema.table` as a `(pk_json, row_json)` pair,
    /// ordered by PK (or by every column, NULL-aware, when there is no PK —
    /// the deterministic fallback ordering fingerprinting also relies on).
    /// Replaces the value of every column named in `binary_columns` with
    /// [`BINARY_PLACEHOLDER`] (§4.4 Sanitization).
    async fn fetch_rows_sanitized(
        &self,
        conn: &mut PgConnection,
        schema: &str,
        table: &str,
        pk_columns: &Option<Vec<String>>,
        binary_columns: &[String],
    ) -> Result<Vec<(Json, Json)>> {
        let schema_q = quote_ident(schema)?;
        let table_q = quote_ident(table)?;
        let order_by = match pk_columns {
            Some(cols) if !cols.is_empty() => cols
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?
                .join(", "),
            _ => {
                let all = self.all_columns(&mut *conn, schema, table).await?;
                all.iter()
                    .map(|c| quote_ident(c).map(|q| format!("{q} NULLS FIRST")))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ")
            }
        };
        let sql = format!("SELECT row_to_json(t) AS row FROM {schema_q}.{table_q} t ORDER BY {order_by}");
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut json: Json = row.get("row");
            sanitize_binary_columns(&mut json, binary_columns);
            let pk = match pk_columns {
                Some(cols) => {
                    let mut map = serde_json::Map::new();
                    if let Json::Object(obj) = &json {
                        for col in cols {
                            map.insert(col.clone(), obj.get(col).cloned().unwrap_or(Json::Null));
                        }
                    }
                    Json::Object(map)
                }
                None => json.clone(),
            };
            out.push((pk, json));
        }
        Ok(out)
    }
}

/// Placeholder substituted for `bytea` column values in emitted change sets
/// — the harness is not a binary differ (§4.4).
const BINARY_PLACEHOLDER: &str = "<binary>";

fn sanitize_binary_columns(row: &mut Json, binary_columns: &[String]) {
    if binary_columns.is_empty() {
        return;
    }
    if let Json::Object(obj) = row {
        for col in binary_columns {
            if let Some(v) = obj.get_mut(col) {
                if !v.is_null() {
                    *v = Json::String(BINARY_PLACEHOLDER.to_string());
                }
            }
        }
    }
}

/// SHA-256 of the concatenation of per-row SHA-256 hashes, in the same
/// deterministic order `fetch_rows` reads them in — PK order if available,
/// otherwise NULL-aware all-column order (§4.4). Order-sensitive on purpose:
/// XOR-combining per-row digests would let two rows swap differing bytes and
/// still collide, silently hiding a genuine change from the table-skip
/// optimization.
fn fingerprint(rows: &[(Json, Json)]) -> String {
    let mut concatenated = Vec::with_capacity(rows.len() * 32);
    for (_, row) in rows {
        let bytes = serde_json::to_vec(row).unwrap_or_default();
        concatenated.extend_from_slice(&Sha256::digest(&bytes));
    }
    hex::encode(Sha256::digest(&concatenated))
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn capture(
        &self,
        environment_id: Uuid,
        namespace: &str,
        suffix: &str,
    ) -> Result<Vec<SnapshotMetadata>> {
        let tables = self.namespaces.list_tables(namespace).await?;
        let schema_q = quote_ident(namespace)?;
        let mut metadata = Vec::with_capacity(tables.len());

        // One transaction for the whole capture: every table's
        // `CREATE TABLE ... AS SELECT` sees the same point-in-time state of
        // the namespace, and a failure partway through leaves no partial
        // snapshot tables behind (§4.4 "Taken atomically across all tables").
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        for table in &tables {
            let table_q = quote_ident(table)?;
            let snapshot_table = Self::snapshot_table_name(table, suffix);
            let snapshot_q = quote_ident(&snapshot_table)?;

            sqlx::query(&format!(
                "CREATE TABLE {schema_q}.{snapshot_q} AS SELECT * FROM {schema_q}.{table_q}"
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

            let pk_columns = self.primary_key_columns(&mut tx, namespace, table).await?;
            let binary_columns = self.binary_columns(&mut tx, namespace, table).await?;
            let rows = self
                .fetch_rows_sanitized(&mut tx, namespace, &snapshot_table, &pk_columns, &binary_columns)
                .await?;
            let checksum = fingerprint(&rows);

            let meta = SnapshotMetadata {
                environment_id,
                schema_name: namespace.to_string(),
                snapshot_suffix: suffix.to_string(),
                table_name: table.clone(),
                row_count: rows.len() as i64,
                checksum,
                created_at: Utc::now(),
            };
            self.upsert_metadata(&mut tx, &meta).await?;
            metadata.push(meta);
        }

        tx.commit().await.map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        tracing::info!(namespace, suffix, table_count = tables.len(), "captured snapshot");
        Ok(metadata)
    }

    async fn discard(&self, namespace: &str, suffix: &str) -> Result<()> {
        let tables = self.namespaces.list_tables(namespace).await?;
        let schema_q = quote_ident(namespace)?;
        for table in &tables {
            let snapshot_table = Self::snapshot_table_name(table, suffix);
            // Snapshot tables are own-table-per-capture; a missing one
            // (capture failed partway) is not an error to clean up.
            if let Ok(snapshot_q) = quote_ident(&snapshot_table) {
                sqlx::query(&format!("DROP TABLE IF EXISTS {schema_q}.{snapshot_q}"))
                    .execute(&self.pool)
                    .await
                    .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
            }
        }
        Ok(())
    }

    async fn diff(
        &self,
        environment_id: Uuid,
        namespace: &str,
        before_suffix: &str,
        after_suffix: Option<&str>,
    ) -> Result<ChangeSet> {
        let tables = self.namespaces.list_tables(namespace).await?;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        let mut changes = Vec::new();
        let mut skipped = 0usize;

        for table in &tables {
            let before_table = Self::snapshot_table_name(table, before_suffix);
            let pk_columns = match self.primary_key_columns(&mut conn, namespace, table).await? {
                Some(cols) => cols,
                None => {
                    tracing::warn!(namespace, table, "table has no primary key, skipping in diff");
                    continue;
                }
            };
            let binary_columns = self.binary_columns(&mut conn, namespace, table).await?;

            if let Some(after) = after_suffix {
                let before_fp = self.load_metadata(environment_id, namespace, before_suffix, table).await?;
                let after_fp = self.load_metadata(environment_id, namespace, after, table).await?;
                if let (Some(b), Some(a)) = (before_fp, after_fp) {
                    if b == a {
                        skipped += 1;
                        continue;
                    }
                }
            }

            let before_rows = self
                .fetch_rows_sanitized(
                    &mut conn,
                    namespace,
                    &before_table,
                    &Some(pk_columns.clone()),
                    &binary_columns,
                )
                .await?;

            let after_rows = match after_suffix {
                Some(suffix) => {
                    let after_table = Self::snapshot_table_name(table, suffix);
                    self.fetch_rows_sanitized(
                        &mut conn,
                        namespace,
                        &after_table,
                        &Some(pk_columns.clone()),
                        &binary_columns,
                    )
                    .await?
                }
                None => {
                    // Diff a captured "before" against the live table — used
                    // mid-run for journal-mode cross-checks (§4.4).
                    self.fetch_rows_sanitized(
                        &mut conn,
                        namespace,
                        table,
                        &Some(pk_columns.clone()),
                        &binary_columns,
                    )
                    .await?
                }
            };

            diff_table_rows(table, before_rows, after_rows, &mut changes);
        }

        tracing::info!(
            namespace,
            before_suffix,
            after_suffix = ?after_suffix,
            tables_compared = tables.len() - skipped,
            tables_skipped = skipped,
            "diffed snapshots"
        );
        Ok(ChangeSet::new(changes))
    }
}

fn diff_table_rows(
    table: &str,
    before_rows: Vec<(Json, Json)>,
    after_rows: Vec<(Json, Json)>,
    out: &mut Vec<RowChange>,
) {
    let before_map: BTreeMap<String, Json> = before_rows
        .into_iter()
        .map(|(pk, row)| (pk.to_string(), row))
        .collect();
    let mut after_map: BTreeMap<String, Json> = after_rows
        .into_iter()
        .map(|(pk, row)| (pk.to_string(), row))
        .collect();

    for (pk_key, before_row) in &before_map {
        match after_map.remove(pk_key) {
            None => {
                out.push(RowChange::delete(table, pk_json(pk_key), before_row.clone()));
            }
            Some(after_row) => {
                if &after_row != before_row {
                    out.push(RowChange::update(
                        table,
                        pk_json(pk_key),
                        before_row.clone(),
                        after_row,
                    ));
                }
            }
        }
    }
    for (pk_key, after_row) in after_map {
        out.push(RowChange::insert(table, pk_json(&pk_key), after_row));
    }
}

fn pk_json(key: &str) -> Json {
    serde_json::from_str(key).unwrap_or(Json::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_binary_columns_replaces_named_columns_only() {
        let mut row = json!({"id": 1, "payload": "deadbeef", "name": "ok"});
        sanitize_binary_columns(&mut row, &["payload".to_string()]);
        assert_eq!(row["payload"], json!(BINARY_PLACEHOLDER));
        assert_eq!(row["name"], json!("ok"));
    }

    #[test]
    fn sanitize_binary_columns_leaves_null_as_null() {
        let mut row = json!({"id": 1, "payload": null});
        sanitize_binary_columns(&mut row, &["payload".to_string()]);
        assert_eq!(row["payload"], json!(null));
    }

    #[test]
    fn fingerprint_is_stable_for_identical_row_sequences() {
        let a = vec![
            (json!({"id": 1}), json!({"id": 1, "v": "a"})),
            (json!({"id": 2}), json!({"id": 2, "v": "b"})),
        ];
        let b = a.clone();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_sensitive_to_row_order() {
        // Rows are always fetched in deterministic PK (or all-column) order,
        // so two snapshots whose rows differ only in fetch order represent
        // genuinely different underlying data (or a differently-ordered
        // read) and must not collide.
        let a = vec![
            (json!({"id": 1}), json!({"id": 1, "v": "a"})),
            (json!({"id": 2}), json!({"id": 2, "v": "b"})),
        ];
        let b = vec![
            (json!({"id": 2}), json!({"id": 2, "v": "b"})),
            (json!({"id": 1}), json!({"id": 1, "v": "a"})),
        ];
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn diff_table_rows_detects_insert_update_delete() {
        let before = vec![
            (json!({"id": 1}), json!({"id": 1, "status": "pending"})),
            (json!({"id": 2}), json!({"id": 2, "status": "pending"})),
        ];
        let after = vec![
            (json!({"id": 1}), json!({"id": 1, "status": "shipped"})),
            (json!({"id": 3}), json!({"id": 3, "status": "pending"})),
        ];
        let mut out = Vec::new();
        diff_table_rows("orders", before, after, &mut out);
        assert_eq!(out.len(), 3);
        assert!(out.iter().any(|c| c.operation == harness_core::types::ChangeOp::Insert));
        assert!(out.iter().any(|c| c.operation == harness_core::types::ChangeOp::Update));
        assert!(out.iter().any(|c| c.operation == harness_core::types::ChangeOp::Delete));
    }
}
