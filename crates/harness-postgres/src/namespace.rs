//! `NamespaceHandler` (spec.md §4.1): create/clone/drop Postgres schemas and
//! hand out sessions scoped to one. All DDL runs inside one transaction per
//! operation so a partial failure never leaves a half-created namespace.

use async_trait::async_trait;
use harness_core::error::HarnessError;
use harness_core::ports::{NamespaceHandler, Result};
use sqlx::{pool::PoolConnection, PgPool, Postgres, Row};

use crate::sqlx_types::quote_ident;

pub struct PgNamespaceHandler {
    pool: PgPool,
}

impl PgNamespaceHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// A connection pinned to one namespace's `search_path` for the duration of
/// its lifetime. Returned to the pool automatically on drop (sqlx's
/// `PoolConnection` does this on every exit path, including panics that
/// unwind rather than abort).
pub struct NamespaceSession {
    conn: PoolConnection<Postgres>,
}

impl NamespaceSession {
    pub fn executor(&mut self) -> &mut PoolConnection<Postgres> {
        &mut self.conn
    }
}

#[async_trait]
impl NamespaceHandler for PgNamespaceHandler {
    async fn create_empty(&self, namespace: &str) -> Result<()> {
        let quoted = quote_ident(namespace)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        sqlx::query(&format!("CREATE SCHEMA {quoted}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        tx.commit()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        tracing::info!(namespace, "created empty namespace");
        Ok(())
    }

    async fn clone_namespace(&self, source: &str, target: &str) -> Result<()> {
        let source_q = quote_ident(source)?;
        let target_q = quote_ident(target)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        sqlx::query(&format!("CREATE SCHEMA {target_q}"))
            .execute(&mut *tx)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

        let tables: Vec<String> = sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
        )
        .bind(source)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .into_iter()
        .map(|row| row.get::<String, _>("table_name"))
        .collect();

        for table in &tables {
            let table_q = quote_ident(table)?;
            sqlx::query(&format!(
                "CREATE TABLE {target_q}.{table_q} \
                 (LIKE {source_q}.{table_q} INCLUDING DEFAULTS INCLUDING CONSTRAINTS \
                  INCLUDING INDEXES INCLUDING IDENTITY INCLUDING STORAGE INCLUDING COMMENTS)"
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;

            sqlx::query(&format!(
                "INSERT INTO {target_q}.{table_q} SELECT * FROM {source_q}.{table_q}"
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        }

        // `LIKE ... INCLUDING CONSTRAINTS` never copies foreign keys — recreate
        // them pointing back into `target` once every table exists there.
        let foreign_keys: Vec<(String, String, String, String, String, String, String)> = sqlx::query(
            r#"
            SELECT
                con.conname,
                src_tbl.relname AS table_name,
                ARRAY_TO_STRING(ARRAY(
                    SELECT attname FROM unnest(con.conkey) WITH ORDINALITY AS u(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = u.attnum
                    ORDER BY u.ord
                ), ',') AS columns,
                ref_tbl.relname AS ref_table,
                ARRAY_TO_STRING(ARRAY(
                    SELECT attname FROM unnest(con.confkey) WITH ORDINALITY AS u(attnum, ord)
                    JOIN pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = u.attnum
                    ORDER BY u.ord
                ), ',') AS ref_columns,
                CASE con.confupdtype
                    WHEN 'a' THEN 'NO ACTION' WHEN 'r' THEN 'RESTRICT'
                    WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL' ELSE 'SET DEFAULT' END,
                CASE con.confdeltype
                    WHEN 'a' THEN 'NO ACTION' WHEN 'r' THEN 'RESTRICT'
                    WHEN 'c' THEN 'CASCADE' WHEN 'n' THEN 'SET NULL' ELSE 'SET DEFAULT' END
            FROM pg_constraint con
            JOIN pg_class src_tbl ON src_tbl.oid = con.conrelid
            JOIN pg_namespace src_ns ON src_ns.oid = src_tbl.relnamespace
            JOIN pg_class ref_tbl ON ref_tbl.oid = con.confrelid
            WHERE con.contype = 'f' AND src_ns.nspname = $1
            "#,
        )
        .bind(source)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .into_iter()
        .map(|row| {
            (
                row.get(0),
                row.get(1),
                row.get(2),
                row.get(3),
                row.get(4),
                row.get(5),
                row.get(6),
            )
        })
        .collect();

        for (name, table, columns, ref_table, ref_columns, on_update, on_delete) in foreign_keys {
            let table_q = quote_ident(&table)?;
            let ref_table_q = quote_ident(&ref_table)?;
            let name_q = quote_ident(&name)?;
            sqlx::query(&format!(
                "ALTER TABLE {target_q}.{table_q} ADD CONSTRAINT {name_q} \
                 FOREIGN KEY ({columns}) REFERENCES {target_q}.{ref_table_q} ({ref_columns}) \
                 ON UPDATE {on_update} ON DELETE {on_delete}"
            ))
            .execute(&mut *tx)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        tracing::info!(source, target, table_count = tables.len(), "cloned namespace");
        Ok(())
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<()> {
        let quoted = quote_ident(namespace)?;
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {quoted} CASCADE"))
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        tracing::info!(namespace, "dropped namespace");
        Ok(())
    }

    async fn set_replica_identity_full(&self, namespace: &str) -> Result<()> {
        let tables = self.list_tables(namespace).await?;
        let schema_q = quote_ident(namespace)?;
        for table in tables {
            let table_q = quote_ident(&table)?;
            sqlx::query(&format!("ALTER TABLE {schema_q}.{table_q} REPLICA IDENTITY FULL"))
                .execute(&self.pool)
                .await
                .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        }
        tracing::debug!(namespace, "set REPLICA IDENTITY FULL on every table");
        Ok(())
    }

    async fn list_tables(&self, namespace: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(rows.into_iter().map(|r| r.get("table_name")).collect())
    }
}

impl PgNamespaceHandler {
    /// `session_for(name)` (§4.1) — a connection with `search_path` pinned
    /// to `namespace`, released back to the pool on drop.
    pub async fn session_for(&self, namespace: &str) -> Result<NamespaceSession> {
        let quoted = quote_ident(namespace)?;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        sqlx::query(&format!("SET search_path TO {quoted}, public"))
            .execute(&mut *conn)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(NamespaceSession { conn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unquotable_namespace_names() {
        assert!(quote_ident("state_ok").is_ok());
        assert!(quote_ident("bad; drop table x").is_err());
    }
}
