//! `FromRow` structs mirroring the `public` tables in
//! `migrations/0001_metadata.sql`, plus the identifier-quoting helper every
//! DDL-emitting adapter uses to interpolate schema/table names safely.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use harness_core::error::HarnessError;
use harness_core::types::{
    EnvironmentPoolEntry, PoolEntryStatus, RuntimeEnvironment, RuntimeEnvironmentStatus,
    TemplateEnvironment, TemplateKind, Test, TestRun, TestRunStatus, TestSuite, TestType,
    Visibility,
};
use serde_json::Value as Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Validate and double-quote a Postgres identifier for safe interpolation
/// into DDL (schema/table names can never be bind parameters). Rejects
/// anything that isn't `[a-zA-Z_][a-zA-Z0-9_]*`, which is also the shape
/// every namespace/table name this crate creates is drawn from.
pub fn quote_ident(raw: &str) -> Result<String, HarnessError> {
    let valid = !raw.is_empty()
        && raw.len() <= 63
        && raw
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{raw}\""))
    } else {
        Err(HarnessError::InvalidInput(format!(
            "not a valid identifier: {raw}"
        )))
    }
}

#[derive(Debug, FromRow)]
pub struct PgTemplateRow {
    pub id: Uuid,
    pub service: String,
    pub name: String,
    pub version: i32,
    pub visibility: String,
    pub owner_id: Option<String>,
    pub kind: String,
    pub location: String,
    pub table_order: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgTemplateRow> for TemplateEnvironment {
    type Error = anyhow::Error;

    fn try_from(row: PgTemplateRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            service: row.service,
            name: row.name,
            version: row.version,
            visibility: Visibility::from_str(&row.visibility)
                .ok_or_else(|| anyhow!("bad visibility: {}", row.visibility))?,
            owner_id: row.owner_id,
            kind: TemplateKind::from_str(&row.kind)
                .ok_or_else(|| anyhow!("bad kind: {}", row.kind))?,
            location: row.location,
            table_order: row
                .table_order
                .map(serde_json::from_value)
                .transpose()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PgRuntimeEnvironmentRow {
    pub id: Uuid,
    pub template_id: Uuid,
    pub namespace_name: String,
    pub pool_entry_id: Option<Uuid>,
    pub status: String,
    pub permanent: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_idle_seconds: i64,
    pub last_used_at: DateTime<Utc>,
    pub creator_id: String,
    pub impersonate_user_id: Option<String>,
    pub impersonate_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgRuntimeEnvironmentRow> for RuntimeEnvironment {
    type Error = anyhow::Error;

    fn try_from(row: PgRuntimeEnvironmentRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            template_id: row.template_id,
            namespace_name: row.namespace_name,
            pool_entry_id: row.pool_entry_id,
            status: RuntimeEnvironmentStatus::from_str(&row.status)
                .ok_or_else(|| anyhow!("bad status: {}", row.status))?,
            permanent: row.permanent,
            expires_at: row.expires_at,
            max_idle_seconds: row.max_idle_seconds,
            last_used_at: row.last_used_at,
            creator_id: row.creator_id,
            impersonate_user_id: row.impersonate_user_id,
            impersonate_email: row.impersonate_email,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PgPoolEntryRow {
    pub id: Uuid,
    pub template_id: Uuid,
    pub template_schema: String,
    pub namespace_name: String,
    pub status: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub claimant_id: Option<Uuid>,
    pub claim_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgPoolEntryRow> for EnvironmentPoolEntry {
    type Error = anyhow::Error;

    fn try_from(row: PgPoolEntryRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            template_id: row.template_id,
            template_schema: row.template_schema,
            namespace_name: row.namespace_name,
            status: PoolEntryStatus::from_str(&row.status)
                .ok_or_else(|| anyhow!("bad status: {}", row.status))?,
            last_used_at: row.last_used_at,
            last_refreshed_at: row.last_refreshed_at,
            claimant_id: row.claimant_id,
            claim_time: row.claim_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PgTestRow {
    pub id: Uuid,
    pub name: String,
    pub prompt: String,
    pub test_type: String,
    pub expected_output: Json,
    pub template_schema: String,
    pub impersonate_user_id: Option<String>,
    pub owner_id: Option<String>,
    pub visibility: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgTestRow> for Test {
    type Error = anyhow::Error;

    fn try_from(row: PgTestRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            prompt: row.prompt,
            test_type: TestType::from_str(&row.test_type)
                .ok_or_else(|| anyhow!("bad test_type: {}", row.test_type))?,
            expected_output: row.expected_output,
            template_schema: row.template_schema,
            impersonate_user_id: row.impersonate_user_id,
            owner_id: row.owner_id,
            visibility: Visibility::from_str(&row.visibility)
                .ok_or_else(|| anyhow!("bad visibility: {}", row.visibility))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PgTestSuiteRow {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Option<String>,
    pub visibility: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgTestSuiteRow> for TestSuite {
    type Error = anyhow::Error;

    fn try_from(row: PgTestSuiteRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            visibility: Visibility::from_str(&row.visibility)
                .ok_or_else(|| anyhow!("bad visibility: {}", row.visibility))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct PgTestRunRow {
    pub id: Uuid,
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    pub environment_id: Uuid,
    pub status: String,
    pub result: Option<Json>,
    pub before_snapshot_suffix: Option<String>,
    pub after_snapshot_suffix: Option<String>,
    pub replication_slot: Option<String>,
    pub replication_plugin: Option<String>,
    pub replication_started_at: Option<DateTime<Utc>>,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgTestRunRow> for TestRun {
    type Error = anyhow::Error;

    fn try_from(row: PgTestRunRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            test_id: row.test_id,
            suite_id: row.suite_id,
            environment_id: row.environment_id,
            status: TestRunStatus::from_str(&row.status)
                .ok_or_else(|| anyhow!("bad status: {}", row.status))?,
            result: row.result,
            before_snapshot_suffix: row.before_snapshot_suffix,
            after_snapshot_suffix: row.after_snapshot_suffix,
            replication_slot: row.replication_slot,
            replication_plugin: row.replication_plugin,
            replication_started_at: row.replication_started_at,
            creator_id: row.creator_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
