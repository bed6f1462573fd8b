//! Core domain types for the evaluation harness.
//! Pure value types — no sqlx, no DB dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use strum::Display;
use uuid::Uuid;

// ── Enums ──────────────────────────────────────────────────────

/// Template visibility — controls who can resolve and clone it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// What a template's `location` points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TemplateKind {
    Schema,
    Artifact,
    Jsonb,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::Artifact => "artifact",
            Self::Jsonb => "jsonb",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "schema" => Some(Self::Schema),
            "artifact" => Some(Self::Artifact),
            "jsonb" => Some(Self::Jsonb),
            _ => None,
        }
    }
}

/// Lifecycle status of a runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuntimeEnvironmentStatus {
    Initializing,
    Ready,
    Expired,
    Deleted,
    CleanupFailed,
}

impl RuntimeEnvironmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
            Self::CleanupFailed => "cleanup_failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(Self::Initializing),
            "ready" => Some(Self::Ready),
            "expired" => Some(Self::Expired),
            "deleted" => Some(Self::Deleted),
            "cleanup_failed" => Some(Self::CleanupFailed),
            _ => None,
        }
    }
}

/// Lifecycle status of a warm pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PoolEntryStatus {
    Ready,
    InUse,
    Refreshing,
    Dirty,
}

impl PoolEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::InUse => "in_use",
            Self::Refreshing => "refreshing",
            Self::Dirty => "dirty",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "in_use" => Some(Self::InUse),
            "refreshing" => Some(Self::Refreshing),
            "dirty" => Some(Self::Dirty),
            _ => None,
        }
    }
}

/// The operation a change-journal row or diff entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Test kind — distinguishes evaluation shape, not scoring logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestType {
    ActionEval,
    RetriEval,
    CompositeEval,
}

impl TestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActionEval => "actionEval",
            Self::RetriEval => "retriEval",
            Self::CompositeEval => "compositeEval",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "actionEval" => Some(Self::ActionEval),
            "retriEval" => Some(Self::RetriEval),
            "compositeEval" => Some(Self::CompositeEval),
            _ => None,
        }
    }
}

/// Lifecycle status of a single test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TestRunStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
}

impl TestRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Snapshot mode a run captures its baseline/final state with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    Snapshot,
    Journal,
}

// ── Entities ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEnvironment {
    pub id: Uuid,
    pub service: String,
    pub name: String,
    pub version: i32,
    pub visibility: Visibility,
    pub owner_id: Option<String>,
    pub kind: TemplateKind,
    pub location: String,
    pub table_order: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEnvironment {
    pub id: Uuid,
    pub template_id: Uuid,
    pub namespace_name: String,
    /// Set when this environment was provisioned by claiming a warm pool
    /// entry rather than cloning on demand; `deleteEnv` uses it to release
    /// the entry back to `dirty` instead of leaving it claimed forever.
    pub pool_entry_id: Option<Uuid>,
    pub status: RuntimeEnvironmentStatus,
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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentPoolEntry {
    pub id: Uuid,
    pub template_id: Uuid,
    pub template_schema: String,
    pub namespace_name: String,
    pub status: PoolEntryStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub claimant_id: Option<Uuid>,
    pub claim_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub environment_id: Uuid,
    pub schema_name: String,
    pub snapshot_suffix: String,
    pub table_name: String,
    pub row_count: i64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeJournalRow {
    pub id: Uuid,
    pub environment_id: Uuid,
    pub run_id: Uuid,
    pub lsn: String,
    pub table_name: String,
    pub operation: ChangeOp,
    pub primary_key: Json,
    pub before: Option<Json>,
    pub after: Option<Json>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: Uuid,
    pub name: String,
    pub prompt: String,
    pub test_type: TestType,
    pub expected_output: Json,
    pub template_schema: String,
    pub impersonate_user_id: Option<String>,
    pub owner_id: Option<String>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Option<String>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestMembership {
    pub test_suite_id: Uuid,
    pub test_id: Uuid,
    pub ordinal: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub id: Uuid,
    pub test_id: Option<Uuid>,
    pub suite_id: Option<Uuid>,
    pub environment_id: Uuid,
    pub status: TestRunStatus,
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

impl TestRun {
    pub fn capture_mode(&self) -> CaptureMode {
        if self.before_snapshot_suffix.is_some() {
            CaptureMode::Snapshot
        } else {
            CaptureMode::Journal
        }
    }
}
