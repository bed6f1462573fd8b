//! `TestStore` and `TestRunStore` — the declarative test/suite catalog and
//! its run history (spec.md §3 "Test", "TestSuite", "TestRun").

use async_trait::async_trait;
use harness_core::error::HarnessError;
use harness_core::ports::{Result, TestRunStore, TestStore};
use harness_core::types::{Test, TestRun, TestRunStatus, TestSuite};
use serde_json::Value as Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::sqlx_types::{PgTestRow, PgTestRunRow, PgTestSuiteRow};

pub struct PgTestStore {
    pool: PgPool,
}

impl PgTestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TEST_COLUMNS: &str = "id, name, prompt, test_type, expected_output, template_schema, \
    impersonate_user_id, owner_id, visibility, created_at, updated_at";

#[async_trait]
impl TestStore for PgTestStore {
    async fn create(&self, test: Test) -> Result<Test> {
        let row = sqlx::query_as::<_, PgTestRow>(&format!(
            r#"
            INSERT INTO tests
                (id, name, prompt, test_type, expected_output, template_schema,
                 impersonate_user_id, owner_id, visibility, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now(), now())
            RETURNING {TEST_COLUMNS}
            "#
        ))
        .bind(test.id)
        .bind(&test.name)
        .bind(&test.prompt)
        .bind(test.test_type.as_str())
        .bind(&test.expected_output)
        .bind(&test.template_schema)
        .bind(&test.impersonate_user_id)
        .bind(&test.owner_id)
        .bind(test.visibility.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn get(&self, id: Uuid) -> Result<Test> {
        let row = sqlx::query_as::<_, PgTestRow>(&format!(
            "SELECT {TEST_COLUMNS} FROM tests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .ok_or_else(|| HarnessError::NotFound(format!("test {id}")))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn list(&self, owner_id: Option<&str>) -> Result<Vec<Test>> {
        let rows = sqlx::query_as::<_, PgTestRow>(&format!(
            "SELECT {TEST_COLUMNS} FROM tests WHERE visibility = 'public' OR owner_id = $1 \
             ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(HarnessError::Internal))
            .collect()
    }

    async fn update(&self, test: Test) -> Result<Test> {
        let row = sqlx::query_as::<_, PgTestRow>(&format!(
            r#"
            UPDATE tests SET
                name = $2, prompt = $3, test_type = $4, expected_output = $5,
                template_schema = $6, impersonate_user_id = $7, owner_id = $8,
                visibility = $9, updated_at = now()
            WHERE id = $1
            RETURNING {TEST_COLUMNS}
            "#
        ))
        .bind(test.id)
        .bind(&test.name)
        .bind(&test.prompt)
        .bind(test.test_type.as_str())
        .bind(&test.expected_output)
        .bind(&test.template_schema)
        .bind(&test.impersonate_user_id)
        .bind(&test.owner_id)
        .bind(test.visibility.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .ok_or_else(|| HarnessError::NotFound(format!("test {}", test.id)))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM tests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn create_suite(&self, suite: TestSuite) -> Result<TestSuite> {
        let row = sqlx::query_as::<_, PgTestSuiteRow>(
            r#"
            INSERT INTO test_suites (id, name, owner_id, visibility, created_at, updated_at)
            VALUES ($1, $2, $3, $4, now(), now())
            RETURNING id, name, owner_id, visibility, created_at, updated_at
            "#,
        )
        .bind(suite.id)
        .bind(&suite.name)
        .bind(&suite.owner_id)
        .bind(suite.visibility.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn get_suite(&self, id: Uuid) -> Result<TestSuite> {
        let row = sqlx::query_as::<_, PgTestSuiteRow>(
            "SELECT id, name, owner_id, visibility, created_at, updated_at \
             FROM test_suites WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .ok_or_else(|| HarnessError::NotFound(format!("test suite {id}")))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn list_suites(&self, owner_id: Option<&str>) -> Result<Vec<TestSuite>> {
        let rows = sqlx::query_as::<_, PgTestSuiteRow>(
            "SELECT id, name, owner_id, visibility, created_at, updated_at \
             FROM test_suites WHERE visibility = 'public' OR owner_id = $1 \
             ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(HarnessError::Internal))
            .collect()
    }

    async fn add_member(&self, suite_id: Uuid, test_id: Uuid, ordinal: i32) -> Result<()> {
        sqlx::query(
            "INSERT INTO test_memberships (test_suite_id, test_id, ordinal) VALUES ($1, $2, $3) \
             ON CONFLICT (test_suite_id, test_id) DO UPDATE SET ordinal = EXCLUDED.ordinal",
        )
        .bind(suite_id)
        .bind(test_id)
        .bind(ordinal)
        .execute(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn list_members(&self, suite_id: Uuid) -> Result<Vec<Test>> {
        let rows = sqlx::query_as::<_, PgTestRow>(&format!(
            r#"
            SELECT t.id, t.name, t.prompt, t.test_type, t.expected_output, t.template_schema,
                   t.impersonate_user_id, t.owner_id, t.visibility, t.created_at, t.updated_at
            FROM tests t
            JOIN test_memberships m ON m.test_id = t.id
            WHERE m.test_suite_id = $1
            ORDER BY m.ordinal
            "#
        ))
        .bind(suite_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(HarnessError::Internal))
            .collect()
    }
}

pub struct PgTestRunStore {
    pool: PgPool,
}

impl PgTestRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RUN_COLUMNS: &str = "id, test_id, suite_id, environment_id, status, result, \
    before_snapshot_suffix, after_snapshot_suffix, replication_slot, replication_plugin, \
    replication_started_at, creator_id, created_at, updated_at";

#[async_trait]
impl TestRunStore for PgTestRunStore {
    async fn create(&self, run: TestRun) -> Result<TestRun> {
        let row = sqlx::query_as::<_, PgTestRunRow>(&format!(
            r#"
            INSERT INTO test_runs
                (id, test_id, suite_id, environment_id, status, result,
                 before_snapshot_suffix, after_snapshot_suffix, replication_slot,
                 replication_plugin, replication_started_at, creator_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, now(), now())
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run.id)
        .bind(run.test_id)
        .bind(run.suite_id)
        .bind(run.environment_id)
        .bind(run.status.as_str())
        .bind(&run.result)
        .bind(&run.before_snapshot_suffix)
        .bind(&run.after_snapshot_suffix)
        .bind(&run.replication_slot)
        .bind(&run.replication_plugin)
        .bind(run.replication_started_at)
        .bind(&run.creator_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn get(&self, id: Uuid) -> Result<TestRun> {
        let row = sqlx::query_as::<_, PgTestRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM test_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?
        .ok_or_else(|| HarnessError::NotFound(format!("test run {id}")))?;
        row.try_into().map_err(HarnessError::Internal)
    }

    async fn update_status(&self, id: Uuid, status: TestRunStatus) -> Result<()> {
        sqlx::query("UPDATE test_runs SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn record_result(&self, id: Uuid, result: Json) -> Result<()> {
        sqlx::query("UPDATE test_runs SET result = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(result)
            .execute(&self.pool)
            .await
            .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn list_for_suite(&self, suite_id: Uuid) -> Result<Vec<TestRun>> {
        let rows = sqlx::query_as::<_, PgTestRunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM test_runs WHERE suite_id = $1 ORDER BY created_at DESC"
        ))
        .bind(suite_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HarnessError::Internal(anyhow::anyhow!(e)))?;
        rows.into_iter()
            .map(|r| r.try_into().map_err(HarnessError::Internal))
            .collect()
    }
}
