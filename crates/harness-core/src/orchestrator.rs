//! Sequences the lifecycle of a single test run (`spec.md` §4.6): `startRun`
//! captures a baseline (snapshot or replication registration), `endRun`
//! materializes the diff and scores it against the test's DSL spec.
//!
//! Depends only on [`crate::ports`] traits — `harness-server` wires this
//! against `harness-postgres`/`harness-replication` adapters; tests wire it
//! against in-memory fakes.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::diff::ChangeSet;
use crate::dsl::{self, AssertionResult};
use crate::error::HarnessError;
use crate::ports::{
    ChangeJournalStore, PoolStore, ReplicationRegistry, RuntimeEnvironmentStore, SnapshotStore,
    TestRunStore, TestStore,
};
use crate::principal::Principal;
use crate::types::{CaptureMode, TestRun, TestRunStatus};

pub type Result<T> = std::result::Result<T, HarnessError>;

/// How a run captures its baseline/final state. `Snapshot` suits ad hoc
/// single runs; `Journal` amortizes the capture cost across many
/// concurrently-running tests sharing the one global replication slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStrategy {
    Snapshot,
    Journal,
}

pub struct RunOrchestrator {
    environments: Arc<dyn RuntimeEnvironmentStore>,
    pool: Arc<dyn PoolStore>,
    snapshots: Arc<dyn SnapshotStore>,
    journal: Arc<dyn ChangeJournalStore>,
    replication: Arc<dyn ReplicationRegistry>,
    tests: Arc<dyn TestStore>,
    runs: Arc<dyn TestRunStore>,
    replication_slot_name: String,
    replication_plugin: String,
}

impl RunOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        environments: Arc<dyn RuntimeEnvironmentStore>,
        pool: Arc<dyn PoolStore>,
        snapshots: Arc<dyn SnapshotStore>,
        journal: Arc<dyn ChangeJournalStore>,
        replication: Arc<dyn ReplicationRegistry>,
        tests: Arc<dyn TestStore>,
        runs: Arc<dyn TestRunStore>,
        replication_slot_name: String,
        replication_plugin: String,
    ) -> Self {
        Self {
            environments,
            pool,
            snapshots,
            journal,
            replication,
            tests,
            runs,
            replication_slot_name,
            replication_plugin,
        }
    }

    /// `startRun` — strict fence: returns only after the before-state is
    /// captured (§5 Ordering guarantees).
    pub async fn start_run(
        &self,
        principal: &Principal,
        environment_id: Uuid,
        test_id: Option<Uuid>,
        suite_id: Option<Uuid>,
        strategy: CaptureStrategy,
    ) -> Result<TestRun> {
        let env = self.environments.get(environment_id).await?;
        if env.creator_id != principal.user_id {
            return Err(HarnessError::NotFound(format!(
                "environment {environment_id}"
            )));
        }

        let mut run = TestRun {
            id: Uuid::new_v4(),
            test_id,
            suite_id,
            environment_id,
            status: TestRunStatus::Running,
            result: None,
            before_snapshot_suffix: None,
            after_snapshot_suffix: None,
            replication_slot: None,
            replication_plugin: None,
            replication_started_at: None,
            creator_id: principal.user_id.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        match strategy {
            CaptureStrategy::Snapshot => {
                self.snapshots
                    .capture(env.id, &env.namespace_name, "before")
                    .await?;
                run.before_snapshot_suffix = Some("before".to_string());
            }
            CaptureStrategy::Journal => {
                self.replication
                    .register_active_run(&env.namespace_name, environment_id, run.id)
                    .await;
                run.replication_slot = Some(self.replication_slot_name.clone());
                run.replication_plugin = Some(self.replication_plugin.clone());
                run.replication_started_at = Some(Utc::now());
            }
        }

        self.runs.create(run).await
    }

    /// `endRun` — strict fence: returns only once the diff is materialized
    /// and scored.
    pub async fn end_run(
        &self,
        principal: &Principal,
        run_id: Uuid,
        expected_output_override: Option<Json>,
    ) -> Result<(ChangeSet, AssertionResult)> {
        let run = self.runs.get(run_id).await?;
        if run.creator_id != principal.user_id {
            return Err(HarnessError::NotFound(format!("run {run_id}")));
        }

        let outcome = self.materialize_and_score(&run, expected_output_override).await;

        match &outcome {
            Ok((diff, result)) => {
                self.runs
                    .update_status(
                        run.id,
                        if result.passed {
                            TestRunStatus::Passed
                        } else {
                            TestRunStatus::Failed
                        },
                    )
                    .await?;
                // Persists the materialized diff alongside the score so
                // `/diffRun` can answer without recomputing it (§3 "Diff").
                self.runs
                    .record_result(
                        run.id,
                        serde_json::json!({
                            "score": result.score,
                            "failures": result.failures,
                            "diff": diff,
                        }),
                    )
                    .await?;
            }
            Err(_) => {
                self.runs.update_status(run.id, TestRunStatus::Error).await?;
            }
        }

        outcome
    }

    async fn materialize_and_score(
        &self,
        run: &TestRun,
        expected_output_override: Option<Json>,
    ) -> Result<(ChangeSet, AssertionResult)> {
        let env = self.environments.get(run.environment_id).await?;

        let spec_json = match expected_output_override {
            Some(spec) => spec,
            None => {
                let test_id = run.test_id.ok_or_else(|| {
                    HarnessError::InvalidInput(
                        "endRun requires expectedOutput when the run has no test_id".into(),
                    )
                })?;
                self.tests.get(test_id).await?.expected_output
            }
        };
        let compiled = dsl::compile(&spec_json)
            .map_err(|e| HarnessError::InvalidInput(e.to_string()))?;

        let diff = match run.capture_mode() {
            CaptureMode::Snapshot => {
                self.snapshots
                    .capture(env.id, &env.namespace_name, "after")
                    .await?;
                self.snapshots
                    .diff(env.id, &env.namespace_name, "before", Some("after"))
                    .await?
            }
            CaptureMode::Journal => {
                let rows = self.journal.list_for_run(run.id).await?;
                self.replication.unregister_active_run(&env.namespace_name).await;
                self.journal.delete_for_run(run.id).await?;
                ChangeSet::from_journal_verbatim(rows)
            }
        };

        let result = dsl::evaluate(&compiled, &diff);
        Ok((diff, result))
    }

    /// Cancel a run before `endRun`: unregister it from the replication map
    /// and discard any buffered journal rows (§5 Cancellation).
    pub async fn cancel_run(&self, principal: &Principal, run_id: Uuid) -> Result<()> {
        let run = self.runs.get(run_id).await?;
        if run.creator_id != principal.user_id {
            return Err(HarnessError::NotFound(format!("run {run_id}")));
        }
        if run.capture_mode() == CaptureMode::Journal {
            let env = self.environments.get(run.environment_id).await?;
            self.replication.unregister_active_run(&env.namespace_name).await;
            self.journal.delete_for_run(run.id).await?;
        }
        self.runs.update_status(run.id, TestRunStatus::Error).await
    }

    /// Release a claimed pool entry back to `dirty` when its owning
    /// environment is deleted (§4.3 `release`).
    pub async fn release_pool_entry(&self, pool_entry_id: Uuid) -> Result<()> {
        self.pool.mark_dirty(pool_entry_id).await
    }

    /// Fetches a run, enforcing ownership (`/diffRun`, `/evaluateRun`).
    pub async fn get_run(&self, principal: &Principal, run_id: Uuid) -> Result<TestRun> {
        let run = self.runs.get(run_id).await?;
        if run.creator_id != principal.user_id {
            return Err(HarnessError::NotFound(format!("run {run_id}")));
        }
        Ok(run)
    }

    /// Ad hoc diff between two snapshot suffixes of an environment's
    /// namespace, outside the startRun/endRun lifecycle (`/diffRun` with an
    /// `envId` rather than a `runId`).
    pub async fn diff_environment(
        &self,
        principal: &Principal,
        environment_id: Uuid,
        before_suffix: &str,
        after_suffix: Option<&str>,
    ) -> Result<ChangeSet> {
        let env = self.environments.get(environment_id).await?;
        if env.creator_id != principal.user_id {
            return Err(HarnessError::NotFound(format!(
                "environment {environment_id}"
            )));
        }
        self.snapshots
            .diff(env.id, &env.namespace_name, before_suffix, after_suffix)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::RowChange;
    use crate::dsl::Score;
    use crate::types::{RuntimeEnvironmentStatus, Test, TestType, Visibility};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeEnvironments(Mutex<HashMap<Uuid, RuntimeEnvironment>>);

    #[async_trait]
    impl RuntimeEnvironmentStore for FakeEnvironments {
        async fn create(&self, env: RuntimeEnvironment) -> Result<RuntimeEnvironment> {
            self.0.lock().unwrap().insert(env.id, env.clone());
            Ok(env)
        }
        async fn get(&self, id: Uuid) -> Result<RuntimeEnvironment> {
            self.0
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| HarnessError::NotFound(id.to_string()))
        }
        async fn update_status(&self, _id: Uuid, _status: RuntimeEnvironmentStatus) -> Result<()> {
            Ok(())
        }
        async fn touch(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn list_expired(&self) -> Result<Vec<RuntimeEnvironment>> {
            Ok(vec![])
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakePool;

    #[async_trait]
    impl PoolStore for FakePool {
        async fn insert(&self, e: crate::types::EnvironmentPoolEntry) -> Result<crate::types::EnvironmentPoolEntry> {
            Ok(e)
        }
        async fn claim(&self, _t: Uuid, _c: Uuid) -> Result<Option<crate::types::EnvironmentPoolEntry>> {
            Ok(None)
        }
        async fn mark_dirty(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn mark_refreshing(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn mark_ready(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn count_ready(&self, _t: Uuid) -> Result<i64> {
            Ok(0)
        }
        async fn list_dirty(&self) -> Result<Vec<crate::types::EnvironmentPoolEntry>> {
            Ok(vec![])
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    /// A snapshot store whose `diff` returns one fixed change set regardless
    /// of suffixes, so tests can assert on orchestration, not snapshot SQL.
    struct FakeSnapshots {
        captured: Mutex<Vec<String>>,
        fixed_diff: ChangeSet,
    }

    #[async_trait]
    impl SnapshotStore for FakeSnapshots {
        async fn capture(
            &self,
            _environment_id: Uuid,
            _namespace: &str,
            suffix: &str,
        ) -> Result<Vec<crate::types::SnapshotMetadata>> {
            self.captured.lock().unwrap().push(suffix.to_string());
            Ok(vec![])
        }
        async fn discard(&self, _namespace: &str, _suffix: &str) -> Result<()> {
            Ok(())
        }
        async fn diff(
            &self,
            _environment_id: Uuid,
            _namespace: &str,
            _before_suffix: &str,
            _after_suffix: Option<&str>,
        ) -> Result<ChangeSet> {
            Ok(self.fixed_diff.clone())
        }
    }

    #[derive(Default)]
    struct FakeJournal;

    #[async_trait]
    impl ChangeJournalStore for FakeJournal {
        async fn append(&self, _rows: Vec<crate::types::ChangeJournalRow>) -> Result<()> {
            Ok(())
        }
        async fn list_for_run(&self, _run_id: Uuid) -> Result<Vec<crate::types::ChangeJournalRow>> {
            Ok(vec![])
        }
        async fn delete_for_run(&self, _run_id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeReplication;

    #[async_trait]
    impl ReplicationRegistry for FakeReplication {
        async fn ensure_global_slot(&self, _slot_name: &str, _plugin: &str) -> Result<()> {
            Ok(())
        }
        async fn drop_slot(&self, _slot_name: &str) -> Result<()> {
            Ok(())
        }
        async fn register_active_run(&self, _namespace: &str, _environment_id: Uuid, _run_id: Uuid) {}
        async fn unregister_active_run(&self, _namespace: &str) {}
        async fn unregister_run(&self, _run_id: Uuid) {}
        async fn cleanup_environment(&self, _environment_id: Uuid) {}
        async fn active_run_for(&self, _namespace: &str) -> Option<(Uuid, Uuid)> {
            None
        }
    }

    struct FakeTests(Mutex<HashMap<Uuid, Test>>);

    #[async_trait]
    impl TestStore for FakeTests {
        async fn create(&self, t: Test) -> Result<Test> {
            self.0.lock().unwrap().insert(t.id, t.clone());
            Ok(t)
        }
        async fn get(&self, id: Uuid) -> Result<Test> {
            self.0
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| HarnessError::NotFound(id.to_string()))
        }
        async fn list(&self, _owner_id: Option<&str>) -> Result<Vec<Test>> {
            Ok(vec![])
        }
        async fn update(&self, t: Test) -> Result<Test> {
            Ok(t)
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn create_suite(&self, s: crate::types::TestSuite) -> Result<crate::types::TestSuite> {
            Ok(s)
        }
        async fn get_suite(&self, id: Uuid) -> Result<crate::types::TestSuite> {
            Err(HarnessError::NotFound(id.to_string()))
        }
        async fn list_suites(&self, _owner_id: Option<&str>) -> Result<Vec<crate::types::TestSuite>> {
            Ok(vec![])
        }
        async fn add_member(&self, _suite_id: Uuid, _test_id: Uuid, _ordinal: i32) -> Result<()> {
            Ok(())
        }
        async fn list_members(&self, _suite_id: Uuid) -> Result<Vec<Test>> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct FakeRuns(Mutex<HashMap<Uuid, TestRun>>);

    #[async_trait]
    impl TestRunStore for FakeRuns {
        async fn create(&self, run: TestRun) -> Result<TestRun> {
            self.0.lock().unwrap().insert(run.id, run.clone());
            Ok(run)
        }
        async fn get(&self, id: Uuid) -> Result<TestRun> {
            self.0
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| HarnessError::NotFound(id.to_string()))
        }
        async fn update_status(&self, id: Uuid, status: TestRunStatus) -> Result<()> {
            if let Some(r) = self.0.lock().unwrap().get_mut(&id) {
                r.status = status;
            }
            Ok(())
        }
        async fn record_result(&self, id: Uuid, result: Json) -> Result<()> {
            if let Some(r) = self.0.lock().unwrap().get_mut(&id) {
                r.result = Some(result);
            }
            Ok(())
        }
        async fn list_for_suite(&self, _suite_id: Uuid) -> Result<Vec<TestRun>> {
            Ok(vec![])
        }
    }

    fn env(creator: &str) -> RuntimeEnvironment {
        RuntimeEnvironment {
            id: Uuid::new_v4(),
            template_id: Uuid::new_v4(),
            namespace_name: "state_abc".into(),
            pool_entry_id: None,
            status: RuntimeEnvironmentStatus::Ready,
            permanent: false,
            expires_at: None,
            max_idle_seconds: 1800,
            last_used_at: Utc::now(),
            creator_id: creator.into(),
            impersonate_user_id: None,
            impersonate_email: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn test_row(expected_output: Json, template_schema: &str) -> Test {
        Test {
            id: Uuid::new_v4(),
            name: "send a message".into(),
            prompt: "send hello".into(),
            test_type: TestType::ActionEval,
            expected_output,
            template_schema: template_schema.into(),
            impersonate_user_id: None,
            owner_id: None,
            visibility: Visibility::Public,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[allow(clippy::type_complexity)]
    fn orchestrator(
        environments: Arc<FakeEnvironments>,
        tests: Arc<FakeTests>,
        runs: Arc<FakeRuns>,
        fixed_diff: ChangeSet,
    ) -> RunOrchestrator {
        RunOrchestrator::new(
            environments,
            Arc::new(FakePool),
            Arc::new(FakeSnapshots {
                captured: Mutex::new(vec![]),
                fixed_diff,
            }),
            Arc::new(FakeJournal),
            Arc::new(FakeReplication),
            tests,
            runs,
            "diffslot_global".into(),
            "wal2json".into(),
        )
    }

    #[tokio::test]
    async fn snapshot_round_trip_insert_counted_once() {
        let env = env("alice");
        let test = test_row(
            serde_json::json!({
                "assertions": [{
                    "diff_type": "added",
                    "entity": "messages",
                    "where": {"message_text": "Hello team!"},
                    "expected_count": 1
                }]
            }),
            "slack_default",
        );

        let environments = Arc::new(FakeEnvironments(Mutex::new(HashMap::from([(env.id, env.clone())]))));
        let tests = Arc::new(FakeTests(Mutex::new(HashMap::from([(test.id, test.clone())]))));
        let runs = Arc::new(FakeRuns::default());
        let diff = ChangeSet::new(vec![RowChange::insert(
            "messages",
            serde_json::json!({"id": 1}),
            serde_json::json!({"id": 1, "message_text": "Hello team!"}),
        )]);
        let orch = orchestrator(environments, tests, runs, diff);
        let principal = Principal::new("alice");

        let run = orch
            .start_run(&principal, env.id, Some(test.id), None, CaptureStrategy::Snapshot)
            .await
            .unwrap();
        assert_eq!(run.before_snapshot_suffix.as_deref(), Some("before"));

        let (_diff, result) = orch.end_run(&principal, run.id, None).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.score, Score { passed: 1, total: 1, percent: 100.0 });

        let persisted = orch.get_run(&principal, run.id).await.unwrap();
        assert_eq!(persisted.status, TestRunStatus::Passed);
        assert!(persisted.result.is_some());
    }

    #[tokio::test]
    async fn end_run_by_non_owner_is_not_found() {
        let env = env("alice");
        let test = test_row(serde_json::json!({"assertions": []}), "slack_default");
        let environments = Arc::new(FakeEnvironments(Mutex::new(HashMap::from([(env.id, env.clone())]))));
        let tests = Arc::new(FakeTests(Mutex::new(HashMap::from([(test.id, test.clone())]))));
        let runs = Arc::new(FakeRuns::default());
        let orch = orchestrator(environments, tests, runs, ChangeSet::default());

        let run = orch
            .start_run(&Principal::new("alice"), env.id, Some(test.id), None, CaptureStrategy::Snapshot)
            .await
            .unwrap();

        let err = orch
            .end_run(&Principal::new("mallory"), run.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NotFound(_)));
    }

    #[tokio::test]
    async fn end_run_without_test_id_requires_expected_output_override() {
        let env = env("alice");
        let environments = Arc::new(FakeEnvironments(Mutex::new(HashMap::from([(env.id, env.clone())]))));
        let tests = Arc::new(FakeTests(Mutex::new(HashMap::new())));
        let runs = Arc::new(FakeRuns::default());
        let orch = orchestrator(environments, tests, runs, ChangeSet::default());
        let principal = Principal::new("alice");

        let run = orch
            .start_run(&principal, env.id, None, None, CaptureStrategy::Snapshot)
            .await
            .unwrap();

        let err = orch.end_run(&principal, run.id, None).await.unwrap_err();
        assert!(matches!(err, HarnessError::InvalidInput(_)));

        let (_diff, result) = orch
            .end_run(&principal, run.id, Some(serde_json::json!({"assertions": []})))
            .await
            .unwrap();
        assert!(result.passed);
    }
}
