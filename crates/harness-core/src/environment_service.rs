//! Provisions and tears down [`crate::types::RuntimeEnvironment`]s
//! (`spec.md` §4.1–§4.3, `/initEnv` and `/deleteEnv`): resolves a template
//! reference, claims a warm pool entry or clones on demand, and reverses
//! that on deletion. The run lifecycle itself (`startRun`/`endRun`) lives in
//! [`crate::orchestrator::RunOrchestrator`] — this is the provisioning half.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::HarnessError;
use crate::ports::{NamespaceHandler, ReplicationRegistry, Result, RuntimeEnvironmentStore};
use crate::pool_manager::PoolManager;
use crate::principal::Principal;
use crate::template_manager::{ResolvedTemplate, TemplateManager, TemplateRef};
use crate::types::{RuntimeEnvironment, RuntimeEnvironmentStatus};

/// `/initEnv` request shape, pre-validated into exactly one template
/// reference by the caller (the HTTP layer maps the wire request's four
/// optional fields into this per §4.2's priority order).
pub struct InitEnvRequest {
    pub template_ref: TemplateRef,
    pub ttl_seconds: Option<i64>,
    pub permanent: bool,
    pub impersonate_user_id: Option<String>,
    pub impersonate_email: Option<String>,
}

const DEFAULT_TTL_SECONDS: i64 = 3600;
const DEFAULT_MAX_IDLE_SECONDS: i64 = 1800;
const ON_DEMAND_NAMESPACE_PREFIX: &str = "state";

pub struct EnvironmentService {
    namespaces: Arc<dyn NamespaceHandler>,
    pool_manager: Arc<PoolManager>,
    environments: Arc<dyn RuntimeEnvironmentStore>,
    template_manager: Arc<TemplateManager>,
    replication: Arc<dyn ReplicationRegistry>,
}

impl EnvironmentService {
    pub fn new(
        namespaces: Arc<dyn NamespaceHandler>,
        pool_manager: Arc<PoolManager>,
        environments: Arc<dyn RuntimeEnvironmentStore>,
        template_manager: Arc<TemplateManager>,
        replication: Arc<dyn ReplicationRegistry>,
    ) -> Self {
        Self {
            namespaces,
            pool_manager,
            environments,
            template_manager,
            replication,
        }
    }

    /// Resolves the reference, claims a warm pool entry if one exists for
    /// the template (falling back to an on-demand clone otherwise), and
    /// records the new `RuntimeEnvironment` row.
    pub async fn init_env(
        &self,
        principal: &Principal,
        req: InitEnvRequest,
    ) -> Result<(RuntimeEnvironment, ResolvedTemplate)> {
        let resolved = self
            .template_manager
            .resolve(principal, req.template_ref)
            .await?;
        let env_id = Uuid::new_v4();

        let (namespace_name, pool_entry_id) = match resolved.template_id {
            Some(template_id) => match self.pool_manager.claim(template_id, env_id).await? {
                Some(entry) => (entry.namespace_name, Some(entry.id)),
                None => (self.clone_on_demand(env_id, &resolved.location).await?, None),
            },
            None => (self.clone_on_demand(env_id, &resolved.location).await?, None),
        };

        let now = Utc::now();
        let expires_at = if req.permanent {
            None
        } else {
            Some(now + Duration::seconds(req.ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS)))
        };

        let env = RuntimeEnvironment {
            id: env_id,
            template_id: resolved.template_id.unwrap_or_else(Uuid::nil),
            namespace_name,
            pool_entry_id,
            status: RuntimeEnvironmentStatus::Ready,
            permanent: req.permanent,
            expires_at,
            max_idle_seconds: DEFAULT_MAX_IDLE_SECONDS,
            last_used_at: now,
            creator_id: principal.user_id.clone(),
            impersonate_user_id: req.impersonate_user_id,
            impersonate_email: req.impersonate_email,
            created_at: now,
            updated_at: now,
        };
        let created = self.environments.create(env).await?;
        Ok((created, resolved))
    }

    async fn clone_on_demand(&self, env_id: Uuid, location: &str) -> Result<String> {
        let namespace_name = format!("{ON_DEMAND_NAMESPACE_PREFIX}_{}", env_id.simple());
        self.namespaces.clone_namespace(location, &namespace_name).await?;
        self.namespaces
            .set_replica_identity_full(&namespace_name)
            .await?;
        Ok(namespace_name)
    }

    /// Tears an environment down. Pool-sourced environments release their
    /// entry back to `dirty` (the pool's own `refresh` drops/re-clones the
    /// namespace later — §3 "Ownership rules"); on-demand environments drop
    /// their namespace directly. A drop failure is tracked as
    /// `cleanup_failed` rather than surfaced as a bare 500, so the
    /// maintenance loop can retry it (§7).
    pub async fn delete_env(&self, principal: &Principal, environment_id: Uuid) -> Result<()> {
        let env = self.environments.get(environment_id).await?;
        if env.creator_id != principal.user_id {
            return Err(HarnessError::NotFound(format!(
                "environment {environment_id}"
            )));
        }

        let cleanup = match env.pool_entry_id {
            Some(pool_entry_id) => self.pool_manager.release(pool_entry_id).await,
            None => self.namespaces.drop_namespace(&env.namespace_name).await,
        };

        match cleanup {
            Ok(()) => {
                self.replication.cleanup_environment(environment_id).await;
                self.environments
                    .update_status(environment_id, RuntimeEnvironmentStatus::Deleted)
                    .await
            }
            Err(e) => {
                self.environments
                    .update_status(environment_id, RuntimeEnvironmentStatus::CleanupFailed)
                    .await?;
                Err(e)
            }
        }
    }

    /// One maintenance-loop tick (§9 "Background cleanup"): every ready
    /// environment past its expiry or idle budget moves to `expired` and
    /// has its namespace torn down. Recomputes the expired set from the
    /// metadata store every call, so re-running after a crash is safe.
    pub async fn run_expiry_sweep(&self) -> Result<usize> {
        let expired = self.environments.list_expired().await?;
        let count = expired.len();
        for env in expired {
            self.environments
                .update_status(env.id, RuntimeEnvironmentStatus::Expired)
                .await?;
            let cleanup = match env.pool_entry_id {
                Some(pool_entry_id) => self.pool_manager.release(pool_entry_id).await,
                None => self.namespaces.drop_namespace(&env.namespace_name).await,
            };
            match cleanup {
                Ok(()) => {
                    self.replication.cleanup_environment(env.id).await;
                    self.environments
                        .update_status(env.id, RuntimeEnvironmentStatus::Deleted)
                        .await?;
                }
                Err(e) => {
                    tracing::error!(environment_id = %env.id, error = %e, "expiry cleanup failed");
                    self.environments
                        .update_status(env.id, RuntimeEnvironmentStatus::CleanupFailed)
                        .await?;
                }
            }
        }
        Ok(count)
    }

    pub async fn touch(&self, environment_id: Uuid) -> Result<()> {
        self.environments.touch(environment_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PoolStore, TemplateStore, TestStore};
    use crate::types::{TemplateEnvironment, TemplateKind, Visibility};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeNamespaces {
        cloned: Mutex<Vec<(String, String)>>,
        dropped: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NamespaceHandler for FakeNamespaces {
        async fn create_empty(&self, _namespace: &str) -> Result<()> {
            Ok(())
        }
        async fn clone_namespace(&self, source: &str, target: &str) -> Result<()> {
            self.cloned.lock().unwrap().push((source.into(), target.into()));
            Ok(())
        }
        async fn drop_namespace(&self, namespace: &str) -> Result<()> {
            self.dropped.lock().unwrap().push(namespace.into());
            Ok(())
        }
        async fn set_replica_identity_full(&self, _namespace: &str) -> Result<()> {
            Ok(())
        }
        async fn list_tables(&self, _namespace: &str) -> Result<Vec<String>> {
            Ok(vec![])
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

    #[derive(Default)]
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
        async fn update_status(&self, id: Uuid, status: RuntimeEnvironmentStatus) -> Result<()> {
            if let Some(e) = self.0.lock().unwrap().get_mut(&id) {
                e.status = status;
            }
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
    struct FakeTemplates(Mutex<HashMap<Uuid, TemplateEnvironment>>);

    #[async_trait]
    impl TemplateStore for FakeTemplates {
        async fn create(&self, t: TemplateEnvironment) -> Result<TemplateEnvironment> {
            self.0.lock().unwrap().insert(t.id, t.clone());
            Ok(t)
        }
        async fn get(&self, id: Uuid) -> Result<TemplateEnvironment> {
            self.0.lock().unwrap().get(&id).cloned().ok_or_else(|| HarnessError::NotFound(id.to_string()))
        }
        async fn get_latest(&self, _s: &str, _n: &str) -> Result<TemplateEnvironment> {
            unimplemented!()
        }
        async fn get_version(&self, _s: &str, _n: &str, _v: i32) -> Result<TemplateEnvironment> {
            unimplemented!()
        }
        async fn list(&self, _s: Option<&str>, _o: Option<&str>) -> Result<Vec<TemplateEnvironment>> {
            Ok(vec![])
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeReplication {
        cleaned_environments: Mutex<Vec<Uuid>>,
    }

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
        async fn cleanup_environment(&self, environment_id: Uuid) {
            self.cleaned_environments.lock().unwrap().push(environment_id);
        }
        async fn active_run_for(&self, _namespace: &str) -> Option<(Uuid, Uuid)> {
            None
        }
    }

    #[derive(Default)]
    struct FakeTests;

    #[async_trait]
    impl TestStore for FakeTests {
        async fn create(&self, t: crate::types::Test) -> Result<crate::types::Test> {
            Ok(t)
        }
        async fn get(&self, id: Uuid) -> Result<crate::types::Test> {
            Err(HarnessError::NotFound(id.to_string()))
        }
        async fn list(&self, _o: Option<&str>) -> Result<Vec<crate::types::Test>> {
            Ok(vec![])
        }
        async fn update(&self, t: crate::types::Test) -> Result<crate::types::Test> {
            Ok(t)
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn create_suite(&self, s: crate::types::TestSuite) -> Result<crate::types::TestSuite> {
            Ok(s)
        }
        async fn get_suite(&self, _id: Uuid) -> Result<crate::types::TestSuite> {
            unimplemented!()
        }
        async fn list_suites(&self, _o: Option<&str>) -> Result<Vec<crate::types::TestSuite>> {
            Ok(vec![])
        }
        async fn add_member(&self, _s: Uuid, _t: Uuid, _o: i32) -> Result<()> {
            Ok(())
        }
        async fn list_members(&self, _s: Uuid) -> Result<Vec<crate::types::Test>> {
            Ok(vec![])
        }
    }

    fn service() -> (EnvironmentService, Arc<FakeNamespaces>, Arc<FakeTemplates>) {
        let (svc, namespaces, templates, _replication) = service_with_replication();
        (svc, namespaces, templates)
    }

    fn service_with_replication() -> (
        EnvironmentService,
        Arc<FakeNamespaces>,
        Arc<FakeTemplates>,
        Arc<FakeReplication>,
    ) {
        let namespaces = Arc::new(FakeNamespaces::default());
        let pool = Arc::new(FakePool);
        let environments = Arc::new(FakeEnvironments::default());
        let templates = Arc::new(FakeTemplates::default());
        let tests = Arc::new(FakeTests);
        let replication = Arc::new(FakeReplication::default());
        let template_manager = Arc::new(TemplateManager::new(templates.clone(), tests));
        let pool_manager = Arc::new(PoolManager::new(namespaces.clone(), pool));
        (
            EnvironmentService::new(
                namespaces.clone(),
                pool_manager,
                environments,
                template_manager,
                replication.clone(),
            ),
            namespaces,
            templates,
            replication,
        )
    }

    #[tokio::test]
    async fn init_env_with_no_ready_pool_entry_clones_on_demand() {
        let (svc, namespaces, templates) = service();
        let tpl = TemplateEnvironment {
            id: Uuid::new_v4(),
            service: "slack".into(),
            name: "default".into(),
            version: 1,
            visibility: Visibility::Public,
            owner_id: None,
            kind: TemplateKind::Schema,
            location: "slack_default".into(),
            table_order: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        templates.create(tpl.clone()).await.unwrap();

        let (env, _resolved) = svc
            .init_env(
                &Principal::new("alice"),
                InitEnvRequest {
                    template_ref: TemplateRef::Id(tpl.id),
                    ttl_seconds: None,
                    permanent: false,
                    impersonate_user_id: None,
                    impersonate_email: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(env.status, RuntimeEnvironmentStatus::Ready);
        assert!(env.pool_entry_id.is_none());
        assert!(env.expires_at.is_some());
        assert_eq!(namespaces.cloned.lock().unwrap().len(), 1);
        assert_eq!(namespaces.cloned.lock().unwrap()[0].0, "slack_default");
    }

    #[tokio::test]
    async fn permanent_env_has_no_expiry() {
        let (svc, _namespaces, _templates) = service();
        let (env, _resolved) = svc
            .init_env(
                &Principal::new("alice"),
                InitEnvRequest {
                    template_ref: TemplateRef::RawLocation("custom_ns".into()),
                    ttl_seconds: None,
                    permanent: true,
                    impersonate_user_id: None,
                    impersonate_email: None,
                },
            )
            .await
            .unwrap();
        assert!(env.expires_at.is_none());
    }

    #[tokio::test]
    async fn delete_env_drops_namespace_for_on_demand_environment() {
        let (svc, namespaces, _templates) = service();
        let (env, _resolved) = svc
            .init_env(
                &Principal::new("alice"),
                InitEnvRequest {
                    template_ref: TemplateRef::RawLocation("custom_ns".into()),
                    ttl_seconds: None,
                    permanent: false,
                    impersonate_user_id: None,
                    impersonate_email: None,
                },
            )
            .await
            .unwrap();

        svc.delete_env(&Principal::new("alice"), env.id).await.unwrap();
        assert_eq!(namespaces.dropped.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_env_cleans_up_replication_registrations() {
        let (svc, _namespaces, _templates, replication) = service_with_replication();
        let (env, _resolved) = svc
            .init_env(
                &Principal::new("alice"),
                InitEnvRequest {
                    template_ref: TemplateRef::RawLocation("custom_ns".into()),
                    ttl_seconds: None,
                    permanent: false,
                    impersonate_user_id: None,
                    impersonate_email: None,
                },
            )
            .await
            .unwrap();

        svc.delete_env(&Principal::new("alice"), env.id).await.unwrap();
        assert_eq!(replication.cleaned_environments.lock().unwrap().as_slice(), &[env.id]);
    }

    #[tokio::test]
    async fn delete_env_by_non_owner_is_not_found() {
        let (svc, _namespaces, _templates) = service();
        let (env, _resolved) = svc
            .init_env(
                &Principal::new("alice"),
                InitEnvRequest {
                    template_ref: TemplateRef::RawLocation("custom_ns".into()),
                    ttl_seconds: None,
                    permanent: false,
                    impersonate_user_id: None,
                    impersonate_email: None,
                },
            )
            .await
            .unwrap();

        let err = svc.delete_env(&Principal::new("mallory"), env.id).await.unwrap_err();
        assert!(matches!(err, HarnessError::NotFound(_)));
    }
}
