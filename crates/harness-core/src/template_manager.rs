//! Resolves a client-supplied template reference to a concrete, accessible
//! template (`spec.md` §4.2). Sits on top of [`crate::ports::TemplateStore`]
//! and [`crate::ports::TestStore`] — the store traits answer "what rows
//! exist", this answers "which one did the caller mean, and may they see it".

use std::sync::Arc;
use uuid::Uuid;

use crate::error::HarnessError;
use crate::ports::{Result, TemplateStore, TestStore};
use crate::principal::Principal;
use crate::types::TemplateEnvironment;

/// The forms a caller may identify a template by, tried in the priority
/// order §4.2 specifies: id, then test id, then service+name, then a raw
/// location string.
#[derive(Debug, Clone)]
pub enum TemplateRef {
    Id(Uuid),
    TestId(Uuid),
    ServiceName { service: String, name: String },
    RawLocation(String),
}

/// What resolution hands back to the caller — enough to clone from, without
/// leaking the full template row to callers who only need to provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    pub template_id: Option<Uuid>,
    pub location: String,
    pub service: String,
}

pub struct TemplateManager {
    templates: Arc<dyn TemplateStore>,
    tests: Arc<dyn TestStore>,
}

impl TemplateManager {
    pub fn new(templates: Arc<dyn TemplateStore>, tests: Arc<dyn TestStore>) -> Self {
        Self { templates, tests }
    }

    /// Resolve a reference to `(location, service)`. Private templates of
    /// other principals are indistinguishable from non-existence — both
    /// collapse to the same `NotFound` error kind so access and presence
    /// can't be distinguished by a caller probing ids.
    pub async fn resolve(
        &self,
        principal: &Principal,
        reference: TemplateRef,
    ) -> Result<ResolvedTemplate> {
        match reference {
            TemplateRef::Id(id) => {
                let tpl = self.templates.get(id).await?;
                self.require_visible(principal, &tpl)?;
                Ok(Self::into_resolved(tpl))
            }
            TemplateRef::TestId(test_id) => {
                let test = self.tests.get(test_id).await.map_err(|_| {
                    HarnessError::NotFound(format!("test {test_id}"))
                })?;
                if !principal.owns(test.owner_id.as_deref())
                    && test.visibility != crate::types::Visibility::Public
                {
                    return Err(HarnessError::NotFound(format!("test {test_id}")));
                }
                // The test records a template schema location directly, not
                // a template row id — it may predate the template or point
                // at a schema not registered in the catalog at all.
                Ok(ResolvedTemplate {
                    template_id: None,
                    service: reference_service_from_location(&test.template_schema),
                    location: test.template_schema,
                })
            }
            TemplateRef::ServiceName { service, name } => {
                let tpl = self
                    .templates
                    .get_latest(&service, &name)
                    .await
                    .map_err(|_| HarnessError::NotFound(format!("template {service}/{name}")))?;
                self.require_visible(principal, &tpl)?;
                Ok(Self::into_resolved(tpl))
            }
            TemplateRef::RawLocation(location) => Ok(ResolvedTemplate {
                template_id: None,
                location: location.clone(),
                service: location,
            }),
        }
    }

    /// One row per (service, name), newest version, visible to `principal`.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<TemplateEnvironment>> {
        self.templates.list(None, Some(&principal.user_id)).await
    }

    /// Fetches a single template row by id, enforcing the same visibility
    /// rule `resolve` does — a private template owned by someone else reads
    /// as `NotFound`, same as a nonexistent id (§6 `GET /templates/:id`).
    pub async fn get_visible(&self, principal: &Principal, id: Uuid) -> Result<TemplateEnvironment> {
        let tpl = self.templates.get(id).await?;
        self.require_visible(principal, &tpl)?;
        Ok(tpl)
    }

    fn require_visible(&self, principal: &Principal, tpl: &TemplateEnvironment) -> Result<()> {
        let visible = tpl.visibility == crate::types::Visibility::Public
            || principal.owns(tpl.owner_id.as_deref());
        if visible {
            Ok(())
        } else {
            // Same error kind as "doesn't exist" — see doc comment above.
            Err(HarnessError::NotFound(format!("template {}", tpl.id)))
        }
    }

    fn into_resolved(tpl: TemplateEnvironment) -> ResolvedTemplate {
        ResolvedTemplate {
            template_id: Some(tpl.id),
            location: tpl.location,
            service: tpl.service,
        }
    }
}

/// The test's template reference path has no `service` column to read from
/// directly (its `template_schema` is a raw location). Fall back to the
/// schema-name convention (`<service>_<name>`) used for template namespaces
/// (§6 "Persisted state layout") rather than leaving it empty.
fn reference_service_from_location(hint: &str) -> String {
    hint.split('_').next().unwrap_or(hint).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TestType, Visibility};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTemplates(Mutex<HashMap<Uuid, TemplateEnvironment>>);

    #[async_trait]
    impl TemplateStore for FakeTemplates {
        async fn create(&self, t: TemplateEnvironment) -> Result<TemplateEnvironment> {
            self.0.lock().unwrap().insert(t.id, t.clone());
            Ok(t)
        }
        async fn get(&self, id: Uuid) -> Result<TemplateEnvironment> {
            self.0
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| HarnessError::NotFound(id.to_string()))
        }
        async fn get_latest(&self, service: &str, name: &str) -> Result<TemplateEnvironment> {
            self.0
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.service == service && t.name == name)
                .max_by_key(|t| t.version)
                .cloned()
                .ok_or_else(|| HarnessError::NotFound(format!("{service}/{name}")))
        }
        async fn get_version(&self, _s: &str, _n: &str, _v: i32) -> Result<TemplateEnvironment> {
            unimplemented!()
        }
        async fn list(
            &self,
            _service: Option<&str>,
            _owner_id: Option<&str>,
        ) -> Result<Vec<TemplateEnvironment>> {
            Ok(self.0.lock().unwrap().values().cloned().collect())
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct FakeTests(Mutex<HashMap<Uuid, crate::types::Test>>);

    #[async_trait]
    impl TestStore for FakeTests {
        async fn create(&self, t: crate::types::Test) -> Result<crate::types::Test> {
            self.0.lock().unwrap().insert(t.id, t.clone());
            Ok(t)
        }
        async fn get(&self, id: Uuid) -> Result<crate::types::Test> {
            self.0
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| HarnessError::NotFound(id.to_string()))
        }
        async fn list(&self, _owner_id: Option<&str>) -> Result<Vec<crate::types::Test>> {
            unimplemented!()
        }
        async fn update(&self, t: crate::types::Test) -> Result<crate::types::Test> {
            Ok(t)
        }
        async fn delete(&self, _id: Uuid) -> Result<()> {
            unimplemented!()
        }
        async fn create_suite(
            &self,
            s: crate::types::TestSuite,
        ) -> Result<crate::types::TestSuite> {
            Ok(s)
        }
        async fn get_suite(&self, _id: Uuid) -> Result<crate::types::TestSuite> {
            unimplemented!()
        }
        async fn list_suites(&self, _owner_id: Option<&str>) -> Result<Vec<crate::types::TestSuite>> {
            unimplemented!()
        }
        async fn add_member(&self, _suite_id: Uuid, _test_id: Uuid, _ordinal: i32) -> Result<()> {
            unimplemented!()
        }
        async fn list_members(&self, _suite_id: Uuid) -> Result<Vec<crate::types::Test>> {
            unimplemented!()
        }
    }

    fn template(owner: Option<&str>, visibility: Visibility) -> TemplateEnvironment {
        TemplateEnvironment {
            id: Uuid::new_v4(),
            service: "slack".into(),
            name: "default".into(),
            version: 1,
            visibility,
            owner_id: owner.map(String::from),
            kind: crate::types::TemplateKind::Schema,
            location: "slack_default".into(),
            table_order: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn resolves_public_template_by_id_for_any_principal() {
        let tpl = template(None, Visibility::Public);
        let templates = Arc::new(FakeTemplates::default());
        templates.create(tpl.clone()).await.unwrap();
        let mgr = TemplateManager::new(templates, Arc::new(FakeTests::default()));

        let resolved = mgr
            .resolve(&Principal::new("anyone"), TemplateRef::Id(tpl.id))
            .await
            .unwrap();
        assert_eq!(resolved.location, "slack_default");
        assert_eq!(resolved.service, "slack");
    }

    #[tokio::test]
    async fn private_template_of_another_principal_is_not_found() {
        let tpl = template(Some("alice"), Visibility::Private);
        let templates = Arc::new(FakeTemplates::default());
        templates.create(tpl.clone()).await.unwrap();
        let mgr = TemplateManager::new(templates, Arc::new(FakeTests::default()));

        let err = mgr
            .resolve(&Principal::new("bob"), TemplateRef::Id(tpl.id))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::NotFound(_)));
    }

    #[tokio::test]
    async fn owner_can_resolve_own_private_template_by_service_name() {
        let tpl = template(Some("alice"), Visibility::Private);
        let templates = Arc::new(FakeTemplates::default());
        templates.create(tpl.clone()).await.unwrap();
        let mgr = TemplateManager::new(templates, Arc::new(FakeTests::default()));

        let resolved = mgr
            .resolve(
                &Principal::new("alice"),
                TemplateRef::ServiceName {
                    service: "slack".into(),
                    name: "default".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(resolved.template_id, Some(tpl.id));
    }

    #[tokio::test]
    async fn resolves_via_test_id_using_recorded_template_schema() {
        let test = crate::types::Test {
            id: Uuid::new_v4(),
            name: "send a message".into(),
            prompt: "send hello".into(),
            test_type: TestType::ActionEval,
            expected_output: serde_json::json!({}),
            template_schema: "slack_default".into(),
            impersonate_user_id: None,
            owner_id: Some("alice".into()),
            visibility: Visibility::Private,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let tests = Arc::new(FakeTests::default());
        tests.create(test.clone()).await.unwrap();
        let mgr = TemplateManager::new(Arc::new(FakeTemplates::default()), tests);

        let resolved = mgr
            .resolve(&Principal::new("alice"), TemplateRef::TestId(test.id))
            .await
            .unwrap();
        assert_eq!(resolved.location, "slack_default");
        assert_eq!(resolved.service, "slack");
    }

    #[tokio::test]
    async fn raw_location_passes_through_unresolved() {
        let mgr = TemplateManager::new(Arc::new(FakeTemplates::default()), Arc::new(FakeTests::default()));
        let resolved = mgr
            .resolve(&Principal::new("anyone"), TemplateRef::RawLocation("custom_ns".into()))
            .await
            .unwrap();
        assert_eq!(resolved.location, "custom_ns");
    }

    #[tokio::test]
    async fn get_visible_rejects_private_template_of_another_principal() {
        let tpl = template(Some("alice"), Visibility::Private);
        let templates = Arc::new(FakeTemplates::default());
        templates.create(tpl.clone()).await.unwrap();
        let mgr = TemplateManager::new(templates, Arc::new(FakeTests::default()));

        let err = mgr.get_visible(&Principal::new("bob"), tpl.id).await.unwrap_err();
        assert!(matches!(err, HarnessError::NotFound(_)));

        let ok = mgr.get_visible(&Principal::new("alice"), tpl.id).await.unwrap();
        assert_eq!(ok.id, tpl.id);
    }
}
