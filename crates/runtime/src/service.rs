//! Enforcer service: construction, evaluation and policy management.

use crate::registry::{Handle, Registry};
use crate::{Error, Result, SharedAdapter};
use casbin::rhai::Engine;
use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, MgmtApi, Model, RbacApi};
use policy::{MatcherDescriptor, Param};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Sections every model must define, by key.
const REQUIRED_SECTIONS: &[(&str, &str)] = &[
    ("r", "request_definition"),
    ("p", "policy_definition"),
    ("e", "policy_effect"),
    ("m", "matchers"),
];

/// Enforcers addressed by handle, plus the optional process-wide adapter.
pub struct Service {
    registry: Registry<RwLock<Enforcer>>,
    adapter: Option<SharedAdapter>,
    /// Compiles rewritten matchers. Compilation only parses, so functions
    /// still resolve against the enforcer's own engine at evaluation time.
    compiler: Engine,
}

impl Service {
    pub fn new(adapter: Option<SharedAdapter>) -> Self {
        Self {
            registry: Registry::new(),
            adapter,
            compiler: Engine::new_raw(),
        }
    }

    /// Whether enforcers can be backed by the shared adapter.
    pub fn has_adapter(&self) -> bool {
        self.adapter.is_some()
    }

    /// Number of enforcers created so far.
    pub async fn enforcer_count(&self) -> usize {
        self.registry.len().await
    }

    /// Build an enforcer from model text and register it.
    ///
    /// With `use_adapter` set and an adapter configured, the enforcer is
    /// bound to the shared adapter and loads its persisted policy during
    /// construction. Otherwise it starts with an empty in-memory policy.
    /// Nothing is registered unless construction succeeds.
    pub async fn new_enforcer(&self, model_text: &str, use_adapter: bool) -> Result<Handle> {
        let model = DefaultModel::from_str(model_text)
            .await
            .map_err(|e| Error::ModelParse(e.to_string()))?;
        check_sections(&model)?;

        let enforcer = match self.adapter.as_ref().filter(|_| use_adapter) {
            Some(adapter) => Enforcer::new(model, adapter.clone()).await,
            None => Enforcer::new(model, MemoryAdapter::default()).await,
        }
        .map_err(Error::EnforcerInit)?;

        let handle = self.registry.create(RwLock::new(enforcer)).await?;
        info!(%handle, use_adapter, "created enforcer");
        Ok(handle)
    }

    /// Evaluate a request.
    ///
    /// Bundle-typed parameters are substituted into the matcher for the
    /// duration of the call. The original matcher text and its compiled
    /// form are put back before the enforcer lock is released, whatever the
    /// outcome.
    pub async fn enforce(&self, handle: Handle, params: &[String]) -> Result<bool> {
        let cell = self.registry.resolve(handle).await?;

        let coerced = {
            let enforcer = cell.read().await;
            let descriptor = descriptor(&enforcer);
            let coerced = policy::coerce(&descriptor.shapes(), params)?;
            if !coerced.iter().any(Param::is_bundle) {
                let allowed = enforcer.enforce(params.to_vec()).map_err(Error::Eval)?;
                debug!(%handle, allowed, "enforce");
                return Ok(allowed);
            }
            coerced
        };

        let mut enforcer = cell.write().await;
        let rewritten = descriptor(&enforcer).rewrite(&coerced)?;
        let mut scoped = MatcherRestore::install(&mut enforcer, &self.compiler, rewritten);
        let allowed = scoped.evaluate(params).map_err(Error::Eval);
        drop(scoped);

        debug!(%handle, allowed = ?allowed.as_ref().ok(), "enforce with attributes");
        allowed
    }

    /// Current matcher expression of an enforcer.
    pub async fn matcher(&self, handle: Handle) -> Result<String> {
        let cell = self.registry.resolve(handle).await?;
        let enforcer = cell.read().await;
        Ok(descriptor(&enforcer).matcher().to_string())
    }

    /// Reload the enforcer's policy from its adapter.
    pub async fn load_policy(&self, handle: Handle) -> Result<()> {
        let cell = self.registry.resolve(handle).await?;
        cell.write().await.load_policy().await.map_err(Error::Policy)
    }

    /// Persist the enforcer's policy through its adapter.
    pub async fn save_policy(&self, handle: Handle) -> Result<()> {
        let cell = self.registry.resolve(handle).await?;
        cell.write().await.save_policy().await.map_err(Error::Policy)
    }

    pub async fn add_policy(&self, handle: Handle, rule: Vec<String>) -> Result<bool> {
        let cell = self.registry.resolve(handle).await?;
        cell.write().await.add_policy(rule).await.map_err(Error::Policy)
    }

    pub async fn remove_policy(&self, handle: Handle, rule: Vec<String>) -> Result<bool> {
        let cell = self.registry.resolve(handle).await?;
        cell.write().await.remove_policy(rule).await.map_err(Error::Policy)
    }

    pub async fn has_policy(&self, handle: Handle, rule: Vec<String>) -> Result<bool> {
        let cell = self.registry.resolve(handle).await?;
        Ok(cell.read().await.has_policy(rule))
    }

    pub async fn get_policy(&self, handle: Handle) -> Result<Vec<Vec<String>>> {
        let cell = self.registry.resolve(handle).await?;
        Ok(cell.read().await.get_policy())
    }

    pub async fn add_grouping_policy(&self, handle: Handle, rule: Vec<String>) -> Result<bool> {
        let cell = self.registry.resolve(handle).await?;
        cell.write()
            .await
            .add_grouping_policy(rule)
            .await
            .map_err(Error::Policy)
    }

    pub async fn remove_grouping_policy(&self, handle: Handle, rule: Vec<String>) -> Result<bool> {
        let cell = self.registry.resolve(handle).await?;
        cell.write()
            .await
            .remove_grouping_policy(rule)
            .await
            .map_err(Error::Policy)
    }

    pub async fn get_grouping_policy(&self, handle: Handle) -> Result<Vec<Vec<String>>> {
        let cell = self.registry.resolve(handle).await?;
        Ok(cell.read().await.get_grouping_policy())
    }

    pub async fn get_roles_for_user(
        &self,
        handle: Handle,
        user: &str,
        domain: Option<&str>,
    ) -> Result<Vec<String>> {
        let cell = self.registry.resolve(handle).await?;
        Ok(cell.write().await.get_roles_for_user(user, domain))
    }

    pub async fn get_users_for_role(
        &self,
        handle: Handle,
        role: &str,
        domain: Option<&str>,
    ) -> Result<Vec<String>> {
        let cell = self.registry.resolve(handle).await?;
        Ok(cell.read().await.get_users_for_role(role, domain))
    }
}

fn check_sections(model: &DefaultModel) -> Result<()> {
    for (key, section) in REQUIRED_SECTIONS {
        let present = model
            .get_model()
            .get(*key)
            .is_some_and(|assertions| assertions.contains_key(*key));
        if !present {
            return Err(Error::ModelParse(format!("missing `{key}` in [{section}]")));
        }
    }
    Ok(())
}

/// Request tokens and matcher of the enforcer's model.
fn descriptor(enforcer: &Enforcer) -> MatcherDescriptor {
    let model = enforcer.get_model().get_model();
    let tokens = model
        .get("r")
        .and_then(|sec| sec.get("r"))
        .map(|ast| {
            if ast.tokens.is_empty() {
                ast.value.split(',').map(|t| t.trim().to_string()).collect()
            } else {
                ast.tokens.clone()
            }
        })
        .unwrap_or_default();
    let matcher = model
        .get("m")
        .and_then(|sec| sec.get("m"))
        .map(|ast| ast.value.clone())
        .unwrap_or_default();
    MatcherDescriptor::new(tokens, matcher)
}

fn matcher_slot(enforcer: &mut Enforcer) -> Option<&mut String> {
    enforcer
        .get_mut_model()
        .get_mut_model()
        .get_mut("m")
        .and_then(|sec| sec.get_mut("m"))
        .map(|ast| &mut ast.value)
}

/// Recompile the model's matchers from their current text.
fn recompile(enforcer: &mut Enforcer, engine: &Engine) -> casbin::Result<()> {
    match enforcer
        .get_mut_model()
        .as_any_mut()
        .downcast_mut::<DefaultModel>()
    {
        Some(model) => model.compile_matchers(engine),
        None => Ok(()),
    }
}

/// Temporarily replaces the matcher; the original comes back on drop.
struct MatcherRestore<'a> {
    enforcer: &'a mut Enforcer,
    engine: &'a Engine,
    source: Option<String>,
}

impl<'a> MatcherRestore<'a> {
    fn install(enforcer: &'a mut Enforcer, engine: &'a Engine, matcher: Option<String>) -> Self {
        let source = match (matcher, matcher_slot(enforcer)) {
            (Some(matcher), Some(slot)) => Some(std::mem::replace(slot, matcher)),
            _ => None,
        };
        Self {
            enforcer,
            engine,
            source,
        }
    }

    /// Evaluate against the installed matcher.
    fn evaluate(&mut self, params: &[String]) -> casbin::Result<bool> {
        if self.source.is_some() {
            recompile(self.enforcer, self.engine)?;
        }
        self.enforcer.enforce(params.to_vec())
    }
}

impl Drop for MatcherRestore<'_> {
    fn drop(&mut self) {
        let Some(source) = self.source.take() else {
            return;
        };
        if let Some(slot) = matcher_slot(self.enforcer) {
            *slot = source;
        }
        if let Err(e) = recompile(self.enforcer, self.engine) {
            warn!(error = %e, "failed to recompile restored matcher");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    const RBAC: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

    const ABAC: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = r.sub == r.obj.Owner && r.act == p.act
"#;

    fn rule(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_rbac_scenario() {
        let service = Service::new(None);
        let handle = service.new_enforcer(RBAC, false).await.unwrap();
        service
            .add_policy(handle, rule(&["alice", "data1", "read"]))
            .await
            .unwrap();

        assert!(service.enforce(handle, &rule(&["alice", "data1", "read"])).await.unwrap());
        assert!(!service.enforce(handle, &rule(&["bob", "data1", "read"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_role_inheritance() {
        let service = Service::new(None);
        let handle = service.new_enforcer(RBAC, false).await.unwrap();
        service
            .add_policy(handle, rule(&["admin", "data2", "write"]))
            .await
            .unwrap();
        service
            .add_grouping_policy(handle, rule(&["bob", "admin"]))
            .await
            .unwrap();

        assert!(service.enforce(handle, &rule(&["bob", "data2", "write"])).await.unwrap());
        assert_eq!(
            service.get_roles_for_user(handle, "bob", None).await.unwrap(),
            ["admin"]
        );
        assert_eq!(
            service.get_users_for_role(handle, "admin", None).await.unwrap(),
            ["bob"]
        );
        assert_eq!(service.get_grouping_policy(handle).await.unwrap().len(), 1);

        assert!(service
            .remove_grouping_policy(handle, rule(&["bob", "admin"]))
            .await
            .unwrap());
        assert!(!service.enforce(handle, &rule(&["bob", "data2", "write"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_enforcers_are_independent() {
        let service = Service::new(None);
        let a = service.new_enforcer(RBAC, false).await.unwrap();
        let b = service.new_enforcer(RBAC, false).await.unwrap();
        assert_ne!(a, b);

        service.add_policy(a, rule(&["alice", "data1", "read"])).await.unwrap();

        assert!(service.has_policy(a, rule(&["alice", "data1", "read"])).await.unwrap());
        assert!(!service.has_policy(b, rule(&["alice", "data1", "read"])).await.unwrap());
        assert!(service.get_policy(b).await.unwrap().is_empty());
        assert!(!service.enforce(b, &rule(&["alice", "data1", "read"])).await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_model_not_registered() {
        let service = Service::new(None);
        let first = service.new_enforcer(RBAC, false).await.unwrap();

        let err = service.new_enforcer("not a model", false).await.unwrap_err();
        assert!(matches!(err, Error::ModelParse(_)));
        assert_eq!(service.enforcer_count().await, 1);

        let next = service.new_enforcer(RBAC, false).await.unwrap();
        assert_eq!(next.get(), first.get() + 1);
    }

    #[tokio::test]
    async fn test_missing_section_rejected() {
        let service = Service::new(None);
        let without_matcher = RBAC.replace("[matchers]", "").replace(
            "m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act",
            "",
        );
        let err = service.new_enforcer(&without_matcher, false).await.unwrap_err();
        assert!(matches!(err, Error::ModelParse(ref msg) if msg.contains("[matchers]")));
        assert!(service.new_enforcer("", false).await.is_err());
        assert_eq!(service.enforcer_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let service = Service::new(None);
        let missing = Handle::from(42);

        let err = service.enforce(missing, &rule(&["alice", "data1", "read"])).await.unwrap_err();
        assert!(matches!(err, Error::HandleNotFound(h) if h == missing));
        assert!(matches!(service.load_policy(missing).await, Err(Error::HandleNotFound(_))));
        assert!(matches!(service.save_policy(missing).await, Err(Error::HandleNotFound(_))));
        assert!(matches!(service.get_policy(missing).await, Err(Error::HandleNotFound(_))));
    }

    #[tokio::test]
    async fn test_abac_bundle() {
        let service = Service::new(None);
        let handle = service.new_enforcer(ABAC, false).await.unwrap();
        service.add_policy(handle, rule(&["*", "*", "read"])).await.unwrap();

        let owned = rule(&["alice", r#"{"Owner":"alice"}"#, "read"]);
        let foreign = rule(&["alice", r#"ABAC::{"Owner":"bob"}"#, "read"]);
        assert!(service.enforce(handle, &owned).await.unwrap());
        assert!(!service.enforce(handle, &foreign).await.unwrap());

        // Each call evaluates its own attributes, not the previous call's
        assert!(service.enforce(handle, &owned).await.unwrap());
    }

    #[tokio::test]
    async fn test_abac_nested_attributes() {
        let model = ABAC.replace("r.obj.Owner", "r.obj.Meta.Owner && r.obj.Level == 3");
        let service = Service::new(None);
        let handle = service.new_enforcer(&model, false).await.unwrap();
        service.add_policy(handle, rule(&["*", "*", "read"])).await.unwrap();

        let allowed = rule(&["alice", r#"{"Meta":{"Owner":"alice"},"Level":3}"#, "read"]);
        let wrong_level = rule(&["alice", r#"{"Meta":{"Owner":"alice"},"Level":2}"#, "read"]);
        assert!(service.enforce(handle, &allowed).await.unwrap());
        assert!(!service.enforce(handle, &wrong_level).await.unwrap());

        let float = rule(&["alice", r#"{"Meta":{"Owner":"alice"},"Level":3.5}"#, "read"]);
        let err = service.enforce(handle, &float).await.unwrap_err();
        assert!(matches!(err, Error::Coercion(_)));
    }

    #[tokio::test]
    async fn test_matcher_restored_on_success_and_failure() {
        let service = Service::new(None);
        let handle = service.new_enforcer(ABAC, false).await.unwrap();
        service.add_policy(handle, rule(&["*", "*", "read"])).await.unwrap();
        let before = service.matcher(handle).await.unwrap();

        service
            .enforce(handle, &rule(&["alice", r#"{"Owner":"alice"}"#, "read"]))
            .await
            .unwrap();
        assert_eq!(service.matcher(handle).await.unwrap(), before);

        // Arity mismatch fails inside the engine, after the matcher was swapped
        let err = service
            .enforce(handle, &rule(&["alice", r#"{"Owner":"alice"}"#, "read", "extra"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Eval(_)));
        assert_eq!(service.matcher(handle).await.unwrap(), before);

        // Coercion failures happen before the matcher is touched
        let err = service
            .enforce(handle, &rule(&["alice", "data1", "read"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Coercion(_)));
        let err = service
            .enforce(handle, &rule(&["alice", r#"{"Name":"x"}"#, "read"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Coercion(_)));
        assert_eq!(service.matcher(handle).await.unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_abac_requests() {
        let service = Arc::new(Service::new(None));
        let handle = service.new_enforcer(ABAC, false).await.unwrap();
        service.add_policy(handle, rule(&["*", "*", "read"])).await.unwrap();
        let before = service.matcher(handle).await.unwrap();

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    let owner = if i % 2 == 0 { "alice" } else { "bob" };
                    let obj = format!(r#"{{"Owner":"{owner}"}}"#);
                    let allowed = service
                        .enforce(handle, &[String::from("alice"), obj, String::from("read")])
                        .await
                        .unwrap();
                    (i, allowed)
                })
            })
            .collect();

        for task in tasks {
            let (i, allowed) = task.await.unwrap();
            assert_eq!(allowed, i % 2 == 0, "request {i}");
        }
        assert_eq!(service.matcher(handle).await.unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_new_enforcer() {
        let service = Arc::new(Service::new(None));
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move { service.new_enforcer(RBAC, false).await.unwrap() })
            })
            .collect();

        let mut handles = HashSet::new();
        for task in tasks {
            let handle = task.await.unwrap();
            assert!(handles.insert(handle));
            assert!(service.get_policy(handle).await.unwrap().is_empty());
        }
        assert_eq!(service.enforcer_count().await, 32);
    }

    #[tokio::test]
    async fn test_shared_adapter_persists() {
        let adapter = crate::open_adapter("sqlite", ":memory:", false).unwrap();
        let service = Service::new(adapter);
        assert!(service.has_adapter());

        let a = service.new_enforcer(RBAC, true).await.unwrap();
        service.add_policy(a, rule(&["alice", "data1", "read"])).await.unwrap();
        service.save_policy(a).await.unwrap();

        // A second enforcer on the same adapter loads the saved rule
        let b = service.new_enforcer(RBAC, true).await.unwrap();
        assert!(service.enforce(b, &rule(&["alice", "data1", "read"])).await.unwrap());

        // An enforcer that opts out of the adapter starts empty
        let c = service.new_enforcer(RBAC, false).await.unwrap();
        assert!(service.get_policy(c).await.unwrap().is_empty());

        service.remove_policy(b, rule(&["alice", "data1", "read"])).await.unwrap();
        service.load_policy(a).await.unwrap();
        assert!(service.get_policy(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shared_adapter_enforcers_mutate_independently() {
        let adapter = crate::open_adapter("sqlite", ":memory:", false).unwrap();
        let service = Service::new(adapter);
        let a = service.new_enforcer(RBAC, true).await.unwrap();
        let b = service.new_enforcer(RBAC, true).await.unwrap();
        let alice = rule(&["alice", "data1", "read"]);

        assert!(service.add_policy(a, alice.clone()).await.unwrap());
        assert!(service.add_policy(b, alice.clone()).await.unwrap());
        assert!(service.enforce(b, &alice).await.unwrap());
        assert_eq!(service.get_policy(b).await.unwrap(), vec![alice.clone()]);

        assert!(service.remove_policy(a, alice.clone()).await.unwrap());
        assert!(service.remove_policy(b, alice.clone()).await.unwrap());
        assert!(!service.enforce(b, &alice).await.unwrap());
    }
}
