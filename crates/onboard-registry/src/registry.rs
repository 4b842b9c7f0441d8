use crate::manifest::{AgentManifest, HealthStatus, TransportMode};
use onboard_core::{Agent, OnboardError, OnboardResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// How to reach an agent for one method, as resolved at send time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportDescriptor {
    pub agent_id: String,
    pub mode: TransportMode,
    pub endpoint: Option<String>,
    pub health: HealthStatus,
}

impl TransportDescriptor {
    /// A direct call is only attempted on a healthy synchronous agent.
    pub fn is_direct(&self) -> bool {
        self.mode == TransportMode::Sync && self.health == HealthStatus::Healthy
    }
}

struct RegisteredAgent {
    manifest: AgentManifest,
    handler: Arc<dyn Agent>,
}

/// Process-wide agent directory.
///
/// Read-mostly: lookups take the shared lock, writes happen only on
/// registration, deregistration and health changes. No lock is held across an
/// agent call; callers clone the handler `Arc` out.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, RegisteredAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or re-registers) an agent. The handler must report the same
    /// id as the manifest.
    pub fn register(&self, manifest: AgentManifest, handler: Arc<dyn Agent>) -> OnboardResult<()> {
        manifest.validate()?;
        if handler.id() != manifest.agent_id {
            return Err(OnboardError::ManifestInvalid(format!(
                "manifest '{}' bound to handler '{}'",
                manifest.agent_id,
                handler.id()
            )));
        }
        info!(
            agent = %manifest.agent_id,
            methods = manifest.methods.len(),
            transport = ?manifest.transport.mode,
            "Registered agent"
        );
        self.agents.write().insert(
            manifest.agent_id.clone(),
            RegisteredAgent { manifest, handler },
        );
        Ok(())
    }

    pub fn deregister(&self, agent_id: &str) -> Option<AgentManifest> {
        let removed = self.agents.write().remove(agent_id).map(|a| a.manifest);
        if removed.is_some() {
            info!(agent = %agent_id, "Deregistered agent");
        }
        removed
    }

    /// Drops every registration. Called on shutdown.
    pub fn clear(&self) {
        let mut agents = self.agents.write();
        let count = agents.len();
        agents.clear();
        info!(count, "Agent registry torn down");
    }

    pub fn resolve(&self, agent_id: &str, method: &str) -> OnboardResult<TransportDescriptor> {
        let agents = self.agents.read();
        let agent = agents
            .get(agent_id)
            .ok_or_else(|| OnboardError::UnknownAgent(agent_id.to_string()))?;
        if !agent.manifest.accepts(method) {
            return Err(OnboardError::UnsupportedMethod {
                agent: agent_id.to_string(),
                method: method.to_string(),
            });
        }
        Ok(TransportDescriptor {
            agent_id: agent_id.to_string(),
            mode: agent.manifest.transport.mode,
            endpoint: agent.manifest.transport.endpoint.clone(),
            health: agent.manifest.health,
        })
    }

    pub fn handler(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.read().get(agent_id).map(|a| Arc::clone(&a.handler))
    }

    /// Whether `source`'s manifest lists `target` as a direct-call target.
    /// Unknown sources are never authorized.
    pub fn authorize_direct_call(&self, source: &str, target: &str) -> bool {
        let allowed = self
            .agents
            .read()
            .get(source)
            .is_some_and(|a| a.manifest.may_call(target));
        if !allowed {
            warn!(source = %source, target = %target, "Direct call not in allow-list");
        }
        allowed
    }

    /// Updates an agent's health. Returns whether it changed.
    pub fn set_health(&self, agent_id: &str, health: HealthStatus) -> bool {
        let mut agents = self.agents.write();
        let Some(agent) = agents.get_mut(agent_id) else {
            return false;
        };
        if agent.manifest.health == health {
            return false;
        }
        agent.manifest.health = health;
        match health {
            HealthStatus::Unavailable => warn!(agent = %agent_id, "Agent marked unavailable"),
            HealthStatus::Healthy => info!(agent = %agent_id, "Agent healthy again"),
        }
        true
    }

    pub fn mark_unavailable(&self, agent_id: &str) -> bool {
        self.set_health(agent_id, HealthStatus::Unavailable)
    }

    pub fn health(&self, agent_id: &str) -> Option<HealthStatus> {
        self.agents.read().get(agent_id).map(|a| a.manifest.health)
    }

    /// Agents that accept `method`, sorted by id.
    pub fn interested_in(&self, method: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .read()
            .values()
            .filter(|a| a.manifest.accepts(method))
            .map(|a| a.manifest.agent_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn manifest(&self, agent_id: &str) -> Option<AgentManifest> {
        self.agents.read().get(agent_id).map(|a| a.manifest.clone())
    }

    /// All manifests, sorted by id.
    pub fn manifests(&self) -> Vec<AgentManifest> {
        let mut all: Vec<AgentManifest> =
            self.agents.read().values().map(|a| a.manifest.clone()).collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    pub(crate) fn handlers(&self) -> Vec<(String, Arc<dyn Agent>)> {
        self.agents
            .read()
            .iter()
            .map(|(id, a)| (id.clone(), Arc::clone(&a.handler)))
            .collect()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.read().contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use onboard_core::{AgentError, AgentInput};

    struct Echo(&'static str);

    #[async_trait]
    impl Agent for Echo {
        fn id(&self) -> &str {
            self.0
        }

        async fn process(&self, _input: AgentInput) -> Result<serde_json::Value, AgentError> {
            Ok(serde_json::json!({}))
        }
    }

    fn registry() -> AgentRegistry {
        let registry = AgentRegistry::new();
        registry
            .register(
                AgentManifest::new("account_setup", TransportMode::Sync)
                    .method("account_setup")
                    .allow_direct("scheduler"),
                Arc::new(Echo("account_setup")),
            )
            .unwrap();
        registry
            .register(
                AgentManifest::new("scheduler", TransportMode::Sync).method("schedule"),
                Arc::new(Echo("scheduler")),
            )
            .unwrap();
        registry
            .register(
                AgentManifest::new("notifier", TransportMode::Queue).method("notify"),
                Arc::new(Echo("notifier")),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_resolve() {
        let registry = registry();
        let desc = registry.resolve("scheduler", "schedule").unwrap();
        assert!(desc.is_direct());
        assert!(!registry.resolve("notifier", "notify").unwrap().is_direct());
        assert!(matches!(
            registry.resolve("scheduler", "notify"),
            Err(OnboardError::UnsupportedMethod { .. })
        ));
        assert!(matches!(
            registry.resolve("payroll", "notify"),
            Err(OnboardError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_allow_list() {
        let registry = registry();
        assert!(registry.authorize_direct_call("account_setup", "scheduler"));
        assert!(!registry.authorize_direct_call("account_setup", "notifier"));
        assert!(!registry.authorize_direct_call("scheduler", "notifier"));
        assert!(!registry.authorize_direct_call("stranger", "scheduler"));
    }

    #[test]
    fn test_unavailable_agent_is_not_direct() {
        let registry = registry();
        assert!(registry.mark_unavailable("scheduler"));
        assert!(!registry.mark_unavailable("scheduler"));
        let desc = registry.resolve("scheduler", "schedule").unwrap();
        assert_eq!(desc.mode, TransportMode::Sync);
        assert!(!desc.is_direct());
        assert!(registry.set_health("scheduler", HealthStatus::Healthy));
        assert!(registry.resolve("scheduler", "schedule").unwrap().is_direct());
    }

    #[test]
    fn test_handler_id_must_match() {
        let registry = AgentRegistry::new();
        let err = registry
            .register(
                AgentManifest::new("validator", TransportMode::Sync).method("validate"),
                Arc::new(Echo("scheduler")),
            )
            .unwrap_err();
        assert!(matches!(err, OnboardError::ManifestInvalid(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_interest_and_teardown() {
        let registry = registry();
        assert_eq!(registry.interested_in("notify"), vec!["notifier".to_string()]);
        assert!(registry.interested_in("validate").is_empty());
        assert_eq!(registry.manifests().len(), 3);
        assert!(registry.deregister("notifier").is_some());
        assert!(!registry.contains("notifier"));
        registry.clear();
        assert!(registry.is_empty());
    }
}
