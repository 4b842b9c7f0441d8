//! Built-in onboarding step agents.
//!
//! Each agent implements [`onboard_core::Agent`] for one method and performs
//! its external work through [`SideEffects`], keyed so that re-delivery of the
//! same step never repeats an effect.
//!
//! # Main entry points
//!
//! - [`register_builtins()`]: Register the four agents with their default manifests.
//! - [`register_with_manifests()`]: Register the agents under operator-supplied manifests.
//! - [`builtin_manifests()`]: The default manifests.
//! - [`InMemoryEffects`]: In-process side-effect backend.

/// Account creation and direct scheduling.
pub mod account_setup;
/// Company contacts and channels.
pub mod directory;
/// Idempotent side-effect interface and in-memory backend.
pub mod effects;
/// HR, manager and employee notifications.
pub mod notifier;
/// Onboarding calendar events.
pub mod scheduler;
/// Employee data validation.
pub mod validator;

pub use account_setup::{permissions_for, AccountSetupAgent, BASE_PERMISSIONS};
pub use effects::{Effect, EffectKey, EffectReceipt, InMemoryEffects, SideEffects};
pub use notifier::NotifierAgent;
pub use scheduler::SchedulerAgent;
pub use validator::{ValidatorAgent, STANDARD_DEPARTMENTS, STANDARD_ROLES};

use onboard_core::{
    Agent, DirectCaller, OnboardError, OnboardResult, ACCOUNT_SETUP, NOTIFIER, SCHEDULER,
    VALIDATOR,
};
use onboard_registry::{AgentManifest, AgentRegistry, TransportMode};
use std::sync::Arc;

/// Switches for the built-in agent set.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinOptions {
    /// `account_setup` calls the scheduler itself once the account exists.
    pub direct_scheduling: bool,
}

/// Default manifests: three synchronous agents and a queued notifier.
/// Only `account_setup -> scheduler` is allowed as a direct call.
pub fn builtin_manifests() -> Vec<AgentManifest> {
    vec![
        AgentManifest::new(VALIDATOR, TransportMode::Sync)
            .method("validate")
            .endpoint("local://validator"),
        AgentManifest::new(ACCOUNT_SETUP, TransportMode::Sync)
            .method("account_setup")
            .endpoint("local://account_setup")
            .allow_direct(SCHEDULER),
        AgentManifest::new(SCHEDULER, TransportMode::Sync)
            .method("schedule")
            .endpoint("local://scheduler"),
        AgentManifest::new(NOTIFIER, TransportMode::Queue)
            .method("notify")
            .endpoint("queue://notifier"),
    ]
}

fn handler_for(
    agent_id: &str,
    effects: &Arc<dyn SideEffects>,
    caller: &Arc<dyn DirectCaller>,
    options: BuiltinOptions,
) -> Option<Arc<dyn Agent>> {
    let handler: Arc<dyn Agent> = match agent_id {
        VALIDATOR => Arc::new(ValidatorAgent::new()),
        ACCOUNT_SETUP => {
            let agent = AccountSetupAgent::new(effects.clone());
            if options.direct_scheduling {
                Arc::new(agent.with_direct_scheduling(caller.clone()))
            } else {
                Arc::new(agent)
            }
        }
        SCHEDULER => Arc::new(SchedulerAgent::new(effects.clone())),
        NOTIFIER => Arc::new(NotifierAgent::new(effects.clone())),
        _ => return None,
    };
    Some(handler)
}

/// Registers the built-in agents under [`builtin_manifests()`].
pub fn register_builtins(
    registry: &AgentRegistry,
    effects: Arc<dyn SideEffects>,
    caller: Arc<dyn DirectCaller>,
    options: BuiltinOptions,
) -> OnboardResult<()> {
    register_with_manifests(registry, builtin_manifests(), effects, caller, options)
}

/// Registers the built-in agents under the given manifests.
///
/// Every manifest must name a built-in agent.
pub fn register_with_manifests(
    registry: &AgentRegistry,
    manifests: Vec<AgentManifest>,
    effects: Arc<dyn SideEffects>,
    caller: Arc<dyn DirectCaller>,
    options: BuiltinOptions,
) -> OnboardResult<()> {
    for manifest in manifests {
        let handler = handler_for(&manifest.agent_id, &effects, &caller, options).ok_or_else(
            || {
                OnboardError::ManifestInvalid(format!(
                    "no built-in agent named '{}'",
                    manifest.agent_id
                ))
            },
        )?;
        registry.register(manifest, handler)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use onboard_core::Payload;
    use uuid::Uuid;

    struct NoCaller;

    #[async_trait]
    impl DirectCaller for NoCaller {
        async fn call(
            &self,
            _source: &str,
            _target: &str,
            _payload: Payload,
            _correlation_id: Uuid,
        ) -> OnboardResult<serde_json::Value> {
            Err(OnboardError::Bus("not connected".into()))
        }
    }

    #[test]
    fn test_builtin_manifests_are_valid() {
        for manifest in builtin_manifests() {
            manifest.validate().unwrap();
        }
    }

    #[test]
    fn test_register_builtins() {
        let registry = AgentRegistry::new();
        register_builtins(
            &registry,
            Arc::new(InMemoryEffects::new()),
            Arc::new(NoCaller),
            BuiltinOptions::default(),
        )
        .unwrap();
        assert_eq!(registry.len(), 4);
        assert!(registry.authorize_direct_call(ACCOUNT_SETUP, SCHEDULER));
        assert!(!registry.authorize_direct_call(ACCOUNT_SETUP, NOTIFIER));
        assert!(!registry.resolve(NOTIFIER, "notify").unwrap().is_direct());
    }

    #[test]
    fn test_unknown_manifest_rejected() {
        let registry = AgentRegistry::new();
        let err = register_with_manifests(
            &registry,
            vec![AgentManifest::new("payroll", TransportMode::Sync).method("notify")],
            Arc::new(InMemoryEffects::new()),
            Arc::new(NoCaller),
            BuiltinOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OnboardError::ManifestInvalid(_)));
        assert!(registry.is_empty());
    }
}
