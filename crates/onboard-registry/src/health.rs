use crate::manifest::HealthStatus;
use crate::registry::AgentRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Periodically polls every registered agent's `health_check` and records the
/// result in the registry.
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<AgentRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Runs one round of checks. Returns the agents whose health changed.
    pub async fn check_once(&self) -> Vec<(String, HealthStatus)> {
        let mut changed = Vec::new();
        for (agent_id, handler) in self.registry.handlers() {
            let health = if handler.health_check().await {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unavailable
            };
            debug!(agent = %agent_id, ?health, "health check");
            if self.registry.set_health(&agent_id, health) {
                changed.push((agent_id, health));
            }
        }
        changed.sort_by(|a, b| a.0.cmp(&b.0));
        changed
    }

    /// Spawns the polling loop. Abort the handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.check_once().await;
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::manifest::{AgentManifest, TransportMode};
    use async_trait::async_trait;
    use onboard_core::{Agent, AgentError, AgentInput};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flaky {
        up: AtomicBool,
    }

    #[async_trait]
    impl Agent for Flaky {
        fn id(&self) -> &str {
            "scheduler"
        }

        async fn process(&self, _input: AgentInput) -> Result<serde_json::Value, AgentError> {
            Ok(serde_json::Value::Null)
        }

        async fn health_check(&self) -> bool {
            self.up.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_check_marks_and_restores() {
        let registry = Arc::new(AgentRegistry::new());
        let agent = Arc::new(Flaky {
            up: AtomicBool::new(false),
        });
        registry
            .register(
                AgentManifest::new("scheduler", TransportMode::Sync).method("schedule"),
                agent.clone(),
            )
            .unwrap();
        let monitor = HealthMonitor::new(registry.clone(), Duration::from_secs(60));

        let changed = monitor.check_once().await;
        assert_eq!(changed, vec![("scheduler".to_string(), HealthStatus::Unavailable)]);
        assert!(monitor.check_once().await.is_empty());

        agent.up.store(true, Ordering::SeqCst);
        monitor.check_once().await;
        assert_eq!(registry.health("scheduler"), Some(HealthStatus::Healthy));
    }
}
