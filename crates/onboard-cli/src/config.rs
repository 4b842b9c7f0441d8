use onboard_bus::BusConfig;
use onboard_orchestrator::OrchestratorConfig;
use onboard_registry::AgentManifest;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Contents of `onboard.toml`. Every field has a default, so an empty file is
/// a valid configuration.
#[derive(Debug, Deserialize)]
pub struct OnboardConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub store: StoreKind,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    /// Replaces the built-in manifests when non-empty.
    #[serde(default)]
    pub manifests: Vec<AgentManifest>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub direct_scheduling: bool,
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            direct_scheduling: false,
            health_interval_secs: default_health_interval_secs(),
        }
    }
}

impl AgentsConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }
}

impl Default for OnboardConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            store: StoreKind::default(),
            bus: BusConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            agents: AgentsConfig::default(),
            manifests: Vec::new(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_health_interval_secs() -> u64 {
    30
}

impl OnboardConfig {
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads the config file. A missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Self::parse(&content).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file '{}': {e}", path.display())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file '{}': {e}",
                path.display()
            )),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("onboard.db")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = OnboardConfig::parse("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.bus, BusConfig::default());
        assert_eq!(config.orchestrator.retry.max_attempts, 3);
        assert!(!config.agents.direct_scheduling);
        assert_eq!(config.agents.health_interval(), Duration::from_secs(30));
        assert!(config.manifests.is_empty());
        assert_eq!(config.database_path(), PathBuf::from("./data/onboard.db"));
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = OnboardConfig::parse(
            r#"
            data_dir = "/tmp/onboard"
            store = "memory"

            [bus]
            direct_timeout_ms = 250

            [orchestrator.retry]
            backoff_base_ms = 100

            [agents]
            direct_scheduling = true

            [[manifests]]
            agent_id = "validator"
            transport = { mode = "sync" }
            methods = [{ name = "validate", input_schema_ref = "employee_draft", output_schema_ref = "validation_report" }]
            "#,
        )
        .unwrap();
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.bus.direct_timeout_ms, 250);
        assert_eq!(config.bus.max_redeliveries, 3);
        assert_eq!(config.orchestrator.retry.backoff_base_ms, 100);
        assert_eq!(config.orchestrator.retry.backoff_max_ms, 30_000);
        assert_eq!(config.orchestrator.step_timeout_ms, 30_000);
        assert!(config.agents.direct_scheduling);
        assert_eq!(config.manifests.len(), 1);
        assert!(config.manifests[0].accepts("validate"));
    }

    #[test]
    fn test_unknown_store_rejected() {
        assert!(OnboardConfig::parse(r#"store = "postgres""#).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = OnboardConfig::load(&dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config.store, StoreKind::Sqlite);
    }
}
