use onboard_core::{OnboardError, OnboardResult, Payload};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the bus reaches an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Synchronous endpoint, called directly with a bounded deadline.
    Sync,
    /// Only reachable through its delivery queue.
    Queue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    pub mode: TransportMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// Failed a health check. The bus routes to its queue only.
    Unavailable,
}

/// One accepted method and the schemas its input and output follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    pub input_schema_ref: String,
    pub output_schema_ref: String,
}

impl MethodSpec {
    /// A method with the conventional schema references.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            input_schema_ref: format!("onboard.{name}.params.v1"),
            output_schema_ref: format!("onboard.{name}.result.v1"),
            name,
        }
    }
}

/// Structured declaration of what an agent accepts, how to reach it, and
/// which agents it may call directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentManifest {
    pub agent_id: String,
    pub methods: Vec<MethodSpec>,
    pub transport: Transport,
    #[serde(default)]
    pub allowed_direct_targets: Vec<String>,
    #[serde(default)]
    pub health: HealthStatus,
}

impl AgentManifest {
    pub fn new(agent_id: impl Into<String>, mode: TransportMode) -> Self {
        Self {
            agent_id: agent_id.into(),
            methods: Vec::new(),
            transport: Transport {
                mode,
                endpoint: None,
            },
            allowed_direct_targets: Vec::new(),
            health: HealthStatus::Healthy,
        }
    }

    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.methods.push(MethodSpec::new(name));
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.transport.endpoint = Some(endpoint.into());
        self
    }

    pub fn allow_direct(mut self, target: impl Into<String>) -> Self {
        self.allowed_direct_targets.push(target.into());
        self
    }

    pub fn accepts(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.name == method)
    }

    pub fn may_call(&self, target: &str) -> bool {
        self.allowed_direct_targets.iter().any(|t| t == target)
    }

    /// Checks the fields registration depends on.
    pub fn validate(&self) -> OnboardResult<()> {
        if self.agent_id.trim().is_empty() {
            return Err(invalid("agent_id is required"));
        }
        if self.methods.is_empty() {
            return Err(invalid(format!(
                "agent '{}' declares no methods",
                self.agent_id
            )));
        }
        for method in &self.methods {
            if method.name.trim().is_empty() {
                return Err(invalid(format!(
                    "agent '{}' has a method without a name",
                    self.agent_id
                )));
            }
            if !Payload::METHODS.contains(&method.name.as_str()) {
                return Err(invalid(format!(
                    "agent '{}' declares method '{}' with no known schema",
                    self.agent_id, method.name
                )));
            }
            if method.input_schema_ref.trim().is_empty()
                || method.output_schema_ref.trim().is_empty()
            {
                return Err(invalid(format!(
                    "method '{}' of agent '{}' is missing a schema reference",
                    method.name, self.agent_id
                )));
            }
        }
        if self.may_call(&self.agent_id) {
            return Err(invalid(format!(
                "agent '{}' lists itself as a direct-call target",
                self.agent_id
            )));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> OnboardError {
    OnboardError::ManifestInvalid(msg.into())
}

/// On-disk manifest document: `agents = [...]` in TOML, or a JSON object with
/// an `agents` array. A bare JSON array is accepted too.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ManifestFile {
    #[serde(default)]
    pub agents: Vec<AgentManifest>,
}

/// Parses manifests from TOML text. Missing required fields surface as
/// `ManifestInvalid`.
pub fn parse_toml(content: &str) -> OnboardResult<Vec<AgentManifest>> {
    let file: ManifestFile = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;
    checked(file.agents)
}

/// Parses manifests from JSON text.
pub fn parse_json(content: &str) -> OnboardResult<Vec<AgentManifest>> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
    let agents: Vec<AgentManifest> = if value.is_array() {
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?
    } else {
        let file: ManifestFile = serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        file.agents
    };
    checked(agents)
}

/// Loads a `.toml` or `.json` manifest file.
pub fn load_manifests(path: &Path) -> OnboardResult<Vec<AgentManifest>> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_json(&content),
        Some("toml") => parse_toml(&content),
        other => Err(OnboardError::Config(format!(
            "unsupported manifest format: {}",
            other.unwrap_or("<none>")
        ))),
    }
}

fn checked(agents: Vec<AgentManifest>) -> OnboardResult<Vec<AgentManifest>> {
    for manifest in &agents {
        manifest.validate()?;
    }
    Ok(agents)
}
