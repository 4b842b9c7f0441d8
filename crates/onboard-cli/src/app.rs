use crate::config::{OnboardConfig, StoreKind};
use onboard_agents::{
    builtin_manifests, register_with_manifests, BuiltinOptions, InMemoryEffects, SideEffects,
};
use onboard_audit::AuditTrail;
use onboard_bus::MessageBus;
use onboard_core::{Employee, EmployeeDraft, FailureReason, StepStatus};
use onboard_orchestrator::{
    EmployeeStore, InMemoryEmployeeStore, InMemoryWorkflowStore, Orchestrator, SqliteStore,
    WorkflowStore,
};
use onboard_registry::{AgentManifest, AgentRegistry, HealthMonitor};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// A fully wired onboarding service.
pub struct App {
    pub registry: Arc<AgentRegistry>,
    pub bus: Arc<MessageBus>,
    pub orchestrator: Orchestrator,
    pub effects: Arc<InMemoryEffects>,
    health: JoinHandle<()>,
}

/// The manifests the service registers: the configured ones, or the
/// built-in set.
pub fn effective_manifests(config: &OnboardConfig) -> Vec<AgentManifest> {
    if config.manifests.is_empty() {
        builtin_manifests()
    } else {
        config.manifests.clone()
    }
}

impl App {
    pub async fn build(config: &OnboardConfig, direct_scheduling: bool) -> anyhow::Result<Self> {
        let registry = Arc::new(AgentRegistry::new());
        let audit = Arc::new(match config.store {
            StoreKind::Memory => AuditTrail::new(),
            StoreKind::Sqlite => AuditTrail::with_jsonl(&config.data_dir),
        });
        let bus = Arc::new(MessageBus::new(
            registry.clone(),
            audit,
            config.bus.clone(),
        ));

        let effects = Arc::new(InMemoryEffects::new());
        let side_effects: Arc<dyn SideEffects> = effects.clone();
        let options = BuiltinOptions {
            direct_scheduling: direct_scheduling || config.agents.direct_scheduling,
        };
        register_with_manifests(
            &registry,
            effective_manifests(config),
            side_effects,
            bus.handle(),
            options,
        )?;
        info!(
            agents = registry.len(),
            direct_scheduling = options.direct_scheduling,
            "agents registered"
        );

        let (employees, workflows): (Arc<dyn EmployeeStore>, Arc<dyn WorkflowStore>) =
            match config.store {
                StoreKind::Memory => (
                    Arc::new(InMemoryEmployeeStore::new()),
                    Arc::new(InMemoryWorkflowStore::new()),
                ),
                StoreKind::Sqlite => {
                    let path = config.database_path();
                    let store = Arc::new(SqliteStore::open(&path)?);
                    info!(path = %path.display(), "sqlite store opened");
                    (store.clone(), store)
                }
            };

        let orchestrator =
            Orchestrator::new(bus.clone(), employees, workflows, config.orchestrator.clone());
        let health =
            HealthMonitor::new(registry.clone(), config.agents.health_interval()).spawn();

        Ok(Self {
            registry,
            bus,
            orchestrator,
            effects,
            health,
        })
    }

    /// Stores every draft, starts its workflow, waits for all of them and
    /// summarizes each outcome in input order.
    pub async fn run_batch(&self, drafts: Vec<EmployeeDraft>) -> anyhow::Result<Vec<RunSummary>> {
        let mut ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let employee = Employee::new(draft);
            self.orchestrator.employees().insert(&employee).await?;
            ids.push((employee.id, employee.name));
        }

        let employee_ids: Vec<Uuid> = ids.iter().map(|(id, _)| *id).collect();
        let bulk = self.orchestrator.start_bulk(&employee_ids).await;

        let mut summaries = Vec::with_capacity(ids.len());
        for (employee_id, name) in ids {
            let started = bulk
                .started
                .iter()
                .find(|(e, _)| *e == employee_id)
                .map(|(_, w)| *w);
            let Some(workflow_id) = started else {
                let reason = bulk
                    .rejected
                    .iter()
                    .find(|(e, _)| *e == employee_id)
                    .map(|(_, r)| r.clone())
                    .unwrap_or_default();
                summaries.push(RunSummary::rejected(employee_id, name, reason));
                continue;
            };

            self.orchestrator.wait_for(workflow_id).await?;
            let view = self.orchestrator.get_workflow(workflow_id).await?;
            summaries.push(RunSummary {
                employee_id,
                name,
                workflow_id: Some(workflow_id),
                status: view.workflow.status.as_str().to_string(),
                current_step: Some(view.workflow.current_step.to_string()),
                failure: view.workflow.failure,
                steps: view
                    .step_records
                    .iter()
                    .map(|r| StepLine {
                        action: r.action.clone(),
                        agent: r.agent_id.clone(),
                        source: r.source_agent.clone(),
                        attempt: r.attempt,
                        status: r.status,
                        deduplicated: r.deduplicated,
                    })
                    .collect(),
                rejected: None,
            });
        }
        self.bus.audit().flush().await;
        Ok(summaries)
    }

    pub async fn shutdown(self) {
        self.health.abort();
        self.orchestrator.shutdown();
        self.bus.shutdown();
        self.bus.audit().flush().await;
    }
}

/// One line of `onboard run` output.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub employee_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<Uuid>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub steps: Vec<StepLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

impl RunSummary {
    fn rejected(employee_id: Uuid, name: String, reason: String) -> Self {
        Self {
            employee_id,
            name,
            workflow_id: None,
            status: "rejected".into(),
            current_step: None,
            failure: None,
            steps: Vec::new(),
            rejected: Some(reason),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepLine {
    pub action: String,
    pub agent: String,
    pub source: String,
    pub attempt: u32,
    pub status: StepStatus,
    pub deduplicated: bool,
}

/// Reads a JSON array of employee drafts.
pub async fn read_drafts(path: &Path) -> anyhow::Result<Vec<EmployeeDraft>> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read input file '{}': {e}", path.display())
    })?;
    Ok(serde_json::from_str(&content)?)
}
