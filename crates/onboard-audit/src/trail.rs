use crate::query::{AgentPerformance, AuditFilter, WorkflowTrace};
use crate::sink::JsonlSink;
use onboard_core::StepRecord;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Append-only record of every invocation attempt.
///
/// [`AuditTrail::record`] is synchronous: once it returns the record is
/// visible to every reader, which is what lets the bus write the audit entry
/// before it replies. An optional JSONL mirror is written in the background.
pub struct AuditTrail {
    records: RwLock<Vec<StepRecord>>,
    sink: Option<JsonlSink>,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditTrail {
    /// In-memory trail.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            sink: None,
        }
    }

    /// Trail mirrored to `<dir>/audit.jsonl`. Spawns the writer task, so it
    /// must be called inside a tokio runtime.
    pub fn with_jsonl(dir: &Path) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            sink: Some(JsonlSink::spawn(dir)),
        }
    }

    pub fn jsonl_path(&self) -> Option<PathBuf> {
        self.sink.as_ref().map(|s| s.path().to_path_buf())
    }

    pub fn record(&self, record: StepRecord) {
        info!(
            workflow_id = %record.workflow_id,
            agent = %record.agent_id,
            action = %record.action,
            attempt = record.attempt,
            status = ?record.status,
            deduplicated = record.deduplicated,
            duration_ms = record.duration_ms,
            "step recorded"
        );
        if let Some(sink) = &self.sink {
            sink.append(&record);
        }
        self.records.write().push(record);
    }

    /// Waits until every record appended so far has reached the JSONL file.
    pub async fn flush(&self) {
        if let Some(sink) = &self.sink {
            sink.flush().await;
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn all(&self) -> Vec<StepRecord> {
        self.records.read().clone()
    }

    /// Records for one workflow in append order.
    pub fn for_workflow(&self, workflow_id: Uuid) -> Vec<StepRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .cloned()
            .collect()
    }

    /// Records belonging to any of `workflow_ids`, in append order. Used to
    /// collect an employee's history across onboarding attempts.
    pub fn for_workflows(&self, workflow_ids: &[Uuid]) -> Vec<StepRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| workflow_ids.contains(&r.workflow_id))
            .cloned()
            .collect()
    }

    pub fn trace(&self, workflow_id: Uuid) -> WorkflowTrace {
        WorkflowTrace::new(workflow_id, self.for_workflow(workflow_id))
    }

    /// The most recent successful record for `action` in a workflow. The
    /// orchestrator reads step outputs from here when building later payloads.
    pub fn latest_success(&self, workflow_id: Uuid, action: &str) -> Option<StepRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .find(|r| r.workflow_id == workflow_id && r.action == action && r.is_success())
            .cloned()
    }

    pub fn count(&self, filter: &AuditFilter) -> usize {
        self.records.read().iter().filter(|r| filter.matches(r)).count()
    }

    pub fn search(&self, filter: &AuditFilter) -> Vec<StepRecord> {
        let records = self.records.read();
        let mut hits: Vec<StepRecord> = records.iter().filter(|r| filter.matches(r)).cloned().collect();
        if let Some(limit) = filter.limit {
            let skip = hits.len().saturating_sub(limit);
            hits.drain(..skip);
        }
        hits
    }

    pub fn agent_performance(&self, agent_id: &str) -> AgentPerformance {
        let records = self.records.read();
        AgentPerformance::from_records(agent_id, records.iter().filter(|r| r.agent_id == agent_id))
    }

    /// Distinct agent ids in first-seen order.
    pub fn agents(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for record in self.records.read().iter() {
            if !seen.contains(&record.agent_id) {
                seen.push(record.agent_id.clone());
            }
        }
        seen
    }
}
