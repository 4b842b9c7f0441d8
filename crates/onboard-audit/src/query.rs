use chrono::{DateTime, Utc};
use onboard_core::{ErrorKind, StepRecord, StepStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Criteria for [`crate::AuditTrail::search`]. Unset fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub workflow_id: Option<Uuid>,
    pub agent_id: Option<String>,
    pub action: Option<String>,
    pub status: Option<StepStatus>,
    pub since: Option<DateTime<Utc>>,
    /// Keep only the newest `limit` matches.
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn workflow(id: Uuid) -> Self {
        Self {
            workflow_id: Some(id),
            ..Self::default()
        }
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn status(mut self, status: StepStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, record: &StepRecord) -> bool {
        self.workflow_id.map_or(true, |id| record.workflow_id == id)
            && self
                .agent_id
                .as_deref()
                .map_or(true, |a| record.agent_id == a)
            && self.action.as_deref().map_or(true, |a| record.action == a)
            && self.status.map_or(true, |s| record.status == s)
            && self.since.map_or(true, |t| record.timestamp >= t)
    }
}

/// Per-agent execution metrics derived from the trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub agent_id: String,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, 0 when there are no records.
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    /// Failure counts keyed by error kind.
    pub error_kinds: BTreeMap<String, usize>,
}

impl AgentPerformance {
    pub(crate) fn from_records<'a>(
        agent_id: &str,
        records: impl Iterator<Item = &'a StepRecord>,
    ) -> Self {
        let mut perf = AgentPerformance {
            agent_id: agent_id.to_string(),
            ..Default::default()
        };
        let mut total_ms: u64 = 0;
        let mut min_ms = u64::MAX;

        for record in records {
            perf.total += 1;
            total_ms += record.duration_ms;
            min_ms = min_ms.min(record.duration_ms);
            perf.max_duration_ms = perf.max_duration_ms.max(record.duration_ms);
            if record.is_success() {
                perf.successful += 1;
            } else {
                perf.failed += 1;
                let kind = record
                    .error
                    .as_ref()
                    .map_or_else(|| "unknown".to_string(), |e| e.kind.to_string());
                *perf.error_kinds.entry(kind).or_insert(0) += 1;
            }
        }

        if perf.total > 0 {
            perf.success_rate = perf.successful as f64 / perf.total as f64 * 100.0;
            perf.avg_duration_ms = total_ms as f64 / perf.total as f64;
            perf.min_duration_ms = min_ms;
        }
        perf
    }

    pub fn error_count(&self, kind: ErrorKind) -> usize {
        self.error_kinds.get(&kind.to_string()).copied().unwrap_or(0)
    }
}

/// Ordered history of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrace {
    pub workflow_id: Uuid,
    pub records: Vec<StepRecord>,
    pub successful: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
}

impl WorkflowTrace {
    pub(crate) fn new(workflow_id: Uuid, records: Vec<StepRecord>) -> Self {
        let successful = records.iter().filter(|r| r.is_success()).count();
        let total_duration_ms = records.iter().map(|r| r.duration_ms).sum();
        Self {
            workflow_id,
            failed: records.len() - successful,
            successful,
            total_duration_ms,
            records,
        }
    }

    /// Actions in record order.
    pub fn actions(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.action.as_str()).collect()
    }

    /// The last failure, which explains why a failed workflow stopped.
    pub fn last_failure(&self) -> Option<&StepRecord> {
        self.records.iter().rev().find(|r| !r.is_success())
    }
}
