use crate::error::{ErrorKind, OnboardError, WireError};
use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Identifier the orchestrator uses as `source_agent` on the messages it sends.
pub const ORCHESTRATOR: &str = "orchestrator";
/// Built-in validator agent.
pub const VALIDATOR: &str = "validator";
/// Built-in account setup agent.
pub const ACCOUNT_SETUP: &str = "account_setup";
/// Built-in scheduler agent.
pub const SCHEDULER: &str = "scheduler";
/// Built-in notifier agent.
pub const NOTIFIER: &str = "notifier";

// --- Employee ---

/// Onboarding status of an employee, mirrored from the workflow outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    /// Stored, onboarding not started.
    Pending,
    /// A workflow is running.
    InProgress,
    /// The last workflow completed.
    Completed,
    /// The last workflow failed.
    Failed,
}

/// Employee identity fields as submitted by the CRUD layer, before validation.
///
/// Every field defaults to empty so a record with missing fields still reaches
/// the validator, which reports all of them at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeDraft {
    /// Full name.
    #[serde(default)]
    pub name: String,
    /// Work email address.
    #[serde(default)]
    pub email: String,
    /// Job title.
    #[serde(default)]
    pub role: String,
    /// Department name.
    #[serde(default)]
    pub department: String,
    /// Start date as submitted; the validator parses it.
    #[serde(default)]
    pub start_date: String,
}

/// An employee record. Owned by the CRUD layer; the core only updates `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    /// Stable employee id.
    pub id: Uuid,
    /// Full name.
    pub name: String,
    /// Work email address.
    pub email: String,
    /// Job title.
    pub role: String,
    /// Department name.
    pub department: String,
    /// Start date as submitted.
    pub start_date: String,
    /// Onboarding status.
    pub status: EmployeeStatus,
    /// When the record was stored.
    pub created_at: DateTime<Utc>,
}

impl Employee {
    /// A `pending` employee from a draft, with a fresh id.
    pub fn new(draft: EmployeeDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            email: draft.email,
            role: draft.role,
            department: draft.department,
            start_date: draft.start_date,
            status: EmployeeStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// The identity fields as a draft, for handing to the validator.
    pub fn draft(&self) -> EmployeeDraft {
        EmployeeDraft {
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            department: self.department.clone(),
            start_date: self.start_date.clone(),
        }
    }
}

// --- Workflow ---

/// The fixed step sequence. Ordering follows declaration order, so `<` means
/// "earlier in the pipeline".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Check and clean the employee record.
    Validate,
    /// Create the user account.
    AccountSetup,
    /// Book the onboarding events.
    Schedule,
    /// Send the onboarding notifications.
    Notify,
    /// Every step has run.
    Done,
}

impl WorkflowStep {
    /// The four executable steps in order.
    pub const PIPELINE: [WorkflowStep; 4] = [
        WorkflowStep::Validate,
        WorkflowStep::AccountSetup,
        WorkflowStep::Schedule,
        WorkflowStep::Notify,
    ];

    /// The step that follows this one. `Done` is its own successor.
    pub fn next(self) -> WorkflowStep {
        match self {
            WorkflowStep::Validate => WorkflowStep::AccountSetup,
            WorkflowStep::AccountSetup => WorkflowStep::Schedule,
            WorkflowStep::Schedule => WorkflowStep::Notify,
            WorkflowStep::Notify | WorkflowStep::Done => WorkflowStep::Done,
        }
    }

    /// The step before this one, `None` for `Validate`.
    pub fn previous(self) -> Option<WorkflowStep> {
        match self {
            WorkflowStep::Validate => None,
            WorkflowStep::AccountSetup => Some(WorkflowStep::Validate),
            WorkflowStep::Schedule => Some(WorkflowStep::AccountSetup),
            WorkflowStep::Notify => Some(WorkflowStep::Schedule),
            WorkflowStep::Done => Some(WorkflowStep::Notify),
        }
    }

    /// Agent that executes this step.
    pub fn agent_id(self) -> Option<&'static str> {
        match self {
            WorkflowStep::Validate => Some(VALIDATOR),
            WorkflowStep::AccountSetup => Some(ACCOUNT_SETUP),
            WorkflowStep::Schedule => Some(SCHEDULER),
            WorkflowStep::Notify => Some(NOTIFIER),
            WorkflowStep::Done => None,
        }
    }

    /// Bus method that executes this step. Also the StepRecord `action`.
    pub fn method(self) -> Option<&'static str> {
        match self {
            WorkflowStep::Done => None,
            step => Some(step.as_str()),
        }
    }

    /// Inverse of [`WorkflowStep::method`].
    pub fn from_method(method: &str) -> Option<WorkflowStep> {
        match method {
            "validate" => Some(WorkflowStep::Validate),
            "account_setup" => Some(WorkflowStep::AccountSetup),
            "schedule" => Some(WorkflowStep::Schedule),
            "notify" => Some(WorkflowStep::Notify),
            _ => None,
        }
    }

    /// Wire and method name of the step.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStep::Validate => "validate",
            WorkflowStep::AccountSetup => "account_setup",
            WorkflowStep::Schedule => "schedule",
            WorkflowStep::Notify => "notify",
            WorkflowStep::Done => "done",
        }
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStep {
    type Err = OnboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "done" => Ok(WorkflowStep::Done),
            other => WorkflowStep::from_method(other)
                .ok_or_else(|| OnboardError::Store(format!("unknown workflow step '{other}'"))),
        }
    }
}

/// Persisted workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Created, not yet dispatched.
    Started,
    /// Steps are being dispatched.
    Running,
    /// Terminal: every step succeeded.
    Completed,
    /// Terminal: a step failed or the workflow was cancelled.
    Failed,
}

impl WorkflowStatus {
    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
    }

    /// Lower-case name used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Started => "started",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = OnboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(WorkflowStatus::Started),
            "running" => Ok(WorkflowStatus::Running),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            other => Err(OnboardError::Store(format!(
                "unknown workflow status '{other}'"
            ))),
        }
    }
}

/// State-machine view derived from `(status, current_step)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// Created, not yet dispatched.
    Started,
    /// Running `validate`.
    Validating,
    /// Running `account_setup`.
    AccountSetup,
    /// Running `schedule`.
    Scheduling,
    /// Running `notify`.
    Notifying,
    /// Every step succeeded.
    Completed,
    /// Stopped on a failure or cancellation.
    Failed,
}

/// Why a workflow ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Step that was running when the workflow failed.
    pub step: WorkflowStep,
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl FailureReason {
    /// A failure at `step`.
    pub fn new(step: WorkflowStep, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            step,
            kind,
            message: message.into(),
        }
    }

    /// The reason recorded by a cancellation.
    pub fn cancelled(step: WorkflowStep) -> Self {
        Self::new(step, ErrorKind::Cancelled, "Cancelled")
    }
}

/// Precondition for a compare-and-set on a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Apply only if the workflow is still at this step and not terminal.
    Step(WorkflowStep),
    /// Apply if the workflow is not terminal, whatever its step.
    NonTerminal,
}

/// A state change requested through compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `started -> running` without moving the step.
    Start,
    /// Move `current_step` forward. Advancing to `Done` completes the workflow.
    Advance(WorkflowStep),
    /// Terminal failure.
    Fail(FailureReason),
}

/// One onboarding attempt for one employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow id; also the correlation id of its messages.
    pub id: Uuid,
    /// Employee being onboarded.
    pub employee_id: Uuid,
    /// Next step to run.
    pub current_step: WorkflowStep,
    /// Lifecycle status.
    pub status: WorkflowStatus,
    /// Set once the workflow fails.
    #[serde(default)]
    pub failure: Option<FailureReason>,
    /// Bumped on every applied transition.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last applied transition.
    pub updated_at: DateTime<Utc>,
    /// Set when the workflow reaches a terminal status.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// A `started` workflow at `validate`.
    pub fn new(employee_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            employee_id,
            current_step: WorkflowStep::Validate,
            status: WorkflowStatus::Started,
            failure: None,
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// `completed` or `failed`.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// State-machine view of `(status, current_step)`.
    pub fn state(&self) -> WorkflowState {
        match self.status {
            WorkflowStatus::Completed => WorkflowState::Completed,
            WorkflowStatus::Failed => WorkflowState::Failed,
            WorkflowStatus::Started => WorkflowState::Started,
            WorkflowStatus::Running => match self.current_step {
                WorkflowStep::Validate => WorkflowState::Validating,
                WorkflowStep::AccountSetup => WorkflowState::AccountSetup,
                WorkflowStep::Schedule => WorkflowState::Scheduling,
                WorkflowStep::Notify => WorkflowState::Notifying,
                WorkflowStep::Done => WorkflowState::Completed,
            },
        }
    }

    /// Apply `transition` if `expect` holds. Returns whether anything changed.
    ///
    /// Terminal workflows reject everything. Steps only move forward.
    /// Stores call this inside their single critical section so the check and
    /// the write are one atomic step.
    pub fn apply(&mut self, expect: Expect, transition: &Transition) -> bool {
        if self.is_terminal() {
            return false;
        }
        if let Expect::Step(step) = expect {
            if self.current_step != step {
                return false;
            }
        }

        let now = Utc::now();
        match transition {
            Transition::Start => {
                if self.status != WorkflowStatus::Started {
                    return false;
                }
                self.status = WorkflowStatus::Running;
            }
            Transition::Advance(to) => {
                if *to <= self.current_step {
                    return false;
                }
                self.current_step = *to;
                if *to == WorkflowStep::Done {
                    self.status = WorkflowStatus::Completed;
                    self.completed_at = Some(now);
                } else {
                    self.status = WorkflowStatus::Running;
                }
            }
            Transition::Fail(reason) => {
                self.status = WorkflowStatus::Failed;
                self.failure = Some(reason.clone());
                self.completed_at = Some(now);
            }
        }
        self.version += 1;
        self.updated_at = now;
        true
    }
}

// --- Audit ---

/// Outcome of one invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// The agent returned a result.
    Success,
    /// The attempt failed.
    Failure,
}

/// Immutable audit entry for one invocation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Record id.
    pub id: Uuid,
    /// Owning workflow (the message correlation id).
    pub workflow_id: Uuid,
    /// Id of the message delivered.
    pub message_id: Uuid,
    /// Agent that handled (or would have handled) the message.
    pub agent_id: String,
    /// Agent that sent the message.
    pub source_agent: String,
    /// Method name, e.g. `validate`.
    pub action: String,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    /// Message params as sent.
    pub input: serde_json::Value,
    /// Agent result on success.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    /// Outcome of the attempt.
    pub status: StepStatus,
    /// Error detail on failure.
    #[serde(default)]
    pub error: Option<WireError>,
    /// Time spent delivering.
    pub duration_ms: u64,
    /// Answered from the delivery ledger instead of re-invoking the agent.
    #[serde(default)]
    pub deduplicated: bool,
    /// When the record was written.
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    fn from_message(message: &Message, agent_id: &str, duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: message.correlation_id,
            message_id: message.id,
            agent_id: agent_id.to_string(),
            source_agent: message.source_agent.clone(),
            action: message.method.clone(),
            attempt: message.attempt,
            input: message.params.clone(),
            output: None,
            status: StepStatus::Success,
            error: None,
            duration_ms,
            deduplicated: false,
            timestamp: Utc::now(),
        }
    }

    /// Record of a successful attempt.
    pub fn success(
        message: &Message,
        agent_id: &str,
        output: serde_json::Value,
        duration_ms: u64,
    ) -> Self {
        let mut record = Self::from_message(message, agent_id, duration_ms);
        record.output = Some(output);
        record
    }

    /// Record of a failed attempt.
    pub fn failure(message: &Message, agent_id: &str, error: WireError, duration_ms: u64) -> Self {
        let mut record = Self::from_message(message, agent_id, duration_ms);
        record.status = StepStatus::Failure;
        record.error = Some(error);
        record
    }

    /// Flags the record as answered from the delivery ledger.
    pub fn deduplicated(mut self) -> Self {
        self.deduplicated = true;
        self
    }

    /// Whether the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_step_sequence() {
        assert_eq!(WorkflowStep::Validate.next(), WorkflowStep::AccountSetup);
        assert_eq!(WorkflowStep::Notify.next(), WorkflowStep::Done);
        assert_eq!(WorkflowStep::Done.next(), WorkflowStep::Done);
        assert!(WorkflowStep::Schedule < WorkflowStep::Notify);
        assert_eq!(WorkflowStep::Schedule.agent_id(), Some(SCHEDULER));
        assert_eq!(WorkflowStep::Done.method(), None);
    }

    #[test]
    fn test_step_parse_roundtrip() {
        for step in WorkflowStep::PIPELINE {
            assert_eq!(step.as_str().parse::<WorkflowStep>().unwrap(), step);
        }
        assert!("onboard".parse::<WorkflowStep>().is_err());
    }

    #[test]
    fn test_advance_requires_expected_step() {
        let mut wf = Workflow::new(Uuid::new_v4());
        assert!(!wf.apply(
            Expect::Step(WorkflowStep::AccountSetup),
            &Transition::Advance(WorkflowStep::Schedule)
        ));
        assert!(wf.apply(
            Expect::Step(WorkflowStep::Validate),
            &Transition::Advance(WorkflowStep::AccountSetup)
        ));
        assert_eq!(wf.current_step, WorkflowStep::AccountSetup);
        assert_eq!(wf.status, WorkflowStatus::Running);
        assert_eq!(wf.version, 1);
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let mut wf = Workflow::new(Uuid::new_v4());
        wf.current_step = WorkflowStep::Notify;
        assert!(!wf.apply(
            Expect::NonTerminal,
            &Transition::Advance(WorkflowStep::Schedule)
        ));
        assert_eq!(wf.current_step, WorkflowStep::Notify);
    }

    #[test]
    fn test_advance_to_done_completes() {
        let mut wf = Workflow::new(Uuid::new_v4());
        wf.current_step = WorkflowStep::Notify;
        assert!(wf.apply(
            Expect::Step(WorkflowStep::Notify),
            &Transition::Advance(WorkflowStep::Done)
        ));
        assert_eq!(wf.status, WorkflowStatus::Completed);
        assert_eq!(wf.state(), WorkflowState::Completed);
        assert!(wf.completed_at.is_some());
    }

    #[test]
    fn test_terminal_rejects_everything() {
        let mut wf = Workflow::new(Uuid::new_v4());
        assert!(wf.apply(
            Expect::NonTerminal,
            &Transition::Fail(FailureReason::cancelled(WorkflowStep::Validate))
        ));
        let version = wf.version;
        assert!(!wf.apply(Expect::NonTerminal, &Transition::Start));
        assert!(!wf.apply(
            Expect::Step(WorkflowStep::Validate),
            &Transition::Advance(WorkflowStep::AccountSetup)
        ));
        assert_eq!(wf.version, version);
        assert_eq!(wf.failure.unwrap().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_state_view() {
        let mut wf = Workflow::new(Uuid::new_v4());
        assert_eq!(wf.state(), WorkflowState::Started);
        wf.apply(Expect::NonTerminal, &Transition::Start);
        assert_eq!(wf.state(), WorkflowState::Validating);
        wf.current_step = WorkflowStep::Schedule;
        assert_eq!(wf.state(), WorkflowState::Scheduling);
    }

    #[test]
    fn test_employee_draft_defaults_missing_fields() {
        let draft: EmployeeDraft =
            serde_json::from_str(r#"{"name":"Ada Lovelace","role":"Engineer"}"#).unwrap();
        assert_eq!(draft.email, "");
        assert_eq!(draft.role, "Engineer");
    }
}
