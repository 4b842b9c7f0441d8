use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A convenience `Result` alias using [`OnboardError`].
pub type OnboardResult<T> = Result<T, OnboardError>;

/// Top-level error type for the onboarding pipeline.
///
/// Each variant corresponds to a failure class the core can produce. Step-level
/// agent failures are carried in [`OnboardError::Agent`].
#[derive(Debug, thiserror::Error)]
pub enum OnboardError {
    /// A step agent reported a failure.
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// A manifest is missing required fields or is malformed.
    #[error("Manifest invalid: {0}")]
    ManifestInvalid(String),

    /// The registry allow-list does not permit `caller` to call `target` directly.
    #[error("Direct call forbidden: {caller} -> {target}")]
    DirectCallForbidden {
        /// Agent that attempted the call.
        caller: String,
        /// Agent that was called.
        target: String,
    },

    /// No agent with this identifier is registered.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// The agent is registered but does not accept the method.
    #[error("Agent '{agent}' does not accept method '{method}'")]
    UnsupportedMethod {
        /// Target agent.
        agent: String,
        /// Requested method.
        method: String,
    },

    /// No employee record exists for the identifier.
    #[error("Employee not found: {0}")]
    EmployeeNotFound(Uuid),

    /// No workflow record exists for the identifier.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// The employee already has a non-terminal workflow.
    #[error("Workflow {workflow_id} is already active for employee {employee_id}")]
    WorkflowAlreadyActive {
        /// Employee that was asked to start onboarding.
        employee_id: Uuid,
        /// The workflow that is still running.
        workflow_id: Uuid,
    },

    /// The workflow reached `completed` or `failed` and accepts no transitions.
    #[error("Workflow {0} is in a terminal state")]
    WorkflowTerminal(Uuid),

    /// A delivery-level failure inside the message bus.
    #[error("Bus error: {0}")]
    Bus(String),

    /// A persistence failure in an employee or workflow store.
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// An internal orchestrator failure (e.g. a workflow task panicked).
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OnboardError {
    /// The wire-visible error kind, where one applies.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            OnboardError::Agent(e) => Some(e.kind()),
            OnboardError::DirectCallForbidden { .. } => Some(ErrorKind::DirectCallForbidden),
            OnboardError::UnknownAgent(_) | OnboardError::UnsupportedMethod { .. } => {
                Some(ErrorKind::InvalidInput)
            }
            _ => None,
        }
    }
}

/// Failure reported by a step agent.
///
/// Agents never see cross-step failures; the orchestrator decides between retry
/// and terminal failure based on [`AgentError::is_retryable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AgentError {
    /// Malformed or missing input fields. Not retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A downstream dependency is unavailable. Retried with backoff.
    #[error("transient failure: {0}")]
    TransientFailure(String),
    /// A business rule rejected the request. Not retried.
    #[error("permanent failure: {0}")]
    PermanentFailure(String),
}

impl AgentError {
    /// Whether the orchestrator should retry the step.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::TransientFailure(_))
    }

    /// The wire kind for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::InvalidInput(_) => ErrorKind::InvalidInput,
            AgentError::TransientFailure(_) => ErrorKind::TransientFailure,
            AgentError::PermanentFailure(_) => ErrorKind::PermanentFailure,
        }
    }

    /// The human-readable detail.
    pub fn message(&self) -> &str {
        match self {
            AgentError::InvalidInput(m)
            | AgentError::TransientFailure(m)
            | AgentError::PermanentFailure(m) => m,
        }
    }
}

/// Every error kind that can appear in a wire response or a StepRecord.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input. Not retried.
    InvalidInput,
    /// A dependency was unavailable. Retried.
    TransientFailure,
    /// Business-rule rejection. Not retried.
    PermanentFailure,
    /// The allow-list forbids the direct call.
    DirectCallForbidden,
    /// No answer before the deadline. Retried.
    DeadlineExceeded,
    /// The workflow was cancelled or already terminal.
    Cancelled,
}

impl ErrorKind {
    /// Only transient failures and missed deadlines are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientFailure | ErrorKind::DeadlineExceeded)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::TransientFailure => "transient_failure",
            ErrorKind::PermanentFailure => "permanent_failure",
            ErrorKind::DirectCallForbidden => "direct_call_forbidden",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Error object carried in a wire response: `{kind, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl WireError {
    /// A wire error of `kind`.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&AgentError> for WireError {
    fn from(err: &AgentError) -> Self {
        Self::new(err.kind(), err.message())
    }
}

impl From<WireError> for AgentError {
    /// Kinds outside the agent taxonomy collapse onto the closest retry class.
    fn from(err: WireError) -> Self {
        match err.kind {
            ErrorKind::InvalidInput => AgentError::InvalidInput(err.message),
            ErrorKind::TransientFailure | ErrorKind::DeadlineExceeded => {
                AgentError::TransientFailure(err.message)
            }
            ErrorKind::PermanentFailure
            | ErrorKind::DirectCallForbidden
            | ErrorKind::Cancelled => AgentError::PermanentFailure(err.message),
        }
    }
}
