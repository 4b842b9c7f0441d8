use crate::error::{OnboardResult, WireError};
use crate::payload::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Deadline applied when the sender does not set one.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Bus envelope. This is also the queue wire format:
/// `{id, method, params, source_agent, target_agent?, correlation_id, attempt, deadline}`.
///
/// `id` stays the same across re-deliveries of one logical send; `attempt`
/// counts them. Consumers use `(id, attempt)` to detect duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique per logical send, reused across redeliveries.
    pub id: Uuid,
    /// Method name, e.g. `validate`.
    pub method: String,
    /// Method params; checked against the method's schema by the bus.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Sender agent id, or `orchestrator`.
    pub source_agent: String,
    /// `None` broadcasts to every agent that accepts `method`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent: Option<String>,
    /// Ties the message back to its owning workflow.
    pub correlation_id: Uuid,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    /// Delivery must finish before this instant.
    pub deadline: DateTime<Utc>,
}

impl Message {
    /// Creates a broadcast message (no target) with a fresh id, attempt 1 and
    /// the default deadline.
    pub fn new(
        source_agent: impl Into<String>,
        method: impl Into<String>,
        params: serde_json::Value,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            method: method.into(),
            params,
            source_agent: source_agent.into(),
            target_agent: None,
            correlation_id,
            attempt: 1,
            deadline: deadline_after(DEFAULT_DEADLINE),
        }
    }

    /// Creates a message carrying a typed payload.
    pub fn request(
        source_agent: impl Into<String>,
        payload: &Payload,
        correlation_id: Uuid,
    ) -> OnboardResult<Self> {
        Ok(Self::new(
            source_agent,
            payload.method(),
            payload.to_params()?,
            correlation_id,
        ))
    }

    /// Addresses the message to one agent.
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.target_agent = Some(target.into());
        self
    }

    /// Replaces the message id.
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Sets the attempt counter.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sets the deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(deadline_after(timeout))
    }

    /// The same message delivered again: same id, next attempt.
    pub fn redelivery(&self) -> Self {
        let mut next = self.clone();
        next.attempt += 1;
        next
    }

    /// A copy addressed to a single broadcast recipient.
    pub fn for_target(&self, target: &str) -> Self {
        let mut copy = self.clone();
        copy.target_agent = Some(target.to_string());
        copy
    }

    /// Time left before the deadline, `None` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        (self.deadline - Utc::now()).to_std().ok()
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }

    /// Typed view of `params`, validated against `method`.
    pub fn payload(&self) -> Result<Payload, crate::AgentError> {
        Payload::parse(&self.method, &self.params)
    }
}

fn deadline_after(timeout: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365));
    Utc::now() + delta
}

/// Wire response: `{id, result}` on success, `{id, error: {kind, message}}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the message answered.
    pub id: Uuid,
    /// Agent output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error detail on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    /// Successful response.
    pub fn ok(id: Uuid, result: serde_json::Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response.
    pub fn err(id: Uuid, error: WireError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Whether the response carries no error.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// A response with neither field set counts as a `null` result.
    pub fn into_result(self) -> Result<serde_json::Value, WireError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}
