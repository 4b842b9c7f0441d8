use crate::error::{AgentError, OnboardResult};
use crate::message::Message;
use crate::payload::Payload;
use async_trait::async_trait;
use uuid::Uuid;

/// What an agent receives for one delivery.
///
/// The payload has already been validated against the method's schema by the
/// bus. `message_id` and `attempt` identify the delivery; `correlation_id` is
/// the owning workflow and is the key idempotent side effects are scoped by.
#[derive(Debug, Clone)]
pub struct AgentInput {
    /// Id of the delivered message.
    pub message_id: Uuid,
    /// Owning workflow.
    pub correlation_id: Uuid,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    /// Sender agent id.
    pub source_agent: String,
    /// Typed, schema-checked params.
    pub payload: Payload,
}

impl AgentInput {
    /// Builds the input for `message`, rejecting malformed params.
    pub fn from_message(message: &Message) -> Result<Self, AgentError> {
        Ok(Self {
            message_id: message.id,
            correlation_id: message.correlation_id,
            attempt: message.attempt,
            source_agent: message.source_agent.clone(),
            payload: message.payload()?,
        })
    }
}

/// The uniform step contract.
///
/// An agent is a step function over its declared input and output shape. It
/// knows nothing about workflow state; retry and failure decisions belong to
/// the orchestrator.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Registry identifier.
    fn id(&self) -> &str;

    async fn process(&self, input: AgentInput) -> Result<serde_json::Value, AgentError>;

    /// Polled by the registry health monitor.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Handle agents use to call another agent directly through the bus.
///
/// Implemented by the bus crate; kept here so agents do not depend on it.
#[async_trait]
pub trait DirectCaller: Send + Sync {
    async fn call(
        &self,
        source: &str,
        target: &str,
        payload: Payload,
        correlation_id: Uuid,
    ) -> OnboardResult<serde_json::Value>;
}
