use async_trait::async_trait;
use onboard_core::{Message, Response};
use uuid::Uuid;

/// Outcome of one recorded delivery, handed to the [`CompletionListener`]
/// after the audit record exists.
#[derive(Debug, Clone)]
pub struct Completion {
    pub message_id: Uuid,
    pub correlation_id: Uuid,
    pub source_agent: String,
    pub agent_id: String,
    pub method: String,
    pub attempt: u32,
    /// `Some` on success.
    pub output: Option<serde_json::Value>,
}

impl Completion {
    pub(crate) fn new(message: &Message, agent_id: &str, response: &Response) -> Self {
        Self {
            message_id: message.id,
            correlation_id: message.correlation_id,
            source_agent: message.source_agent.clone(),
            agent_id: agent_id.to_string(),
            method: message.method.clone(),
            attempt: message.attempt,
            output: if response.is_ok() {
                response.result.clone()
            } else {
                None
            },
        }
    }

    pub fn is_success(&self) -> bool {
        self.output.is_some()
    }
}

/// Receives correlated completions so workflow state can react to calls the
/// orchestrator did not make itself.
///
/// Implemented by the orchestrator crate; the bus holds it behind a trait so
/// the two crates do not depend on each other.
#[async_trait]
pub trait CompletionListener: Send + Sync {
    async fn on_completion(&self, completion: &Completion);

    /// Whether the owning workflow is terminal. Deliveries for a closed
    /// workflow are recorded as `cancelled` without invoking the agent.
    async fn is_closed(&self, _correlation_id: Uuid) -> bool {
        false
    }
}
