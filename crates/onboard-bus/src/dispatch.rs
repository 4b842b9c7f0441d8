use crate::completion::{Completion, CompletionListener};
use crate::config::BusConfig;
use crate::ledger::DeliveryLedger;
use crate::queue::{DeadLetter, DeadLetterQueue, Lanes};
use chrono::Utc;
use onboard_audit::AuditTrail;
use onboard_core::{
    AgentError, AgentInput, ErrorKind, Message, Response, StepRecord, WireError,
};
use onboard_registry::AgentRegistry;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub(crate) enum Delivery {
    Done(Response),
    /// The direct attempt ran out of time. Nothing was recorded.
    TimedOut,
}

/// Shared delivery core used by the direct path and by every queue worker.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) audit: Arc<AuditTrail>,
    pub(crate) ledger: Arc<DeliveryLedger>,
    pub(crate) lanes: Arc<Lanes>,
    pub(crate) dead_letters: Arc<DeadLetterQueue>,
    pub(crate) listener: Arc<RwLock<Option<Arc<dyn CompletionListener>>>>,
    pub(crate) config: Arc<BusConfig>,
}

impl Dispatcher {
    /// Invokes `agent_id` once for `message` and records the outcome.
    ///
    /// The audit record is written, then the ledger entry, then the listener
    /// is notified; only then does the caller get the response.
    pub(crate) async fn deliver(
        &self,
        message: &Message,
        agent_id: &str,
        limit: Option<Duration>,
    ) -> Delivery {
        let started = Instant::now();

        if let Some(cached) = self.ledger.get(message, agent_id) {
            debug!(
                message_id = %message.id,
                attempt = message.attempt,
                agent = %agent_id,
                "duplicate delivery answered from ledger"
            );
            let record = match cached.clone().into_result() {
                Ok(output) => StepRecord::success(message, agent_id, output, 0),
                Err(error) => StepRecord::failure(message, agent_id, error, 0),
            };
            self.audit.record(record.deduplicated());
            return Delivery::Done(cached);
        }

        if self.is_closed(message).await {
            info!(
                workflow_id = %message.correlation_id,
                agent = %agent_id,
                method = %message.method,
                "workflow closed, delivery skipped"
            );
            let error = WireError::new(ErrorKind::Cancelled, "workflow is already terminal");
            return Delivery::Done(self.fail(message, agent_id, error, started));
        }

        let input = match AgentInput::from_message(message) {
            Ok(input) => input,
            Err(e) => return Delivery::Done(self.complete(message, agent_id, Err(e), started).await),
        };
        let Some(handler) = self.registry.handler(agent_id) else {
            let error = WireError::new(
                ErrorKind::InvalidInput,
                format!("agent '{agent_id}' is not registered"),
            );
            return Delivery::Done(self.fail(message, agent_id, error, started));
        };

        let result = match limit {
            Some(limit) => match tokio::time::timeout(limit, handler.process(input)).await {
                Ok(result) => result,
                Err(_) => return Delivery::TimedOut,
            },
            None => handler.process(input).await,
        };
        Delivery::Done(self.complete(message, agent_id, result, started).await)
    }

    /// Queue-side delivery: deadline enforcement, redelivery of fire-and-forget
    /// messages, dead-lettering.
    pub(crate) async fn deliver_queued(
        &self,
        mut message: Message,
        agent_id: &str,
        reply: &oneshot::Sender<Response>,
    ) -> Response {
        loop {
            let started = Instant::now();
            let Some(remaining) = message.remaining() else {
                let error = WireError::new(ErrorKind::DeadlineExceeded, "deadline passed while queued");
                let response = self.fail(&message, agent_id, error, started);
                self.dead_letter(message, agent_id, "deadline exceeded");
                return response;
            };

            let response = match self.deliver(&message, agent_id, Some(remaining)).await {
                Delivery::Done(response) => response,
                Delivery::TimedOut => {
                    let error = WireError::new(
                        ErrorKind::DeadlineExceeded,
                        format!("'{agent_id}' did not answer before the deadline"),
                    );
                    self.fail(&message, agent_id, error, started)
                }
            };

            let retryable = response.error.as_ref().is_some_and(|e| e.kind.is_retryable());
            // Someone awaits the receipt: they own the retry decision.
            if !retryable || !reply.is_closed() {
                return response;
            }
            if message.attempt >= self.config.max_redeliveries || message.is_expired() {
                let reason = format!("gave up after attempt {}", message.attempt);
                self.dead_letter(message, agent_id, reason);
                return response;
            }
            debug!(
                message_id = %message.id,
                agent = %agent_id,
                attempt = message.attempt,
                delay_ms = self.config.redelivery_delay_ms,
                "redelivering"
            );
            tokio::time::sleep(self.config.redelivery_delay()).await;
            message = message.redelivery();
        }
    }

    async fn complete(
        &self,
        message: &Message,
        agent_id: &str,
        result: Result<serde_json::Value, AgentError>,
        started: Instant,
    ) -> Response {
        let duration_ms = elapsed_ms(started);
        let (record, response) = match result {
            Ok(output) => (
                StepRecord::success(message, agent_id, output.clone(), duration_ms),
                Response::ok(message.id, output),
            ),
            Err(err) => {
                let wire = WireError::from(&err);
                (
                    StepRecord::failure(message, agent_id, wire.clone(), duration_ms),
                    Response::err(message.id, wire),
                )
            }
        };
        self.audit.record(record);
        self.ledger.insert(message, agent_id, response.clone());

        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener
                .on_completion(&Completion::new(message, agent_id, &response))
                .await;
        }
        response
    }

    /// Records a failure that never reached the agent.
    pub(crate) fn fail(
        &self,
        message: &Message,
        agent_id: &str,
        error: WireError,
        started: Instant,
    ) -> Response {
        self.audit.record(StepRecord::failure(
            message,
            agent_id,
            error.clone(),
            elapsed_ms(started),
        ));
        Response::err(message.id, error)
    }

    async fn is_closed(&self, message: &Message) -> bool {
        let listener = self.listener.read().clone();
        match listener {
            Some(listener) => listener.is_closed(message.correlation_id).await,
            None => false,
        }
    }

    fn dead_letter(&self, message: Message, agent_id: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(
            message_id = %message.id,
            workflow_id = %message.correlation_id,
            agent = %agent_id,
            reason = %reason,
            "message dead-lettered"
        );
        if self.config.dead_letter_enabled {
            self.dead_letters.push(DeadLetter {
                message,
                target: agent_id.to_string(),
                reason,
                dead_at: Utc::now(),
            });
        }
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
