use crate::completion::CompletionListener;
use crate::config::BusConfig;
use crate::dispatch::{Delivery, Dispatcher};
use crate::ledger::DeliveryLedger;
use crate::queue::{run_worker, DeadLetter, DeadLetterQueue, DeliveryReceipt, Lanes, QueueItem};
use async_trait::async_trait;
use onboard_audit::AuditTrail;
use onboard_core::{
    AgentError, DirectCaller, ErrorKind, Message, OnboardError, OnboardResult, Payload, Response,
    WireError, ORCHESTRATOR,
};
use onboard_registry::AgentRegistry;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-send delivery options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Re-queue the message when the direct call times out. Disable for calls
    /// that must not outlive their deadline. Queue-only targets are still
    /// queued; the caller awaits the receipt either way.
    pub allow_fallback: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            allow_fallback: true,
        }
    }
}

impl SendOptions {
    pub fn sync_only() -> Self {
        Self {
            allow_fallback: false,
        }
    }
}

/// What [`MessageBus::send`] did with a message.
#[derive(Debug)]
pub enum SendOutcome {
    /// Delivered directly; the audit record already exists.
    Replied(Response),
    /// Accepted for queued delivery.
    Queued(DeliveryReceipt),
    /// Fanned out to every interested agent.
    Broadcast(Vec<BroadcastDelivery>),
}

impl SendOutcome {
    /// Waits for the single response of a targeted send.
    pub async fn into_response(self) -> OnboardResult<Response> {
        match self {
            SendOutcome::Replied(response) => Ok(response),
            SendOutcome::Queued(receipt) => receipt.wait().await,
            SendOutcome::Broadcast(_) => Err(OnboardError::Bus(
                "a broadcast has no single response".into(),
            )),
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued(_))
    }
}

/// One recipient's share of a broadcast.
#[derive(Debug)]
pub struct BroadcastDelivery {
    pub target: String,
    pub outcome: OnboardResult<SendOutcome>,
}

/// Routes messages between the orchestrator and agents, and between agents.
///
/// Targeted messages go to a healthy synchronous agent directly under a
/// bounded deadline, otherwise into the target's FIFO queue. Every path
/// writes exactly one [`onboard_core::StepRecord`] per invocation attempt
/// before the caller sees a result. Delivery is at-least-once.
pub struct MessageBus {
    dispatcher: Dispatcher,
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<QueueItem>>>,
    closed: AtomicBool,
}

impl MessageBus {
    pub fn new(registry: Arc<AgentRegistry>, audit: Arc<AuditTrail>, config: BusConfig) -> Self {
        Self {
            dispatcher: Dispatcher {
                registry,
                audit,
                ledger: Arc::new(DeliveryLedger::new()),
                lanes: Arc::new(Lanes::default()),
                dead_letters: Arc::new(DeadLetterQueue::default()),
                listener: Arc::new(RwLock::new(None)),
                config: Arc::new(config),
            },
            queues: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Installs the listener notified after every recorded delivery.
    pub fn set_listener(&self, listener: Arc<dyn CompletionListener>) {
        *self.dispatcher.listener.write() = Some(listener);
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.dispatcher.registry
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.dispatcher.audit
    }

    pub fn ledger(&self) -> &Arc<DeliveryLedger> {
        &self.dispatcher.ledger
    }

    pub fn config(&self) -> &BusConfig {
        &self.dispatcher.config
    }

    /// A direct-call handle for agents. Holds the bus weakly so agents
    /// registered in the bus's own registry do not keep it alive.
    pub fn handle(self: &Arc<Self>) -> Arc<dyn DirectCaller> {
        Arc::new(BusHandle {
            bus: Arc::downgrade(self),
        })
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dispatcher.dead_letters.snapshot()
    }

    /// Removes and returns every dead letter.
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter> {
        self.dispatcher.dead_letters.drain()
    }

    /// Messages queued for `target` and not yet delivered.
    pub fn queue_depth(&self, target: &str) -> usize {
        self.dispatcher.lanes.depth(target)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn send(&self, message: Message, options: SendOptions) -> OnboardResult<SendOutcome> {
        if self.is_closed() {
            return Err(OnboardError::Bus("bus is shut down".into()));
        }
        match message.target_agent.clone() {
            Some(target) => self.send_to(message, &target, options).await,
            None => self.broadcast(message, options).await,
        }
    }

    /// Sends and waits for the response, whichever path delivers it.
    pub async fn request(&self, message: Message, options: SendOptions) -> OnboardResult<Response> {
        self.send(message, options).await?.into_response().await
    }

    /// Direct agent call entry point. Agent failures come back as
    /// [`OnboardError::Agent`].
    pub async fn invoke(
        &self,
        source: &str,
        target: &str,
        payload: Payload,
        correlation_id: Uuid,
    ) -> OnboardResult<serde_json::Value> {
        if source == ORCHESTRATOR {
            warn!(agent = %target, "direct call under the orchestrator's identity refused");
            return Err(OnboardError::DirectCallForbidden {
                caller: source.to_string(),
                target: target.to_string(),
            });
        }
        let message = Message::request(source, &payload, correlation_id)?.to(target);
        let response = self.request(message, SendOptions::default()).await?;
        response
            .into_result()
            .map_err(|e| OnboardError::Agent(AgentError::from(e)))
    }

    async fn send_to(
        &self,
        message: Message,
        target: &str,
        options: SendOptions,
    ) -> OnboardResult<SendOutcome> {
        let started = Instant::now();
        let d = &self.dispatcher;

        if message.source_agent != ORCHESTRATOR
            && !d.registry.authorize_direct_call(&message.source_agent, target)
        {
            let error = WireError::new(
                ErrorKind::DirectCallForbidden,
                format!("{} may not call {target} directly", message.source_agent),
            );
            d.fail(&message, target, error, started);
            return Err(OnboardError::DirectCallForbidden {
                caller: message.source_agent,
                target: target.to_string(),
            });
        }

        let descriptor = match d.registry.resolve(target, &message.method) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                d.fail(
                    &message,
                    target,
                    WireError::new(ErrorKind::InvalidInput, e.to_string()),
                    started,
                );
                return Err(e);
            }
        };

        if let Err(e) = message.payload() {
            warn!(message_id = %message.id, method = %message.method, error = %e, "payload rejected");
            return Ok(SendOutcome::Replied(d.fail(
                &message,
                target,
                WireError::from(&e),
                started,
            )));
        }

        let Some(remaining) = message.remaining() else {
            let error = WireError::new(ErrorKind::DeadlineExceeded, "deadline passed before send");
            return Ok(SendOutcome::Replied(d.fail(&message, target, error, started)));
        };

        let lane_busy = d.lanes.is_busy(&message.source_agent, target);
        if descriptor.is_direct() && !lane_busy {
            let limit = remaining.min(d.config.direct_timeout());
            match d.deliver(&message, target, Some(limit)).await {
                Delivery::Done(response) => return Ok(SendOutcome::Replied(response)),
                Delivery::TimedOut if options.allow_fallback => {
                    warn!(
                        message_id = %message.id,
                        agent = %target,
                        timeout_ms = limit.as_millis() as u64,
                        "direct call timed out, falling back to queue"
                    );
                }
                Delivery::TimedOut => {
                    let error = WireError::new(
                        ErrorKind::DeadlineExceeded,
                        format!("{target} did not answer within {}ms", limit.as_millis()),
                    );
                    return Ok(SendOutcome::Replied(d.fail(&message, target, error, started)));
                }
            }
        } else {
            debug!(
                message_id = %message.id,
                agent = %target,
                mode = ?descriptor.mode,
                health = ?descriptor.health,
                lane_busy,
                "routing to queue"
            );
        }

        self.enqueue(message, target).map(SendOutcome::Queued)
    }

    async fn broadcast(&self, message: Message, options: SendOptions) -> OnboardResult<SendOutcome> {
        let targets: Vec<String> = self
            .dispatcher
            .registry
            .interested_in(&message.method)
            .into_iter()
            .filter(|t| *t != message.source_agent)
            .collect();
        if targets.is_empty() {
            return Err(OnboardError::Bus(format!(
                "no agent accepts method '{}'",
                message.method
            )));
        }
        info!(method = %message.method, recipients = targets.len(), "broadcasting");

        let mut deliveries = Vec::with_capacity(targets.len());
        for target in targets {
            let outcome = self
                .send_to(message.for_target(&target), &target, options)
                .await;
            deliveries.push(BroadcastDelivery { target, outcome });
        }
        Ok(SendOutcome::Broadcast(deliveries))
    }

    fn enqueue(&self, message: Message, target: &str) -> OnboardResult<DeliveryReceipt> {
        let (tx, rx) = oneshot::channel();
        let receipt = DeliveryReceipt::new(message.id, target.to_string(), rx);
        let source = message.source_agent.clone();

        let mut queues = self.queues.lock();
        let sender = queues.entry(target.to_string()).or_insert_with(|| {
            let (qtx, qrx) = mpsc::unbounded_channel();
            tokio::spawn(run_worker(self.dispatcher.clone(), target.to_string(), qrx));
            qtx
        });
        self.dispatcher.lanes.enter(&source, target);
        if sender.send(QueueItem { message, reply: tx }).is_err() {
            self.dispatcher.lanes.leave(&source, target);
            queues.remove(target);
            return Err(OnboardError::Bus(format!("queue for '{target}' is closed")));
        }
        Ok(receipt)
    }

    /// Closes every queue and tears down the registry. Workers finish what is
    /// already queued, then stop.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let queues = std::mem::take(&mut *self.queues.lock());
        info!(queues = queues.len(), "message bus shutting down");
        drop(queues);
        self.dispatcher.registry.clear();
    }
}

/// [`DirectCaller`] backed by a weak reference to the bus.
struct BusHandle {
    bus: Weak<MessageBus>,
}

#[async_trait]
impl DirectCaller for BusHandle {
    async fn call(
        &self,
        source: &str,
        target: &str,
        payload: Payload,
        correlation_id: Uuid,
    ) -> OnboardResult<serde_json::Value> {
        let bus = self
            .bus
            .upgrade()
            .ok_or_else(|| OnboardError::Bus("bus is shut down".into()))?;
        bus.invoke(source, target, payload, correlation_id).await
    }
}
