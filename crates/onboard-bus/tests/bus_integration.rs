#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for routing, fallback, dedup and dead-lettering.

use async_trait::async_trait;
use onboard_audit::{AuditFilter, AuditTrail};
use onboard_bus::{BusConfig, Completion, CompletionListener, MessageBus, SendOptions, SendOutcome};
use onboard_core::{
    Agent, AgentError, AgentInput, DirectCaller, EmployeeDraft, ErrorKind, Message, OnboardError,
    Payload, StepStatus, ValidateParams, ORCHESTRATOR,
};
use onboard_registry::{AgentManifest, AgentRegistry, TransportMode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct TestAgent {
    id: &'static str,
    delay: Duration,
    fail: Option<AgentError>,
    calls: AtomicU32,
    seen: Mutex<Vec<(Uuid, u32)>>,
}

impl TestAgent {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            delay: Duration::ZERO,
            fail: None,
            calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self, err: AgentError) -> Self {
        self.fail = Some(err);
        self
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for TestAgent {
    fn id(&self) -> &str {
        self.id
    }

    async fn process(&self, input: AgentInput) -> Result<serde_json::Value, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push((input.message_id, input.attempt));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.fail {
            Some(err) => Err(err.clone()),
            None => Ok(serde_json::json!({ "handled_by": self.id })),
        }
    }
}

fn setup(config: BusConfig) -> (Arc<AgentRegistry>, Arc<AuditTrail>, Arc<MessageBus>) {
    let registry = Arc::new(AgentRegistry::new());
    let audit = Arc::new(AuditTrail::new());
    let bus = Arc::new(MessageBus::new(registry.clone(), audit.clone(), config));
    (registry, audit, bus)
}

fn register(registry: &AgentRegistry, agent: Arc<TestAgent>, mode: TransportMode, targets: &[&str]) {
    let mut manifest = AgentManifest::new(agent.id, mode).method("validate");
    for t in targets {
        manifest = manifest.allow_direct(*t);
    }
    registry.register(manifest, agent).unwrap();
}

fn validate_payload() -> Payload {
    Payload::Validate(ValidateParams {
        employee: EmployeeDraft::default(),
    })
}

fn message(source: &str, target: &str, workflow: Uuid) -> Message {
    Message::request(source, &validate_payload(), workflow)
        .unwrap()
        .to(target)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_direct_call_records_before_reply() {
    let (registry, audit, bus) = setup(BusConfig::default());
    let agent = Arc::new(TestAgent::new("validator"));
    register(&registry, agent.clone(), TransportMode::Sync, &[]);

    let wf = Uuid::new_v4();
    let outcome = bus
        .send(message(ORCHESTRATOR, "validator", wf), SendOptions::default())
        .await
        .unwrap();
    let SendOutcome::Replied(response) = outcome else {
        panic!("expected a direct reply");
    };
    assert!(response.is_ok());
    let records = audit.for_workflow(wf);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, StepStatus::Success);
    assert_eq!(records[0].agent_id, "validator");
    assert_eq!(agent.calls(), 1);
}

#[tokio::test]
async fn test_unauthorized_direct_call_is_forbidden() {
    let (registry, audit, bus) = setup(BusConfig::default());
    let scheduler = Arc::new(TestAgent::new("scheduler"));
    let notifier = Arc::new(TestAgent::new("notifier"));
    let account = Arc::new(TestAgent::new("account_setup"));
    register(&registry, scheduler.clone(), TransportMode::Sync, &[]);
    register(&registry, notifier.clone(), TransportMode::Sync, &[]);
    register(&registry, account, TransportMode::Sync, &["scheduler"]);

    let wf = Uuid::new_v4();
    let err = bus
        .invoke("account_setup", "notifier", validate_payload(), wf)
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardError::DirectCallForbidden { .. }));
    assert_eq!(notifier.calls(), 0);
    let records = audit.for_workflow(wf);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, StepStatus::Failure);
    assert_eq!(records[0].error.as_ref().unwrap().kind, ErrorKind::DirectCallForbidden);

    bus.invoke("account_setup", "scheduler", validate_payload(), wf)
        .await
        .unwrap();
    assert_eq!(scheduler.calls(), 1);
}

#[tokio::test]
async fn test_malformed_payload_rejected_before_agent() {
    let (registry, audit, bus) = setup(BusConfig::default());
    let agent = Arc::new(TestAgent::new("validator"));
    register(&registry, agent.clone(), TransportMode::Sync, &[]);

    let wf = Uuid::new_v4();
    let msg = Message::new(ORCHESTRATOR, "validate", serde_json::json!({"employee": 42}), wf)
        .to("validator");
    let response = bus.request(msg, SendOptions::default()).await.unwrap();
    assert_eq!(response.error.unwrap().kind, ErrorKind::InvalidInput);
    assert_eq!(agent.calls(), 0);
    assert_eq!(audit.for_workflow(wf).len(), 1);
}

#[tokio::test]
async fn test_timeout_falls_back_to_queue_with_one_record() {
    let config = BusConfig {
        direct_timeout_ms: 50,
        ..BusConfig::default()
    };
    let (registry, audit, bus) = setup(config);
    let agent = Arc::new(TestAgent::new("validator").slow(Duration::from_millis(150)));
    register(&registry, agent.clone(), TransportMode::Sync, &[]);

    let wf = Uuid::new_v4();
    let outcome = bus
        .send(message(ORCHESTRATOR, "validator", wf), SendOptions::default())
        .await
        .unwrap();
    assert!(outcome.is_queued());
    assert!(audit.for_workflow(wf).is_empty());

    let response = outcome.into_response().await.unwrap();
    assert!(response.is_ok());
    let records = audit.for_workflow(wf);
    assert_eq!(records.len(), 1);
    assert!(records[0].is_success());
}

#[tokio::test]
async fn test_timeout_without_fallback_fails() {
    let config = BusConfig {
        direct_timeout_ms: 30,
        ..BusConfig::default()
    };
    let (registry, audit, bus) = setup(config);
    let agent = Arc::new(TestAgent::new("account_setup").slow(Duration::from_millis(200)));
    register(&registry, agent, TransportMode::Sync, &[]);

    let wf = Uuid::new_v4();
    let response = bus
        .request(message(ORCHESTRATOR, "account_setup", wf), SendOptions::sync_only())
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().kind, ErrorKind::DeadlineExceeded);
    assert_eq!(bus.queue_depth("account_setup"), 0);
    assert_eq!(audit.for_workflow(wf).len(), 1);
}

#[tokio::test]
async fn test_queue_preserves_send_order() {
    let (registry, _audit, bus) = setup(BusConfig::default());
    let agent = Arc::new(TestAgent::new("notifier"));
    register(&registry, agent.clone(), TransportMode::Queue, &[]);

    let wf = Uuid::new_v4();
    let mut ids = Vec::new();
    let mut receipts = Vec::new();
    for _ in 0..5 {
        let msg = message(ORCHESTRATOR, "notifier", wf);
        ids.push(msg.id);
        receipts.push(bus.send(msg, SendOptions::default()).await.unwrap());
    }
    for outcome in receipts {
        assert!(outcome.into_response().await.unwrap().is_ok());
    }
    let seen: Vec<Uuid> = agent.seen.lock().iter().map(|(id, _)| *id).collect();
    assert_eq!(seen, ids);
}

#[tokio::test]
async fn test_busy_lane_queues_later_direct_sends() {
    let config = BusConfig {
        direct_timeout_ms: 40,
        ..BusConfig::default()
    };
    let (registry, _audit, bus) = setup(config);
    let agent = Arc::new(TestAgent::new("scheduler").slow(Duration::from_millis(120)));
    register(&registry, agent.clone(), TransportMode::Sync, &[]);

    let wf = Uuid::new_v4();
    let first = message(ORCHESTRATOR, "scheduler", wf);
    let second = message(ORCHESTRATOR, "scheduler", wf);
    let (first_id, second_id) = (first.id, second.id);

    let a = bus.send(first, SendOptions::default()).await.unwrap();
    assert!(a.is_queued());
    let b = bus.send(second, SendOptions::default()).await.unwrap();
    assert!(b.is_queued());
    a.into_response().await.unwrap();
    b.into_response().await.unwrap();

    let seen: Vec<Uuid> = agent.seen.lock().iter().map(|(id, _)| *id).collect();
    assert_eq!(seen[seen.len() - 2..], [first_id, second_id]);
}

#[tokio::test]
async fn test_unavailable_agent_only_gets_queued() {
    let (registry, _audit, bus) = setup(BusConfig::default());
    let agent = Arc::new(TestAgent::new("scheduler"));
    register(&registry, agent.clone(), TransportMode::Sync, &[]);
    registry.mark_unavailable("scheduler");

    let outcome = bus
        .send(message(ORCHESTRATOR, "scheduler", Uuid::new_v4()), SendOptions::default())
        .await
        .unwrap();
    assert!(outcome.is_queued());
    assert!(outcome.into_response().await.unwrap().is_ok());

    // Disabling fallback does not refuse a queue-only route.
    let outcome = bus
        .send(
            message(ORCHESTRATOR, "scheduler", Uuid::new_v4()),
            SendOptions::sync_only(),
        )
        .await
        .unwrap();
    assert!(outcome.is_queued());
    assert!(outcome.into_response().await.unwrap().is_ok());
    assert_eq!(agent.calls(), 2);
}

#[tokio::test]
async fn test_invoke_refuses_orchestrator_source() {
    let (registry, audit, bus) = setup(BusConfig::default());
    let agent = Arc::new(TestAgent::new("validator"));
    register(&registry, agent.clone(), TransportMode::Sync, &[]);

    let err = bus
        .invoke(ORCHESTRATOR, "validator", validate_payload(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardError::DirectCallForbidden { .. }));
    assert_eq!(agent.calls(), 0);
    assert!(audit.is_empty());
}

#[tokio::test]
async fn test_redelivery_of_same_attempt_is_deduplicated() {
    let (registry, audit, bus) = setup(BusConfig::default());
    let agent = Arc::new(TestAgent::new("account_setup"));
    register(&registry, agent.clone(), TransportMode::Sync, &[]);

    let wf = Uuid::new_v4();
    let msg = message(ORCHESTRATOR, "account_setup", wf);
    let first = bus.request(msg.clone(), SendOptions::default()).await.unwrap();
    let second = bus.request(msg.clone(), SendOptions::default()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(agent.calls(), 1);

    let records = audit.for_workflow(wf);
    assert_eq!(records.len(), 2);
    assert!(!records[0].deduplicated);
    assert!(records[1].deduplicated);

    bus.request(msg.redelivery(), SendOptions::default()).await.unwrap();
    assert_eq!(agent.calls(), 2);
}

#[tokio::test]
async fn test_fire_and_forget_exhaustion_dead_letters() {
    let config = BusConfig {
        max_redeliveries: 3,
        redelivery_delay_ms: 5,
        ..BusConfig::default()
    };
    let (registry, audit, bus) = setup(config);
    let agent = Arc::new(
        TestAgent::new("notifier").failing(AgentError::TransientFailure("smtp down".into())),
    );
    register(&registry, agent.clone(), TransportMode::Queue, &[]);

    let wf = Uuid::new_v4();
    let msg = message(ORCHESTRATOR, "notifier", wf);
    let id = msg.id;
    drop(bus.send(msg, SendOptions::default()).await.unwrap());

    eventually(|| !bus.dead_letters().is_empty()).await;
    let letters = bus.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].message.id, id);
    assert_eq!(letters[0].message.attempt, 3);
    assert_eq!(agent.calls(), 3);

    let attempts: Vec<u32> = audit.for_workflow(wf).iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_expired_queued_message_dead_letters() {
    let (registry, audit, bus) = setup(BusConfig::default());
    let agent = Arc::new(TestAgent::new("notifier").slow(Duration::from_millis(80)));
    register(&registry, agent.clone(), TransportMode::Queue, &[]);

    let wf = Uuid::new_v4();
    let blocker = message(ORCHESTRATOR, "notifier", wf);
    let late = message(ORCHESTRATOR, "notifier", wf).with_timeout(Duration::from_millis(20));
    let a = bus.send(blocker, SendOptions::default()).await.unwrap();
    let b = bus.send(late, SendOptions::default()).await.unwrap();
    assert!(a.into_response().await.unwrap().is_ok());
    let response = b.into_response().await.unwrap();
    assert_eq!(response.error.unwrap().kind, ErrorKind::DeadlineExceeded);
    assert_eq!(agent.calls(), 1);
    assert_eq!(bus.dead_letters().len(), 1);
    assert_eq!(
        audit.count(&AuditFilter::workflow(wf).status(StepStatus::Failure)),
        1
    );
}

#[tokio::test]
async fn test_broadcast_reaches_every_interested_agent() {
    let (registry, audit, bus) = setup(BusConfig::default());
    let a = Arc::new(TestAgent::new("validator"));
    let b = Arc::new(TestAgent::new("shadow_validator"));
    register(&registry, a.clone(), TransportMode::Sync, &[]);
    register(&registry, b.clone(), TransportMode::Queue, &[]);

    let wf = Uuid::new_v4();
    let msg = Message::request(ORCHESTRATOR, &validate_payload(), wf).unwrap();
    let SendOutcome::Broadcast(deliveries) = bus.send(msg, SendOptions::default()).await.unwrap()
    else {
        panic!("expected broadcast");
    };
    assert_eq!(deliveries.len(), 2);
    for delivery in deliveries {
        let response = delivery.outcome.unwrap().into_response().await.unwrap();
        assert!(response.is_ok());
    }
    assert_eq!(a.calls() + b.calls(), 2);
    assert_eq!(audit.for_workflow(wf).len(), 2);
}

struct RecordingListener {
    audit: Arc<AuditTrail>,
    closed: Option<Uuid>,
    seen: Mutex<Vec<(Completion, usize)>>,
}

#[async_trait]
impl CompletionListener for RecordingListener {
    async fn on_completion(&self, completion: &Completion) {
        let recorded = self.audit.for_workflow(completion.correlation_id).len();
        self.seen.lock().push((completion.clone(), recorded));
    }

    async fn is_closed(&self, correlation_id: Uuid) -> bool {
        self.closed == Some(correlation_id)
    }
}

#[tokio::test]
async fn test_listener_sees_completion_after_record() {
    let (registry, audit, bus) = setup(BusConfig::default());
    let account = Arc::new(TestAgent::new("account_setup"));
    let scheduler = Arc::new(TestAgent::new("scheduler"));
    register(&registry, account, TransportMode::Sync, &["scheduler"]);
    register(&registry, scheduler, TransportMode::Sync, &[]);
    let listener = Arc::new(RecordingListener {
        audit: audit.clone(),
        closed: None,
        seen: Mutex::new(Vec::new()),
    });
    bus.set_listener(listener.clone());

    let wf = Uuid::new_v4();
    bus.invoke("account_setup", "scheduler", validate_payload(), wf)
        .await
        .unwrap();
    let seen = listener.seen.lock();
    assert_eq!(seen.len(), 1);
    let (completion, recorded) = &seen[0];
    assert!(completion.is_success());
    assert_eq!(completion.source_agent, "account_setup");
    assert_eq!(completion.agent_id, "scheduler");
    assert_eq!(*recorded, 1);
}

#[tokio::test]
async fn test_closed_workflow_delivery_is_a_no_op() {
    let (registry, audit, bus) = setup(BusConfig::default());
    let agent = Arc::new(TestAgent::new("scheduler"));
    register(&registry, agent.clone(), TransportMode::Sync, &[]);
    let wf = Uuid::new_v4();
    bus.set_listener(Arc::new(RecordingListener {
        audit: audit.clone(),
        closed: Some(wf),
        seen: Mutex::new(Vec::new()),
    }));

    let response = bus
        .request(message(ORCHESTRATOR, "scheduler", wf), SendOptions::default())
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(agent.calls(), 0);
    assert_eq!(audit.for_workflow(wf).len(), 1);
}

#[tokio::test]
async fn test_shutdown_rejects_sends_and_clears_registry() {
    let (registry, _audit, bus) = setup(BusConfig::default());
    register(&registry, Arc::new(TestAgent::new("validator")), TransportMode::Sync, &[]);
    let handle = bus.handle();

    bus.shutdown();
    assert!(registry.is_empty());
    let err = bus
        .send(message(ORCHESTRATOR, "validator", Uuid::new_v4()), SendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardError::Bus(_)));

    drop(bus);
    let err = handle
        .call("account_setup", "scheduler", validate_payload(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, OnboardError::Bus(_)));
}
