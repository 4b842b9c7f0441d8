use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use onboard_core::AgentError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

/// Idempotency key for an external effect: `(workflow, step, item)`.
///
/// `item` distinguishes several effects of one step, e.g. the three calendar
/// events of `schedule`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectKey {
    pub workflow_id: Uuid,
    pub step: String,
    pub item: String,
}

impl EffectKey {
    pub fn new(workflow_id: Uuid, step: &str, item: impl Into<String>) -> Self {
        Self {
            workflow_id,
            step: step.to_string(),
            item: item.into(),
        }
    }
}

/// An externally visible action. The integrations behind these are opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    CreateAccount {
        username: String,
        email: String,
        permissions: Vec<String>,
    },
    CreateEvent {
        title: String,
        start_time: NaiveDateTime,
        end_time: NaiveDateTime,
        attendees: Vec<String>,
    },
    SendEmail {
        to: String,
        #[serde(default)]
        cc: Vec<String>,
        subject: String,
        body: String,
    },
    PostChat {
        channel: String,
        text: String,
    },
}

impl Effect {
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::CreateAccount { .. } => "account",
            Effect::CreateEvent { .. } => "calendar",
            Effect::SendEmail { .. } => "email",
            Effect::PostChat { .. } => "chat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectReceipt {
    /// Reference assigned by the external system.
    pub reference: String,
    /// The effect had already been applied for this key; nothing was done.
    pub replayed: bool,
    pub applied_at: DateTime<Utc>,
}

/// Uniform interface to the calendar, email, chat and account systems.
///
/// Implementations must apply each key at most once and return the original
/// receipt when the same key is applied again.
#[async_trait]
pub trait SideEffects: Send + Sync {
    async fn apply(&self, key: EffectKey, effect: Effect) -> Result<EffectReceipt, AgentError>;
}

/// In-process implementation that keeps every applied effect.
pub struct InMemoryEffects {
    applied: Mutex<HashMap<EffectKey, (Effect, EffectReceipt)>>,
    order: Mutex<Vec<EffectKey>>,
    outage: AtomicBool,
}

impl InMemoryEffects {
    pub fn new() -> Self {
        Self {
            applied: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            outage: AtomicBool::new(false),
        }
    }

    /// While set, every apply fails with a transient error.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Applied effects in the order they first happened.
    pub fn applied(&self) -> Vec<(EffectKey, Effect)> {
        let applied = self.applied.lock();
        self.order
            .lock()
            .iter()
            .filter_map(|k| applied.get(k).map(|(e, _)| (k.clone(), e.clone())))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.applied.lock().len()
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.applied
            .lock()
            .values()
            .filter(|(e, _)| e.kind() == kind)
            .count()
    }

    pub fn for_workflow(&self, workflow_id: Uuid) -> Vec<(EffectKey, Effect)> {
        self.applied()
            .into_iter()
            .filter(|(k, _)| k.workflow_id == workflow_id)
            .collect()
    }
}

impl Default for InMemoryEffects {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SideEffects for InMemoryEffects {
    async fn apply(&self, key: EffectKey, effect: Effect) -> Result<EffectReceipt, AgentError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(AgentError::TransientFailure(format!(
                "{} system unavailable",
                effect.kind()
            )));
        }

        let mut applied = self.applied.lock();
        if let Some((_, receipt)) = applied.get(&key) {
            debug!(workflow_id = %key.workflow_id, step = %key.step, item = %key.item, "effect replayed");
            return Ok(EffectReceipt {
                replayed: true,
                ..receipt.clone()
            });
        }

        let id = Uuid::new_v4().simple().to_string();
        let receipt = EffectReceipt {
            reference: format!("{}_{}", effect.kind(), &id[..12]),
            replayed: false,
            applied_at: Utc::now(),
        };
        info!(
            workflow_id = %key.workflow_id,
            step = %key.step,
            item = %key.item,
            kind = effect.kind(),
            reference = %receipt.reference,
            "effect applied"
        );
        applied.insert(key.clone(), (effect, receipt.clone()));
        self.order.lock().push(key);
        Ok(receipt)
    }
}
