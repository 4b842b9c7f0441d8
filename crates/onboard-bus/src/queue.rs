use chrono::{DateTime, Utc};
use onboard_core::{Message, OnboardError, OnboardResult, Response};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use uuid::Uuid;

use crate::dispatch::Dispatcher;

pub(crate) struct QueueItem {
    pub(crate) message: Message,
    pub(crate) reply: oneshot::Sender<Response>,
}

/// Handle to a message accepted for queued delivery.
///
/// Awaiting [`DeliveryReceipt::wait`] yields the response once the target's
/// worker has delivered it. Dropping the receipt makes the message
/// fire-and-forget: the bus then redelivers transient failures itself and
/// dead-letters what it cannot deliver.
#[derive(Debug)]
pub struct DeliveryReceipt {
    pub message_id: Uuid,
    pub target: String,
    rx: oneshot::Receiver<Response>,
}

impl DeliveryReceipt {
    pub(crate) fn new(message_id: Uuid, target: String, rx: oneshot::Receiver<Response>) -> Self {
        Self {
            message_id,
            target,
            rx,
        }
    }

    pub async fn wait(self) -> OnboardResult<Response> {
        self.rx.await.map_err(|_| {
            OnboardError::Bus(format!(
                "queue for '{}' closed before delivering {}",
                self.target, self.message_id
            ))
        })
    }
}

/// A message the bus gave up on.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub message: Message,
    pub target: String,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

#[derive(Default)]
pub(crate) struct DeadLetterQueue {
    letters: Mutex<Vec<DeadLetter>>,
}

impl DeadLetterQueue {
    pub(crate) fn push(&self, letter: DeadLetter) {
        self.letters.lock().push(letter);
    }

    pub(crate) fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters.lock().clone()
    }

    pub(crate) fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.letters.lock())
    }
}

/// Count of queued-but-undelivered messages per `(source, target)` lane.
/// While a lane is busy, later sends on it are queued behind.
#[derive(Default)]
pub(crate) struct Lanes {
    pending: Mutex<HashMap<(String, String), usize>>,
}

impl Lanes {
    pub(crate) fn enter(&self, source: &str, target: &str) {
        *self
            .pending
            .lock()
            .entry((source.to_string(), target.to_string()))
            .or_insert(0) += 1;
    }

    pub(crate) fn leave(&self, source: &str, target: &str) {
        let mut pending = self.pending.lock();
        let key = (source.to_string(), target.to_string());
        if let Some(count) = pending.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pending.remove(&key);
            }
        }
    }

    pub(crate) fn is_busy(&self, source: &str, target: &str) -> bool {
        self.pending
            .lock()
            .contains_key(&(source.to_string(), target.to_string()))
    }

    pub(crate) fn depth(&self, target: &str) -> usize {
        self.pending
            .lock()
            .iter()
            .filter(|((_, t), _)| t == target)
            .map(|(_, n)| *n)
            .sum()
    }
}

/// Delivers one target's queue in FIFO order until every sender is dropped.
pub(crate) async fn run_worker(
    dispatcher: Dispatcher,
    agent_id: String,
    mut rx: mpsc::UnboundedReceiver<QueueItem>,
) {
    debug!(agent = %agent_id, "queue worker started");
    while let Some(item) = rx.recv().await {
        let source = item.message.source_agent.clone();
        let response = dispatcher
            .deliver_queued(item.message, &agent_id, &item.reply)
            .await;
        dispatcher.lanes.leave(&source, &agent_id);
        if item.reply.send(response).is_err() {
            debug!(agent = %agent_id, "queued reply dropped by sender");
        }
    }
    debug!(agent = %agent_id, "queue worker stopped");
}
