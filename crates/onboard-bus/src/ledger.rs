use onboard_core::{Message, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LedgerKey {
    message_id: Uuid,
    attempt: u32,
    agent_id: String,
}

/// Responses of completed deliveries keyed by `(message id, attempt, agent)`.
///
/// A re-delivery of the same key is answered from here without invoking the
/// agent again.
#[derive(Default)]
pub struct DeliveryLedger {
    entries: Mutex<HashMap<LedgerKey, Response>>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, message: &Message, agent_id: &str) -> Option<Response> {
        self.entries.lock().get(&key(message, agent_id)).cloned()
    }

    pub fn insert(&self, message: &Message, agent_id: &str, response: Response) {
        self.entries.lock().insert(key(message, agent_id), response);
    }

    /// Drops entries for one message id, all attempts and agents.
    pub fn forget(&self, message_id: Uuid) {
        self.entries.lock().retain(|k, _| k.message_id != message_id);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn key(message: &Message, agent_id: &str) -> LedgerKey {
    LedgerKey {
        message_id: message.id,
        attempt: message.attempt,
        agent_id: agent_id.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_by_attempt_and_agent() {
        let ledger = DeliveryLedger::new();
        let msg = Message::new("orchestrator", "notify", serde_json::json!({}), Uuid::new_v4());
        ledger.insert(&msg, "notifier", Response::ok(msg.id, serde_json::json!(1)));

        assert!(ledger.get(&msg, "notifier").is_some());
        assert!(ledger.get(&msg, "audit").is_none());
        assert!(ledger.get(&msg.redelivery(), "notifier").is_none());

        ledger.forget(msg.id);
        assert!(ledger.is_empty());
    }
}
