use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delivery tuning for the [`crate::MessageBus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Upper bound on a synchronous direct call before falling back to the queue.
    #[serde(default = "default_direct_timeout_ms")]
    pub direct_timeout_ms: u64,
    /// Total delivery attempts for a fire-and-forget queued message.
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
    #[serde(default = "default_true")]
    pub dead_letter_enabled: bool,
}

fn default_direct_timeout_ms() -> u64 {
    5_000
}

fn default_max_redeliveries() -> u32 {
    3
}

fn default_redelivery_delay_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            direct_timeout_ms: default_direct_timeout_ms(),
            max_redeliveries: default_max_redeliveries(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            dead_letter_enabled: true,
        }
    }
}

impl BusConfig {
    pub fn direct_timeout(&self) -> Duration {
        Duration::from_millis(self.direct_timeout_ms)
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}
