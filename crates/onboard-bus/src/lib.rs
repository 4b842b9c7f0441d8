//! Message bus connecting the orchestrator and the onboarding agents.
//!
//! A targeted message is delivered synchronously when the registry reports a
//! healthy synchronous agent, and queued otherwise or when the direct call
//! times out. Untargeted messages are broadcast to every interested agent.
//! Every delivery attempt is recorded in the [`onboard_audit::AuditTrail`]
//! before the sender sees the result.
//!
//! # Main types
//!
//! - [`MessageBus`]: Routing, fallback, broadcast and queue workers.
//! - [`SendOptions`] / [`SendOutcome`]: Per-send options and results.
//! - [`DeliveryReceipt`]: Awaitable handle for a queued message.
//! - [`CompletionListener`]: Hook notified of every recorded delivery.
//! - [`DeadLetter`]: A message the bus gave up on.

mod bus;
mod completion;
mod config;
mod dispatch;
mod ledger;
mod queue;

pub use bus::{BroadcastDelivery, MessageBus, SendOptions, SendOutcome};
pub use completion::{Completion, CompletionListener};
pub use config::BusConfig;
pub use ledger::DeliveryLedger;
pub use queue::{DeadLetter, DeliveryReceipt};
