//! Audit Trail Recorder for onboarding workflows.
//!
//! Every invocation attempt, orchestrated or direct, ends up here as one
//! [`onboard_core::StepRecord`]. The trail is append-only; nothing in the
//! workspace deletes records.
//!
//! # Main types
//!
//! - [`AuditTrail`]: The shared, append-only record store.
//! - [`AuditFilter`]: Search criteria for log queries.
//! - [`AgentPerformance`]: Per-agent execution metrics.
//! - [`WorkflowTrace`]: Ordered history of one workflow.

mod query;
mod sink;
mod trail;

pub use query::{AgentPerformance, AuditFilter, WorkflowTrace};
pub use sink::{read_jsonl, AUDIT_FILE};
pub use trail::AuditTrail;
