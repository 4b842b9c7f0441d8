//! Workflow Orchestrator for employee onboarding.
//!
//! Runs one task per workflow, sequencing `validate`, `account_setup`,
//! `schedule` and `notify` through the [`onboard_bus::MessageBus`], retrying
//! transient failures with exponential backoff. Workflow state changes only
//! by compare-and-set, which is also how completions of direct agent calls
//! are reconciled into the sequence.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Start, query, wait for, cancel and count workflows.
//! - [`Reconciler`]: Bus completion listener that applies direct-call shortcuts.
//! - [`EmployeeStore`] / [`WorkflowStore`]: Persistence seams.
//! - [`SqliteStore`]: SQLite implementation of both stores.
//! - [`RetryPolicy`]: Step retry budget and backoff.

mod config;
mod engine;
mod reconcile;
mod retry;
mod sqlite;
mod store;

pub use config::OrchestratorConfig;
pub use engine::{BulkStart, OnboardingStats, Orchestrator, WorkflowView};
pub use reconcile::Reconciler;
pub use retry::RetryPolicy;
pub use sqlite::SqliteStore;
pub use store::{
    CasOutcome, EmployeeStore, InMemoryEmployeeStore, InMemoryWorkflowStore, WorkflowStore,
};
