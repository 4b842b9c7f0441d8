//! Core types and error definitions for the onboarding pipeline.
//!
//! This crate provides the foundational types shared across all onboarding
//! crates: the error taxonomy, the employee/workflow data model, the bus
//! envelope and its wire format, and the agent runtime contract.
//!
//! # Main types
//!
//! - [`OnboardError`]: Unified error enum for all onboarding subsystems.
//! - [`AgentError`]: Step-level failure taxonomy returned by agents.
//! - [`Message`] / [`Response`]: Bus envelope and wire response.
//! - [`Payload`]: Typed request payload, one variant per method.
//! - [`Workflow`]: Per-employee state machine record with compare-and-set rules.
//! - [`StepRecord`]: Immutable audit entry for one invocation attempt.
//! - [`Agent`]: The uniform `process(input) -> output | error` contract.

/// The agent runtime contract and the direct-call handle.
pub mod agent;
/// Error taxonomy and wire error shape.
pub mod error;
/// Message envelope and wire response.
pub mod message;
/// Typed per-method payloads and agent reports.
pub mod payload;
/// Employee, workflow and audit data model.
pub mod types;

pub use agent::{Agent, AgentInput, DirectCaller};
pub use error::{AgentError, ErrorKind, OnboardError, OnboardResult, WireError};
pub use message::{Message, Response, DEFAULT_DEADLINE};
pub use payload::{
    AccountReport, AccountSetupParams, AccountSummary, NotificationSummary, NotifyParams,
    NotifyReport, Payload, ScheduleParams, ScheduleReport, ScheduledEvent, ValidateParams,
    ValidatedEmployee, ValidationReport, ValidationSummary,
};
pub use types::{
    Employee, EmployeeDraft, EmployeeStatus, Expect, FailureReason, StepRecord, StepStatus,
    Transition, Workflow, WorkflowState, WorkflowStatus, WorkflowStep, ACCOUNT_SETUP, NOTIFIER,
    ORCHESTRATOR, SCHEDULER, VALIDATOR,
};
