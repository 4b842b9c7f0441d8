//! Typed request payloads, one variant per bus method, and the typed reports the
//! built-in agents return.
//!
//! The bus parses every message's `params` into a [`Payload`] before an agent is
//! invoked, so unknown methods and malformed params are rejected at the
//! boundary with [`AgentError::InvalidInput`].

use crate::error::{AgentError, OnboardResult};
use crate::types::EmployeeDraft;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request payload keyed by method name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Payload {
    /// `validate` params.
    Validate(ValidateParams),
    /// `account_setup` params.
    AccountSetup(AccountSetupParams),
    /// `schedule` params.
    Schedule(ScheduleParams),
    /// `notify` params.
    Notify(NotifyParams),
}

impl Payload {
    /// Method names the bus accepts.
    pub const METHODS: [&'static str; 4] = ["validate", "account_setup", "schedule", "notify"];

    /// Validate `params` against the schema of `method`.
    pub fn parse(method: &str, params: &serde_json::Value) -> Result<Payload, AgentError> {
        if !Self::METHODS.contains(&method) {
            return Err(AgentError::InvalidInput(format!("unknown method '{method}'")));
        }
        let tagged = serde_json::json!({ "method": method, "params": params });
        serde_json::from_value(tagged).map_err(|e| {
            AgentError::InvalidInput(format!("malformed '{method}' payload: {e}"))
        })
    }

    /// Method name of the variant.
    pub fn method(&self) -> &'static str {
        match self {
            Payload::Validate(_) => "validate",
            Payload::AccountSetup(_) => "account_setup",
            Payload::Schedule(_) => "schedule",
            Payload::Notify(_) => "notify",
        }
    }

    /// The untagged params object as it travels in [`crate::Message::params`].
    pub fn to_params(&self) -> OnboardResult<serde_json::Value> {
        let value = match self {
            Payload::Validate(p) => serde_json::to_value(p)?,
            Payload::AccountSetup(p) => serde_json::to_value(p)?,
            Payload::Schedule(p) => serde_json::to_value(p)?,
            Payload::Notify(p) => serde_json::to_value(p)?,
        };
        Ok(value)
    }
}

/// Params of `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateParams {
    /// Raw employee fields.
    pub employee: EmployeeDraft,
}

/// Params of `account_setup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountSetupParams {
    /// Employee the account is for.
    pub employee_id: Uuid,
    /// Validated employee fields.
    pub employee: ValidatedEmployee,
}

/// Params of `schedule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleParams {
    /// Employee the events are for.
    pub employee_id: Uuid,
    /// Validated employee fields.
    pub employee: ValidatedEmployee,
    /// Account created earlier, if known.
    #[serde(default)]
    pub account: Option<AccountSummary>,
}

/// Params of `notify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyParams {
    /// Employee being announced.
    pub employee_id: Uuid,
    /// Validated employee fields.
    pub employee: ValidatedEmployee,
    /// Account created earlier, if known.
    #[serde(default)]
    pub account: Option<AccountSummary>,
    /// Events booked by `schedule`.
    #[serde(default)]
    pub events: Vec<ScheduledEvent>,
}

// --- Reports ---

/// Employee fields after cleaning by the validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedEmployee {
    /// Title-cased full name.
    pub name: String,
    /// Lower-cased email.
    pub email: String,
    /// Role, snapped to the standard list when close.
    pub role: String,
    /// Department, snapped to the standard list when close.
    pub department: String,
    /// Parsed start date.
    pub start_date: NaiveDate,
}

/// Field counts from validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Required fields checked.
    pub total_fields: usize,
    /// Required fields that passed.
    pub valid_fields: usize,
    /// Warnings raised.
    pub warning_count: usize,
}

/// Output of `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Cleaned employee.
    pub employee: ValidatedEmployee,
    /// Non-fatal remarks.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Field counts.
    pub summary: ValidationSummary,
}

/// Account identity handed to later steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Generated login name.
    pub username: String,
    /// Granted permissions, base set first.
    pub permissions: Vec<String>,
}

/// Output of `account_setup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountReport {
    /// The created account.
    pub account: AccountSummary,
    /// Reference returned by the account system.
    pub reference: String,
    /// Whether the scheduler was invoked directly and answered successfully.
    #[serde(default)]
    pub scheduler_notified: bool,
}

/// One booked calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// Event type, e.g. `orientation`.
    pub kind: String,
    /// Calendar title.
    pub title: String,
    /// Local start time.
    pub start_time: NaiveDateTime,
    /// Local end time.
    pub end_time: NaiveDateTime,
    /// Invited email addresses.
    pub attendees: Vec<String>,
    /// Reference returned by the calendar system.
    pub reference: String,
}

/// Output of `schedule`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleReport {
    /// Booked events in start order.
    pub events: Vec<ScheduledEvent>,
}

/// One sent email or chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSummary {
    /// `email` or `chat`.
    pub kind: String,
    /// Delivery channel, e.g. `#hr-notifications`.
    pub channel: String,
    /// Addressee.
    pub recipient: String,
    /// Email subject; `None` for chat.
    #[serde(default)]
    pub subject: Option<String>,
    /// Reference returned by the messaging system.
    pub reference: String,
}

/// Output of `notify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyReport {
    /// Every notification sent.
    pub notifications: Vec<NotificationSummary>,
}
