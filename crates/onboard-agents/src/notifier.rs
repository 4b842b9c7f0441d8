use crate::directory::{
    manager_email, team_channel, COMPANY, DEFAULT_MANAGER_EMAIL, HR_CHANNEL, HR_EMAIL,
};
use crate::effects::{Effect, EffectKey, SideEffects};
use async_trait::async_trait;
use onboard_core::{
    Agent, AgentError, AgentInput, NotificationSummary, NotifyParams, NotifyReport, Payload,
    NOTIFIER,
};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

/// Sends the onboarding notifications (`notify`): HR confirmation, manager
/// heads-up and the new hire's welcome mail, plus the matching chat posts.
///
/// Every message is keyed by `(workflow, "notify", item)`, so nobody is
/// mailed twice for one workflow.
pub struct NotifierAgent {
    effects: Arc<dyn SideEffects>,
}

struct Outgoing {
    item: &'static str,
    kind: &'static str,
    effect: Effect,
}

impl NotifierAgent {
    pub fn new(effects: Arc<dyn SideEffects>) -> Self {
        Self { effects }
    }

    fn compose(params: &NotifyParams) -> Vec<Outgoing> {
        let employee = &params.employee;
        let name = &employee.name;
        let manager = manager_email(&employee.department);
        let username = params
            .account
            .as_ref()
            .map_or("pending", |a| a.username.as_str());

        let mut hr_body = format!(
            "Onboarding has started for {name}.\n\nRole: {}\nDepartment: {}\nStart date: {}\nEmail: {}\nUsername: {username}\n",
            employee.role, employee.department, employee.start_date, employee.email
        );
        let mut schedule = String::new();
        for event in &params.events {
            let _ = writeln!(schedule, "- {} ({})", event.title, event.start_time);
        }
        if !schedule.is_empty() {
            hr_body.push_str("\nScheduled:\n");
            hr_body.push_str(&schedule);
        }

        let manager_body = format!(
            "{name} joins {} as {} on {}.\n\n{}",
            employee.department,
            employee.role,
            employee.start_date,
            if schedule.is_empty() {
                "No events scheduled yet.\n".to_string()
            } else {
                format!("Onboarding schedule:\n{schedule}")
            }
        );

        let welcome_body = format!(
            "Hi {name},\n\nWelcome to {COMPANY}! Your first day is {}.\nYour username is {username}.\n\n{}",
            employee.start_date,
            if schedule.is_empty() {
                String::new()
            } else {
                format!("Your first days:\n{schedule}")
            }
        );

        vec![
            Outgoing {
                item: "hr_email",
                kind: "hr_confirmation",
                effect: Effect::SendEmail {
                    to: HR_EMAIL.to_string(),
                    cc: vec![DEFAULT_MANAGER_EMAIL.to_string()],
                    subject: format!("New Employee Onboarding Initiated - {name}"),
                    body: hr_body,
                },
            },
            Outgoing {
                item: "hr_chat",
                kind: "hr_confirmation",
                effect: Effect::PostChat {
                    channel: HR_CHANNEL.to_string(),
                    text: format!(
                        "Onboarding started for {name} ({}, {})",
                        employee.role, employee.department
                    ),
                },
            },
            Outgoing {
                item: "manager_email",
                kind: "manager_notification",
                effect: Effect::SendEmail {
                    to: manager.to_string(),
                    cc: Vec::new(),
                    subject: format!("New Team Member Onboarding - {name}"),
                    body: manager_body,
                },
            },
            Outgoing {
                item: "manager_chat",
                kind: "manager_notification",
                effect: Effect::PostChat {
                    channel: team_channel(&employee.department),
                    text: format!("Please welcome {name}, joining as {}", employee.role),
                },
            },
            Outgoing {
                item: "welcome_email",
                kind: "employee_welcome",
                effect: Effect::SendEmail {
                    to: employee.email.clone(),
                    cc: Vec::new(),
                    subject: format!("Welcome to {COMPANY} - Your Onboarding Information"),
                    body: welcome_body,
                },
            },
        ]
    }
}

fn summarize(kind: &str, effect: &Effect, reference: String) -> NotificationSummary {
    match effect {
        Effect::SendEmail { to, subject, .. } => NotificationSummary {
            kind: kind.to_string(),
            channel: "email".to_string(),
            recipient: to.clone(),
            subject: Some(subject.clone()),
            reference,
        },
        Effect::PostChat { channel, .. } => NotificationSummary {
            kind: kind.to_string(),
            channel: "chat".to_string(),
            recipient: channel.clone(),
            subject: None,
            reference,
        },
        other => NotificationSummary {
            kind: kind.to_string(),
            channel: other.kind().to_string(),
            recipient: String::new(),
            subject: None,
            reference,
        },
    }
}

#[async_trait]
impl Agent for NotifierAgent {
    fn id(&self) -> &str {
        NOTIFIER
    }

    async fn process(&self, input: AgentInput) -> Result<serde_json::Value, AgentError> {
        let method = input.payload.method();
        let Payload::Notify(params) = input.payload else {
            return Err(AgentError::InvalidInput(format!(
                "notifier does not handle '{method}'"
            )));
        };

        let mut notifications = Vec::new();
        for out in Self::compose(&params) {
            let summary_effect = out.effect.clone();
            let receipt = self
                .effects
                .apply(
                    EffectKey::new(input.correlation_id, "notify", out.item),
                    out.effect,
                )
                .await?;
            notifications.push(summarize(out.kind, &summary_effect, receipt.reference));
        }

        info!(
            workflow_id = %input.correlation_id,
            sent = notifications.len(),
            "notifications sent"
        );
        serde_json::to_value(NotifyReport { notifications })
            .map_err(|e| AgentError::PermanentFailure(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::effects::InMemoryEffects;
    use chrono::NaiveDate;
    use onboard_core::{AccountSummary, ValidatedEmployee};
    use uuid::Uuid;

    fn input(workflow: Uuid, department: &str) -> AgentInput {
        AgentInput {
            message_id: Uuid::new_v4(),
            correlation_id: workflow,
            attempt: 1,
            source_agent: "orchestrator".into(),
            payload: Payload::Notify(NotifyParams {
                employee_id: Uuid::new_v4(),
                employee: ValidatedEmployee {
                    name: "Ada Lovelace".into(),
                    email: "ada@co.com".into(),
                    role: "Data Scientist".into(),
                    department: department.into(),
                    start_date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
                },
                account: Some(AccountSummary {
                    username: "ada.lovelace".into(),
                    permissions: vec![],
                }),
                events: vec![],
            }),
        }
    }

    #[tokio::test]
    async fn test_notifies_hr_manager_and_employee() {
        let effects = Arc::new(InMemoryEffects::new());
        let agent = NotifierAgent::new(effects.clone());
        let out = agent.process(input(Uuid::new_v4(), "Data Science")).await.unwrap();
        let report: NotifyReport = serde_json::from_value(out).unwrap();

        assert_eq!(report.notifications.len(), 5);
        let manager = report
            .notifications
            .iter()
            .find(|n| n.kind == "manager_notification" && n.channel == "email")
            .unwrap();
        assert_eq!(manager.recipient, "data-manager@krnl.com");
        assert!(report
            .notifications
            .iter()
            .any(|n| n.channel == "chat" && n.recipient == "#data-science-team"));
        let welcome = report.notifications.last().unwrap();
        assert_eq!(welcome.recipient, "ada@co.com");
        assert_eq!(
            welcome.subject.as_deref(),
            Some("Welcome to KRNL - Your Onboarding Information")
        );
        assert_eq!(effects.count_kind("email"), 3);
        assert_eq!(effects.count_kind("chat"), 2);
    }

    #[tokio::test]
    async fn test_redelivery_sends_nothing_new() {
        let effects = Arc::new(InMemoryEffects::new());
        let agent = NotifierAgent::new(effects.clone());
        let wf = Uuid::new_v4();
        agent.process(input(wf, "Engineering")).await.unwrap();
        agent.process(input(wf, "Engineering")).await.unwrap();
        assert_eq!(effects.count(), 5);
    }

    #[tokio::test]
    async fn test_outage_is_retryable() {
        let effects = Arc::new(InMemoryEffects::new());
        effects.set_outage(true);
        let agent = NotifierAgent::new(effects);
        let err = agent.process(input(Uuid::new_v4(), "HR")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
