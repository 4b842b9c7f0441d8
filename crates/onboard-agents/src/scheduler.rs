use crate::directory::{manager_email, HR_EMAIL};
use crate::effects::{Effect, EffectKey, SideEffects};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use onboard_core::{
    Agent, AgentError, AgentInput, Payload, ScheduleReport, ScheduledEvent, ValidatedEmployee,
    SCHEDULER,
};
use std::sync::Arc;
use tracing::info;

/// One entry of the onboarding calendar.
struct EventPlan {
    kind: &'static str,
    title: String,
    day_offset: i64,
    hour: u32,
    hours: i64,
    attendees: Vec<String>,
}

fn plan(employee: &ValidatedEmployee) -> [EventPlan; 3] {
    let name = &employee.name;
    [
        EventPlan {
            kind: "orientation",
            title: format!("New Employee Orientation - {name}"),
            day_offset: 0,
            hour: 9,
            hours: 4,
            attendees: vec![employee.email.clone(), HR_EMAIL.to_string()],
        },
        EventPlan {
            kind: "hr_meeting",
            title: format!("HR Onboarding Meeting - {name}"),
            day_offset: 0,
            hour: 14,
            hours: 1,
            attendees: vec![employee.email.clone(), HR_EMAIL.to_string()],
        },
        EventPlan {
            kind: "team_meet",
            title: format!("Team Meet & Greet - {name}"),
            day_offset: 1,
            hour: 10,
            hours: 1,
            attendees: vec![
                employee.email.clone(),
                manager_email(&employee.department).to_string(),
            ],
        },
    ]
}

fn slot(start_date: NaiveDate, event: &EventPlan) -> Result<(NaiveDateTime, NaiveDateTime), AgentError> {
    let start = start_date
        .checked_add_signed(Duration::days(event.day_offset))
        .and_then(|day| day.and_hms_opt(event.hour, 0, 0))
        .ok_or_else(|| {
            AgentError::PermanentFailure(format!("cannot schedule {} from {start_date}", event.kind))
        })?;
    let end = start
        .checked_add_signed(Duration::hours(event.hours))
        .ok_or_else(|| AgentError::PermanentFailure(format!("{} ends out of range", event.kind)))?;
    Ok((start, end))
}

/// Books orientation, HR meeting and team meet-and-greet (`schedule`).
///
/// Each event is keyed by `(workflow, "schedule", kind)`, so a second
/// delivery for the same workflow books nothing new.
pub struct SchedulerAgent {
    effects: Arc<dyn SideEffects>,
}

impl SchedulerAgent {
    pub fn new(effects: Arc<dyn SideEffects>) -> Self {
        Self { effects }
    }
}

#[async_trait]
impl Agent for SchedulerAgent {
    fn id(&self) -> &str {
        SCHEDULER
    }

    async fn process(&self, input: AgentInput) -> Result<serde_json::Value, AgentError> {
        let method = input.payload.method();
        let Payload::Schedule(params) = input.payload else {
            return Err(AgentError::InvalidInput(format!(
                "scheduler does not handle '{method}'"
            )));
        };

        let mut events = Vec::with_capacity(3);
        for event in plan(&params.employee) {
            let (start_time, end_time) = slot(params.employee.start_date, &event)?;
            let receipt = self
                .effects
                .apply(
                    EffectKey::new(input.correlation_id, "schedule", event.kind),
                    Effect::CreateEvent {
                        title: event.title.clone(),
                        start_time,
                        end_time,
                        attendees: event.attendees.clone(),
                    },
                )
                .await?;
            events.push(ScheduledEvent {
                kind: event.kind.to_string(),
                title: event.title,
                start_time,
                end_time,
                attendees: event.attendees,
                reference: receipt.reference,
            });
        }

        info!(
            workflow_id = %input.correlation_id,
            source = %input.source_agent,
            events = events.len(),
            "onboarding events scheduled"
        );
        serde_json::to_value(ScheduleReport { events })
            .map_err(|e| AgentError::PermanentFailure(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::effects::InMemoryEffects;
    use onboard_core::ScheduleParams;
    use uuid::Uuid;

    fn input(workflow: Uuid, source: &str) -> AgentInput {
        AgentInput {
            message_id: Uuid::new_v4(),
            correlation_id: workflow,
            attempt: 1,
            source_agent: source.into(),
            payload: Payload::Schedule(ScheduleParams {
                employee_id: Uuid::new_v4(),
                employee: ValidatedEmployee {
                    name: "Ada Lovelace".into(),
                    email: "ada@co.com".into(),
                    role: "Software Engineer".into(),
                    department: "Engineering".into(),
                    start_date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
                },
                account: None,
            }),
        }
    }

    #[tokio::test]
    async fn test_three_events_on_start_dates() {
        let effects = Arc::new(InMemoryEffects::new());
        let agent = SchedulerAgent::new(effects.clone());
        let out = agent.process(input(Uuid::new_v4(), "orchestrator")).await.unwrap();
        let report: ScheduleReport = serde_json::from_value(out).unwrap();

        assert_eq!(report.events.len(), 3);
        let orientation = &report.events[0];
        assert_eq!(orientation.title, "New Employee Orientation - Ada Lovelace");
        assert_eq!(orientation.start_time.to_string(), "2030-01-07 09:00:00");
        assert_eq!(orientation.end_time.to_string(), "2030-01-07 13:00:00");
        let team = &report.events[2];
        assert_eq!(team.start_time.to_string(), "2030-01-08 10:00:00");
        assert!(team.attendees.contains(&"engineering-manager@krnl.com".to_string()));
        assert_eq!(effects.count_kind("calendar"), 3);
    }

    #[tokio::test]
    async fn test_direct_and_orchestrated_calls_book_once() {
        let effects = Arc::new(InMemoryEffects::new());
        let agent = SchedulerAgent::new(effects.clone());
        let wf = Uuid::new_v4();
        let direct = agent.process(input(wf, "account_setup")).await.unwrap();
        let orchestrated = agent.process(input(wf, "orchestrator")).await.unwrap();
        assert_eq!(direct["events"], orchestrated["events"]);
        assert_eq!(effects.count_kind("calendar"), 3);
    }

    #[tokio::test]
    async fn test_rejects_other_methods() {
        let agent = SchedulerAgent::new(Arc::new(InMemoryEffects::new()));
        let mut wrong = input(Uuid::new_v4(), "orchestrator");
        wrong.payload = Payload::Validate(onboard_core::ValidateParams {
            employee: onboard_core::EmployeeDraft::default(),
        });
        let err = agent.process(wrong).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
    }
}
