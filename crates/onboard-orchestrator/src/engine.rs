use crate::config::OrchestratorConfig;
use crate::reconcile::Reconciler;
use crate::store::{CasOutcome, EmployeeStore, WorkflowStore};
use onboard_audit::AuditTrail;
use onboard_bus::{MessageBus, SendOptions};
use onboard_core::{
    AccountReport, AccountSetupParams, AgentError, Employee, EmployeeStatus, ErrorKind, Expect,
    FailureReason, Message, NotifyParams, OnboardError, OnboardResult, Payload, ScheduleParams,
    ScheduleReport, StepRecord, Transition, ValidateParams, ValidationReport, WireError, Workflow,
    WorkflowState, WorkflowStatus, WorkflowStep, ORCHESTRATOR,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// `GetWorkflow` result.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowView {
    pub workflow: Workflow,
    pub state: WorkflowState,
    /// Every attempt recorded for the workflow, in append order.
    pub step_records: Vec<StepRecord>,
}

/// Outcome of [`Orchestrator::start_bulk`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkStart {
    /// `(employee_id, workflow_id)` for every started workflow.
    pub started: Vec<(Uuid, Uuid)>,
    /// `(employee_id, reason)` for every employee that could not start.
    pub rejected: Vec<(Uuid, String)>,
}

/// Dashboard counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OnboardingStats {
    pub total_employees: usize,
    pub total_workflows: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    /// Completed workflows as a percentage of all employees.
    pub success_rate: f64,
}

enum StepOutcome {
    Succeeded,
    Failed(FailureReason),
    /// The workflow left this step while we were working on it.
    Superseded,
}

struct WorkflowTask {
    handle: Option<JoinHandle<()>>,
    done: watch::Receiver<bool>,
    wake: Arc<Notify>,
}

struct Inner {
    bus: Arc<MessageBus>,
    audit: Arc<AuditTrail>,
    employees: Arc<dyn EmployeeStore>,
    workflows: Arc<dyn WorkflowStore>,
    config: OrchestratorConfig,
    tasks: Mutex<HashMap<Uuid, WorkflowTask>>,
}

/// Drives one onboarding workflow per employee through
/// `validate -> account_setup -> schedule -> notify`.
///
/// Each workflow runs as its own tokio task. Every state change goes through
/// [`WorkflowStore::compare_and_set`]; the orchestrator holds no lock across
/// an agent call.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Builds the orchestrator and installs its [`Reconciler`] as the bus's
    /// completion listener.
    pub fn new(
        bus: Arc<MessageBus>,
        employees: Arc<dyn EmployeeStore>,
        workflows: Arc<dyn WorkflowStore>,
        config: OrchestratorConfig,
    ) -> Self {
        bus.set_listener(Arc::new(Reconciler::new(workflows.clone())));
        let audit = bus.audit().clone();
        Self {
            inner: Arc::new(Inner {
                bus,
                audit,
                employees,
                workflows,
                config,
                tasks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.inner.bus
    }

    pub fn employees(&self) -> &Arc<dyn EmployeeStore> {
        &self.inner.employees
    }

    pub fn workflows(&self) -> &Arc<dyn WorkflowStore> {
        &self.inner.workflows
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Creates a workflow for the employee and starts driving it.
    ///
    /// Fails with `EmployeeNotFound`, or `WorkflowAlreadyActive` while the
    /// employee has a non-terminal workflow.
    pub async fn start_onboarding(&self, employee_id: Uuid) -> OnboardResult<Uuid> {
        let inner = &self.inner;
        let employee = inner
            .employees
            .get(employee_id)
            .await?
            .ok_or(OnboardError::EmployeeNotFound(employee_id))?;

        let workflow = Workflow::new(employee_id);
        inner.workflows.insert_if_no_active(&workflow).await?;
        if let Err(e) = inner
            .employees
            .set_status(employee_id, EmployeeStatus::InProgress)
            .await
        {
            // Nothing will drive this workflow; close it so the employee can
            // be started again.
            let reason = FailureReason::new(
                WorkflowStep::Validate,
                ErrorKind::PermanentFailure,
                format!("employee status update failed: {e}"),
            );
            if let Err(close) = inner
                .workflows
                .compare_and_set(workflow.id, Expect::NonTerminal, Transition::Fail(reason))
                .await
            {
                error!(workflow_id = %workflow.id, error = %close, "cannot close unstarted workflow");
            }
            return Err(e);
        }

        let workflow_id = workflow.id;
        let (done_tx, done_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());
        inner.tasks.lock().insert(
            workflow_id,
            WorkflowTask {
                handle: None,
                done: done_rx,
                wake: wake.clone(),
            },
        );

        let task_inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            task_inner.run(workflow_id, employee, wake).await;
            task_inner.tasks.lock().remove(&workflow_id);
            let _ = done_tx.send(true);
        });
        if let Some(task) = inner.tasks.lock().get_mut(&workflow_id) {
            task.handle = Some(handle);
        }

        info!(%workflow_id, %employee_id, "onboarding started");
        Ok(workflow_id)
    }

    /// Starts a workflow for every employee; failures do not stop the rest.
    pub async fn start_bulk(&self, employee_ids: &[Uuid]) -> BulkStart {
        let mut result = BulkStart::default();
        for &employee_id in employee_ids {
            match self.start_onboarding(employee_id).await {
                Ok(workflow_id) => result.started.push((employee_id, workflow_id)),
                Err(e) => {
                    warn!(%employee_id, error = %e, "bulk start rejected");
                    result.rejected.push((employee_id, e.to_string()));
                }
            }
        }
        info!(
            started = result.started.len(),
            rejected = result.rejected.len(),
            "bulk onboarding submitted"
        );
        result
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> OnboardResult<WorkflowView> {
        let workflow = self
            .inner
            .workflows
            .get(workflow_id)
            .await?
            .ok_or(OnboardError::WorkflowNotFound(workflow_id))?;
        Ok(WorkflowView {
            state: workflow.state(),
            step_records: self.inner.audit.for_workflow(workflow_id),
            workflow,
        })
    }

    /// Every record of every workflow the employee has had, in append order.
    pub async fn employee_trace(&self, employee_id: Uuid) -> OnboardResult<Vec<StepRecord>> {
        self.inner
            .employees
            .get(employee_id)
            .await?
            .ok_or(OnboardError::EmployeeNotFound(employee_id))?;
        let workflow_ids: Vec<Uuid> = self
            .inner
            .workflows
            .list()
            .await?
            .into_iter()
            .filter(|w| w.employee_id == employee_id)
            .map(|w| w.id)
            .collect();
        Ok(self.inner.audit.for_workflows(&workflow_ids))
    }

    /// Waits until the workflow's task has finished and returns the final
    /// record.
    pub async fn wait_for(&self, workflow_id: Uuid) -> OnboardResult<Workflow> {
        let done = self
            .inner
            .tasks
            .lock()
            .get(&workflow_id)
            .map(|t| t.done.clone());
        if let Some(mut done) = done {
            if done.wait_for(|finished| *finished).await.is_err() {
                return Err(OnboardError::Orchestrator(format!(
                    "workflow task {workflow_id} ended abnormally"
                )));
            }
        }
        self.inner
            .workflows
            .get(workflow_id)
            .await?
            .ok_or(OnboardError::WorkflowNotFound(workflow_id))
    }

    /// Marks a non-terminal workflow `failed` with reason `Cancelled`.
    ///
    /// Messages already handed to the bus are not retracted; they are
    /// recorded as cancelled when they arrive.
    pub async fn cancel(&self, workflow_id: Uuid) -> OnboardResult<Workflow> {
        let inner = &self.inner;
        let current = inner
            .workflows
            .get(workflow_id)
            .await?
            .ok_or(OnboardError::WorkflowNotFound(workflow_id))?;
        let reason = FailureReason::cancelled(current.current_step);
        match inner
            .workflows
            .compare_and_set(workflow_id, Expect::NonTerminal, Transition::Fail(reason))
            .await?
        {
            CasOutcome::Applied(workflow) => {
                if let Some(task) = inner.tasks.lock().get(&workflow_id) {
                    task.wake.notify_one();
                }
                inner
                    .employees
                    .set_status(workflow.employee_id, EmployeeStatus::Failed)
                    .await?;
                info!(%workflow_id, step = %workflow.current_step, "workflow cancelled");
                Ok(workflow)
            }
            CasOutcome::Rejected(_) => Err(OnboardError::WorkflowTerminal(workflow_id)),
        }
    }

    pub async fn stats(&self) -> OnboardResult<OnboardingStats> {
        let employees = self.inner.employees.list().await?;
        let workflows = self.inner.workflows.list().await?;
        let count = |status: WorkflowStatus| workflows.iter().filter(|w| w.status == status).count();
        let completed = count(WorkflowStatus::Completed);
        let failed = count(WorkflowStatus::Failed);
        Ok(OnboardingStats {
            total_employees: employees.len(),
            total_workflows: workflows.len(),
            active: workflows.iter().filter(|w| !w.is_terminal()).count(),
            completed,
            failed,
            success_rate: completed as f64 / employees.len().max(1) as f64 * 100.0,
        })
    }

    /// Number of workflow tasks still running.
    pub fn running(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Aborts every running workflow task. Workflow records are left as they
    /// are.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for (workflow_id, task) in tasks {
            if let Some(handle) = task.handle {
                handle.abort();
                debug!(%workflow_id, "workflow task aborted");
            }
        }
    }
}

impl Inner {
    async fn run(&self, workflow_id: Uuid, employee: Employee, wake: Arc<Notify>) {
        if let Err(e) = self.drive(workflow_id, &employee, &wake).await {
            error!(%workflow_id, error = %e, "workflow aborted by orchestrator error");
            let step = match self.workflows.get(workflow_id).await {
                Ok(Some(wf)) => wf.current_step,
                _ => WorkflowStep::Validate,
            };
            let reason = FailureReason::new(step, ErrorKind::PermanentFailure, e.to_string());
            let _ = self
                .workflows
                .compare_and_set(workflow_id, Expect::NonTerminal, Transition::Fail(reason))
                .await;
        }
        self.finish(workflow_id, employee.id).await;
    }

    async fn drive(
        &self,
        workflow_id: Uuid,
        employee: &Employee,
        wake: &Notify,
    ) -> OnboardResult<()> {
        self.workflows
            .compare_and_set(workflow_id, Expect::NonTerminal, Transition::Start)
            .await?;

        loop {
            let workflow = self.load(workflow_id).await?;
            if workflow.is_terminal() {
                return Ok(());
            }
            let step = workflow.current_step;

            match self.run_step(workflow_id, step, employee, wake).await? {
                StepOutcome::Succeeded => {
                    let outcome = self
                        .workflows
                        .compare_and_set(
                            workflow_id,
                            Expect::Step(step),
                            Transition::Advance(step.next()),
                        )
                        .await?;
                    if outcome.is_applied() {
                        debug!(%workflow_id, from = %step, to = %step.next(), "workflow advanced");
                    } else {
                        debug!(
                            %workflow_id,
                            step = %step,
                            now = %outcome.workflow().current_step,
                            "advance rejected, step already reconciled"
                        );
                    }
                }
                StepOutcome::Failed(reason) => {
                    warn!(
                        %workflow_id,
                        step = %reason.step,
                        kind = %reason.kind,
                        error = %reason.message,
                        "step failed"
                    );
                    self.workflows
                        .compare_and_set(workflow_id, Expect::NonTerminal, Transition::Fail(reason))
                        .await?;
                }
                StepOutcome::Superseded => {
                    debug!(%workflow_id, step = %step, "step superseded");
                }
            }
        }
    }

    /// Dispatches `step` until it succeeds, fails for good, or the workflow
    /// moves on without it.
    async fn run_step(
        &self,
        workflow_id: Uuid,
        step: WorkflowStep,
        employee: &Employee,
        wake: &Notify,
    ) -> OnboardResult<StepOutcome> {
        let Some(agent) = step.agent_id() else {
            return Ok(StepOutcome::Superseded);
        };
        let payload = match self.payload_for(workflow_id, step, employee) {
            Ok(payload) => payload,
            Err(e) => {
                return Ok(StepOutcome::Failed(FailureReason::new(
                    step,
                    e.kind(),
                    e.message(),
                )))
            }
        };
        // Account creation must confirm before the workflow moves on.
        let options = if step == WorkflowStep::AccountSetup {
            SendOptions::sync_only()
        } else {
            SendOptions::default()
        };
        let message_id = Uuid::new_v4();
        let policy = &self.config.retry;

        let mut attempt = 1;
        loop {
            let workflow = self.load(workflow_id).await?;
            if workflow.is_terminal() || workflow.current_step != step {
                return Ok(StepOutcome::Superseded);
            }

            let message = Message::request(ORCHESTRATOR, &payload, workflow_id)?
                .to(agent)
                .with_id(message_id)
                .with_attempt(attempt)
                .with_timeout(self.config.step_timeout());
            debug!(%workflow_id, step = %step, attempt, "dispatching step");

            let error = match self.bus.request(message, options).await {
                Ok(response) => match response.into_result() {
                    Ok(_) => return Ok(StepOutcome::Succeeded),
                    Err(error) => error,
                },
                Err(e) => WireError::new(
                    e.kind().unwrap_or(ErrorKind::PermanentFailure),
                    e.to_string(),
                ),
            };

            if !error.kind.is_retryable() || !policy.allows_retry(attempt) {
                return Ok(StepOutcome::Failed(FailureReason::new(
                    step,
                    error.kind,
                    error.message,
                )));
            }

            let delay = policy.backoff(attempt);
            warn!(
                %workflow_id,
                step = %step,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error.message,
                "step failed, retrying"
            );
            if !backoff(delay, wake).await {
                debug!(%workflow_id, "backoff interrupted");
            }
            attempt += 1;
        }
    }

    /// Builds the payload for `step` from the employee and earlier step
    /// outputs recorded in the audit trail.
    fn payload_for(
        &self,
        workflow_id: Uuid,
        step: WorkflowStep,
        employee: &Employee,
    ) -> Result<Payload, AgentError> {
        if step == WorkflowStep::Validate {
            return Ok(Payload::Validate(ValidateParams {
                employee: employee.draft(),
            }));
        }

        let validated = self
            .output::<ValidationReport>(workflow_id, WorkflowStep::Validate)
            .ok_or_else(|| AgentError::PermanentFailure("no validation result recorded".into()))?
            .employee;
        let account = self
            .output::<AccountReport>(workflow_id, WorkflowStep::AccountSetup)
            .map(|r| r.account);

        Ok(match step {
            WorkflowStep::AccountSetup => Payload::AccountSetup(AccountSetupParams {
                employee_id: employee.id,
                employee: validated,
            }),
            WorkflowStep::Schedule => Payload::Schedule(ScheduleParams {
                employee_id: employee.id,
                employee: validated,
                account,
            }),
            WorkflowStep::Notify => Payload::Notify(NotifyParams {
                employee_id: employee.id,
                employee: validated,
                account,
                events: self
                    .output::<ScheduleReport>(workflow_id, WorkflowStep::Schedule)
                    .map(|r| r.events)
                    .unwrap_or_default(),
            }),
            WorkflowStep::Validate | WorkflowStep::Done => {
                return Err(AgentError::PermanentFailure(format!(
                    "no payload for step '{step}'"
                )))
            }
        })
    }

    fn output<T: DeserializeOwned>(&self, workflow_id: Uuid, step: WorkflowStep) -> Option<T> {
        let record = self.audit.latest_success(workflow_id, step.as_str())?;
        serde_json::from_value(record.output?).ok()
    }

    async fn load(&self, workflow_id: Uuid) -> OnboardResult<Workflow> {
        self.workflows
            .get(workflow_id)
            .await?
            .ok_or(OnboardError::WorkflowNotFound(workflow_id))
    }

    /// Mirrors the workflow outcome onto the employee.
    async fn finish(&self, workflow_id: Uuid, employee_id: Uuid) {
        let workflow = match self.load(workflow_id).await {
            Ok(wf) => wf,
            Err(e) => {
                error!(%workflow_id, error = %e, "cannot read finished workflow");
                return;
            }
        };
        let status = match workflow.status {
            WorkflowStatus::Completed => {
                info!(%workflow_id, %employee_id, "onboarding completed");
                EmployeeStatus::Completed
            }
            WorkflowStatus::Failed => {
                let reason = workflow.failure.as_ref();
                warn!(
                    %workflow_id,
                    %employee_id,
                    step = ?reason.map(|r| r.step),
                    kind = ?reason.map(|r| r.kind),
                    "onboarding failed"
                );
                EmployeeStatus::Failed
            }
            WorkflowStatus::Started | WorkflowStatus::Running => return,
        };
        if let Err(e) = self.employees.set_status(employee_id, status).await {
            error!(%employee_id, error = %e, "employee status update failed");
        }
    }
}

/// Sleeps for `delay`; returns `false` when woken early by a cancellation.
async fn backoff(delay: Duration, wake: &Notify) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = wake.notified() => false,
    }
}
