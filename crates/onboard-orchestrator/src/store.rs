use async_trait::async_trait;
use onboard_core::{
    Employee, EmployeeStatus, Expect, OnboardError, OnboardResult, Transition, Workflow,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

/// Result of a compare-and-set on a workflow.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    /// The precondition held; carries the updated record.
    Applied(Workflow),
    /// The precondition did not hold; carries the record as it is.
    Rejected(Workflow),
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied(_))
    }

    pub fn workflow(&self) -> &Workflow {
        match self {
            CasOutcome::Applied(wf) | CasOutcome::Rejected(wf) => wf,
        }
    }

    pub fn into_workflow(self) -> Workflow {
        match self {
            CasOutcome::Applied(wf) | CasOutcome::Rejected(wf) => wf,
        }
    }
}

/// Employee records. Owned by the CRUD layer; the orchestrator only reads
/// them and updates `status`.
#[async_trait]
pub trait EmployeeStore: Send + Sync {
    async fn insert(&self, employee: &Employee) -> OnboardResult<()>;
    async fn get(&self, id: Uuid) -> OnboardResult<Option<Employee>>;
    /// Fails with `EmployeeNotFound` for an unknown id.
    async fn set_status(&self, id: Uuid, status: EmployeeStatus) -> OnboardResult<()>;
    async fn list(&self) -> OnboardResult<Vec<Employee>>;
}

/// Durable workflow records.
///
/// `current_step` and `status` change only through
/// [`WorkflowStore::compare_and_set`], which must check and write in one
/// serializable step.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Inserts `workflow` unless its employee already has a non-terminal one,
    /// in which case it fails with `WorkflowAlreadyActive`.
    async fn insert_if_no_active(&self, workflow: &Workflow) -> OnboardResult<()>;
    async fn get(&self, id: Uuid) -> OnboardResult<Option<Workflow>>;
    /// Applies `transition` if `expect` holds. Fails with `WorkflowNotFound`
    /// for an unknown id.
    async fn compare_and_set(
        &self,
        id: Uuid,
        expect: Expect,
        transition: Transition,
    ) -> OnboardResult<CasOutcome>;
    async fn list(&self) -> OnboardResult<Vec<Workflow>>;
}

/// Employee store backed by a map.
#[derive(Default)]
pub struct InMemoryEmployeeStore {
    employees: Mutex<HashMap<Uuid, Employee>>,
}

impl InMemoryEmployeeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmployeeStore for InMemoryEmployeeStore {
    async fn insert(&self, employee: &Employee) -> OnboardResult<()> {
        self.employees.lock().insert(employee.id, employee.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> OnboardResult<Option<Employee>> {
        Ok(self.employees.lock().get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: EmployeeStatus) -> OnboardResult<()> {
        let mut employees = self.employees.lock();
        let employee = employees
            .get_mut(&id)
            .ok_or(OnboardError::EmployeeNotFound(id))?;
        employee.status = status;
        Ok(())
    }

    async fn list(&self) -> OnboardResult<Vec<Employee>> {
        let mut all: Vec<Employee> = self.employees.lock().values().cloned().collect();
        all.sort_by_key(|e| e.created_at);
        Ok(all)
    }
}

/// Workflow store backed by a map. One lock guards the whole map, so every
/// compare-and-set is atomic.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: Mutex<HashMap<Uuid, Workflow>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert_if_no_active(&self, workflow: &Workflow) -> OnboardResult<()> {
        let mut workflows = self.workflows.lock();
        if let Some(active) = workflows
            .values()
            .find(|w| w.employee_id == workflow.employee_id && !w.is_terminal())
        {
            return Err(OnboardError::WorkflowAlreadyActive {
                employee_id: workflow.employee_id,
                workflow_id: active.id,
            });
        }
        workflows.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> OnboardResult<Option<Workflow>> {
        Ok(self.workflows.lock().get(&id).cloned())
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expect: Expect,
        transition: Transition,
    ) -> OnboardResult<CasOutcome> {
        let mut workflows = self.workflows.lock();
        let workflow = workflows
            .get_mut(&id)
            .ok_or(OnboardError::WorkflowNotFound(id))?;
        if workflow.apply(expect, &transition) {
            Ok(CasOutcome::Applied(workflow.clone()))
        } else {
            Ok(CasOutcome::Rejected(workflow.clone()))
        }
    }

    async fn list(&self) -> OnboardResult<Vec<Workflow>> {
        let mut all: Vec<Workflow> = self.workflows.lock().values().cloned().collect();
        all.sort_by_key(|w| w.created_at);
        Ok(all)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use onboard_core::{EmployeeDraft, FailureReason, WorkflowStatus, WorkflowStep};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_one_active_workflow_per_employee() {
        let store = InMemoryWorkflowStore::new();
        let employee = Uuid::new_v4();
        let first = Workflow::new(employee);
        store.insert_if_no_active(&first).await.unwrap();

        let err = store
            .insert_if_no_active(&Workflow::new(employee))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OnboardError::WorkflowAlreadyActive { workflow_id, .. } if workflow_id == first.id
        ));

        store
            .compare_and_set(
                first.id,
                Expect::NonTerminal,
                Transition::Fail(FailureReason::cancelled(WorkflowStep::Validate)),
            )
            .await
            .unwrap();
        store.insert_if_no_active(&Workflow::new(employee)).await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_cas_applies_once() {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let wf = Workflow::new(Uuid::new_v4());
        store.insert_if_no_active(&wf).await.unwrap();
        let id = wf.id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_set(
                        id,
                        Expect::Step(WorkflowStep::Validate),
                        Transition::Advance(WorkflowStep::AccountSetup),
                    )
                    .await
                    .unwrap()
                    .is_applied()
            }));
        }
        let mut applied = 0;
        for handle in handles {
            if handle.await.unwrap() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, WorkflowStep::AccountSetup);
        assert_eq!(stored.status, WorkflowStatus::Running);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let workflows = InMemoryWorkflowStore::new();
        let err = workflows
            .compare_and_set(Uuid::new_v4(), Expect::NonTerminal, Transition::Start)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardError::WorkflowNotFound(_)));

        let employees = InMemoryEmployeeStore::new();
        let err = employees
            .set_status(Uuid::new_v4(), EmployeeStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, OnboardError::EmployeeNotFound(_)));

        let ada = Employee::new(EmployeeDraft::default());
        employees.insert(&ada).await.unwrap();
        employees.set_status(ada.id, EmployeeStatus::InProgress).await.unwrap();
        assert_eq!(
            employees.get(ada.id).await.unwrap().unwrap().status,
            EmployeeStatus::InProgress
        );
    }
}
