//! SQLite-backed employee and workflow stores.
//!
//! Each row keeps the full record as JSON plus the columns queries filter on.
//! A compare-and-set reads, checks and writes inside one `IMMEDIATE`
//! transaction, so concurrent writers are serialized by SQLite itself.

use crate::store::{CasOutcome, EmployeeStore, WorkflowStore};
use async_trait::async_trait;
use onboard_core::{
    Employee, EmployeeStatus, Expect, OnboardError, OnboardResult, Transition, Workflow,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS employees (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    employee_id TEXT NOT NULL,
    status TEXT NOT NULL,
    current_step TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workflows_employee ON workflows(employee_id, status);
"#;

fn db_err(e: rusqlite::Error) -> OnboardError {
    OnboardError::Store(e.to_string())
}

/// Both stores over one SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> OnboardResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        Self::init(conn)
    }

    pub fn in_memory() -> OnboardResult<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> OnboardResult<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` on the blocking pool with exclusive use of the connection.
    async fn with_conn<T, F>(&self, f: F) -> OnboardResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> OnboardResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| OnboardError::Store(format!("store task failed: {e}")))?
    }
}

fn parse_employee(body: &str) -> OnboardResult<Employee> {
    Ok(serde_json::from_str(body)?)
}

fn parse_workflow(body: &str) -> OnboardResult<Workflow> {
    Ok(serde_json::from_str(body)?)
}

#[async_trait]
impl EmployeeStore for SqliteStore {
    async fn insert(&self, employee: &Employee) -> OnboardResult<()> {
        let body = serde_json::to_string(employee)?;
        let (id, email, created_at) = (
            employee.id.to_string(),
            employee.email.clone(),
            employee.created_at.to_rfc3339(),
        );
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO employees (id, email, created_at, body) VALUES (?1, ?2, ?3, ?4)",
                params![id, email, created_at, body],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: Uuid) -> OnboardResult<Option<Employee>> {
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM employees WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            body.as_deref().map(parse_employee).transpose()
        })
        .await
    }

    async fn set_status(&self, id: Uuid, status: EmployeeStatus) -> OnboardResult<()> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;
            let body: Option<String> = tx
                .query_row(
                    "SELECT body FROM employees WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            let mut employee = parse_employee(&body.ok_or(OnboardError::EmployeeNotFound(id))?)?;
            employee.status = status;
            tx.execute(
                "UPDATE employees SET body = ?2 WHERE id = ?1",
                params![id.to_string(), serde_json::to_string(&employee)?],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn list(&self) -> OnboardResult<Vec<Employee>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT body FROM employees ORDER BY created_at")
                .map_err(db_err)?;
            let bodies = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            bodies.iter().map(|b| parse_employee(b)).collect()
        })
        .await
    }
}

#[async_trait]
impl WorkflowStore for SqliteStore {
    async fn insert_if_no_active(&self, workflow: &Workflow) -> OnboardResult<()> {
        let workflow = workflow.clone();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;
            let active: Option<String> = tx
                .query_row(
                    "SELECT id FROM workflows
                     WHERE employee_id = ?1 AND status NOT IN ('completed', 'failed')
                     LIMIT 1",
                    params![workflow.employee_id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            if let Some(active) = active {
                let workflow_id = Uuid::parse_str(&active)
                    .map_err(|e| OnboardError::Store(format!("bad workflow id '{active}': {e}")))?;
                return Err(OnboardError::WorkflowAlreadyActive {
                    employee_id: workflow.employee_id,
                    workflow_id,
                });
            }
            tx.execute(
                "INSERT INTO workflows (id, employee_id, status, current_step, version, created_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    workflow.id.to_string(),
                    workflow.employee_id.to_string(),
                    workflow.status.as_str(),
                    workflow.current_step.as_str(),
                    workflow.version as i64,
                    workflow.created_at.to_rfc3339(),
                    serde_json::to_string(&workflow)?,
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn get(&self, id: Uuid) -> OnboardResult<Option<Workflow>> {
        self.with_conn(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM workflows WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            body.as_deref().map(parse_workflow).transpose()
        })
        .await
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expect: Expect,
        transition: Transition,
    ) -> OnboardResult<CasOutcome> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;
            let body: Option<String> = tx
                .query_row(
                    "SELECT body FROM workflows WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            let mut workflow = parse_workflow(&body.ok_or(OnboardError::WorkflowNotFound(id))?)?;
            if !workflow.apply(expect, &transition) {
                return Ok(CasOutcome::Rejected(workflow));
            }
            tx.execute(
                "UPDATE workflows SET status = ?2, current_step = ?3, version = ?4, body = ?5
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    workflow.status.as_str(),
                    workflow.current_step.as_str(),
                    workflow.version as i64,
                    serde_json::to_string(&workflow)?,
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            debug!(workflow_id = %id, version = workflow.version, "workflow row updated");
            Ok(CasOutcome::Applied(workflow))
        })
        .await
    }

    async fn list(&self) -> OnboardResult<Vec<Workflow>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT body FROM workflows ORDER BY created_at")
                .map_err(db_err)?;
            let bodies = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err)?;
            bodies.iter().map(|b| parse_workflow(b)).collect()
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use onboard_core::{EmployeeDraft, FailureReason, WorkflowStatus, WorkflowStep};

    #[tokio::test]
    async fn test_cas_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onboard.db");
        let wf = Workflow::new(Uuid::new_v4());
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_if_no_active(&wf).await.unwrap();
            let outcome = store
                .compare_and_set(
                    wf.id,
                    Expect::Step(WorkflowStep::Validate),
                    Transition::Advance(WorkflowStep::AccountSetup),
                )
                .await
                .unwrap();
            assert!(outcome.is_applied());
            let stale = store
                .compare_and_set(
                    wf.id,
                    Expect::Step(WorkflowStep::Validate),
                    Transition::Advance(WorkflowStep::AccountSetup),
                )
                .await
                .unwrap();
            assert!(!stale.is_applied());
        }

        let reopened = SqliteStore::open(&path).unwrap();
        let stored = WorkflowStore::get(&reopened, wf.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, WorkflowStep::AccountSetup);
        assert_eq!(stored.status, WorkflowStatus::Running);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_active_workflow_guard() {
        let store = SqliteStore::in_memory().unwrap();
        let employee = Uuid::new_v4();
        let first = Workflow::new(employee);
        store.insert_if_no_active(&first).await.unwrap();
        assert!(matches!(
            store.insert_if_no_active(&Workflow::new(employee)).await,
            Err(OnboardError::WorkflowAlreadyActive { .. })
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
        assert_eq!(WorkflowStore::list(&store).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_employee_status_update() {
        let store = SqliteStore::in_memory().unwrap();
        let ada = Employee::new(EmployeeDraft {
            name: "Ada Lovelace".into(),
            email: "ada@co.com".into(),
            ..EmployeeDraft::default()
        });
        store.insert(&ada).await.unwrap();
        store.set_status(ada.id, EmployeeStatus::Completed).await.unwrap();
        let stored = EmployeeStore::get(&store, ada.id).await.unwrap().unwrap();
        assert_eq!(stored.status, EmployeeStatus::Completed);
        assert_eq!(stored.name, "Ada Lovelace");

        assert!(matches!(
            store.set_status(Uuid::new_v4(), EmployeeStatus::Failed).await,
            Err(OnboardError::EmployeeNotFound(_))
        ));
    }
}
