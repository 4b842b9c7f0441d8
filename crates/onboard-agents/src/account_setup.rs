use crate::effects::{Effect, EffectKey, SideEffects};
use async_trait::async_trait;
use onboard_core::{
    AccountReport, AccountSummary, Agent, AgentError, AgentInput, DirectCaller, Payload,
    ScheduleParams, ValidatedEmployee, ACCOUNT_SETUP, SCHEDULER,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Granted to every new account.
pub const BASE_PERMISSIONS: [&str; 5] = [
    "access_company_directory",
    "use_email_system",
    "access_employee_handbook",
    "use_collaboration_tools",
    "access_time_tracking",
];

/// Role-specific permissions added on top of [`BASE_PERMISSIONS`].
pub fn role_permissions(role: &str) -> &'static [&'static str] {
    match role {
        "Software Engineer" => &[
            "read_code_repository",
            "write_code_repository",
            "access_development_tools",
            "access_staging_environment",
            "view_project_documentation",
        ],
        "Product Manager" => &[
            "manage_product_backlog",
            "access_analytics_dashboard",
            "view_user_feedback",
            "manage_feature_flags",
            "access_project_reports",
        ],
        "Designer" => &[
            "access_design_tools",
            "manage_design_assets",
            "view_user_research",
            "access_prototype_tools",
            "collaborate_on_designs",
        ],
        "QA Engineer" => &[
            "access_testing_tools",
            "view_test_results",
            "manage_test_cases",
            "access_bug_tracking",
            "access_staging_environment",
        ],
        "DevOps Engineer" => &[
            "manage_infrastructure",
            "access_monitoring_tools",
            "manage_deployments",
            "access_production_environment",
            "manage_ci_cd_pipelines",
        ],
        "Data Scientist" => &[
            "access_data_warehouse",
            "use_analytics_tools",
            "manage_ml_models",
            "access_compute_resources",
            "view_data_reports",
        ],
        "Marketing Manager" => &[
            "manage_campaigns",
            "access_marketing_tools",
            "view_customer_data",
            "manage_content",
            "access_social_media",
        ],
        "Sales Representative" => &[
            "access_crm_system",
            "view_customer_contacts",
            "manage_sales_pipeline",
            "access_sales_reports",
            "use_communication_tools",
        ],
        "HR Specialist" => &[
            "manage_employee_data",
            "access_hr_systems",
            "view_personnel_records",
            "manage_benefits",
            "access_payroll_system",
        ],
        "Finance Analyst" => &[
            "access_financial_data",
            "manage_budgets",
            "view_expense_reports",
            "access_accounting_system",
            "generate_financial_reports",
        ],
        _ => &[],
    }
}

/// Base plus role permissions, first occurrence wins.
pub fn permissions_for(role: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    BASE_PERMISSIONS
        .iter()
        .chain(role_permissions(role))
        .filter(|p| seen.insert(**p))
        .map(|p| (*p).to_string())
        .collect()
}

#[derive(Default)]
struct Usernames {
    by_employee: HashMap<Uuid, String>,
    taken: HashSet<String>,
}

/// Creates the system account (`account_setup`).
///
/// With a [`DirectCaller`] attached it also asks the scheduler to book the
/// onboarding events straight away, without waiting for the orchestrator.
pub struct AccountSetupAgent {
    effects: Arc<dyn SideEffects>,
    usernames: Mutex<Usernames>,
    scheduler: Option<Arc<dyn DirectCaller>>,
}

impl AccountSetupAgent {
    pub fn new(effects: Arc<dyn SideEffects>) -> Self {
        Self {
            effects,
            usernames: Mutex::new(Usernames::default()),
            scheduler: None,
        }
    }

    pub fn with_direct_scheduling(mut self, caller: Arc<dyn DirectCaller>) -> Self {
        self.scheduler = Some(caller);
        self
    }

    /// `first.last` from the name (or the e-mail local part), reduced to
    /// `[A-Za-z0-9._-]`, with a numeric suffix when already taken. The same
    /// employee always gets the same username back.
    pub fn username_for(&self, employee_id: Uuid, employee: &ValidatedEmployee) -> String {
        let mut names = self.usernames.lock();
        if let Some(existing) = names.by_employee.get(&employee_id) {
            return existing.clone();
        }

        let parts: Vec<String> = employee
            .name
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        let raw = match parts.as_slice() {
            [] => employee
                .email
                .split('@')
                .next()
                .unwrap_or_default()
                .to_string(),
            [only] => only.clone(),
            [first, .., last] => format!("{first}.{last}"),
        };
        let mut base: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();
        if base.is_empty() {
            base = "user".to_string();
        }

        let mut username = base.clone();
        let mut counter = 1;
        while names.taken.contains(&username) {
            username = format!("{base}{counter}");
            counter += 1;
        }
        names.taken.insert(username.clone());
        names.by_employee.insert(employee_id, username.clone());
        username
    }
}

#[async_trait]
impl Agent for AccountSetupAgent {
    fn id(&self) -> &str {
        ACCOUNT_SETUP
    }

    async fn process(&self, input: AgentInput) -> Result<serde_json::Value, AgentError> {
        let method = input.payload.method();
        let Payload::AccountSetup(params) = input.payload else {
            return Err(AgentError::InvalidInput(format!(
                "account_setup does not handle '{method}'"
            )));
        };

        let account = AccountSummary {
            username: self.username_for(params.employee_id, &params.employee),
            permissions: permissions_for(&params.employee.role),
        };
        let receipt = self
            .effects
            .apply(
                EffectKey::new(input.correlation_id, ACCOUNT_SETUP, "account"),
                Effect::CreateAccount {
                    username: account.username.clone(),
                    email: params.employee.email.clone(),
                    permissions: account.permissions.clone(),
                },
            )
            .await?;
        info!(
            workflow_id = %input.correlation_id,
            username = %account.username,
            permissions = account.permissions.len(),
            replayed = receipt.replayed,
            "account ready"
        );

        let mut scheduler_notified = false;
        if let Some(caller) = &self.scheduler {
            let payload = Payload::Schedule(ScheduleParams {
                employee_id: params.employee_id,
                employee: params.employee.clone(),
                account: Some(account.clone()),
            });
            match caller
                .call(ACCOUNT_SETUP, SCHEDULER, payload, input.correlation_id)
                .await
            {
                Ok(_) => scheduler_notified = true,
                Err(e) => warn!(
                    workflow_id = %input.correlation_id,
                    error = %e,
                    "direct scheduling failed, orchestrator will schedule"
                ),
            }
        }

        let report = AccountReport {
            account,
            reference: receipt.reference,
            scheduler_notified,
        };
        serde_json::to_value(report).map_err(|e| AgentError::PermanentFailure(e.to_string()))
    }
}
