use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use onboard_core::{
    Agent, AgentError, AgentInput, EmployeeDraft, Payload, ValidatedEmployee, ValidationReport,
    ValidationSummary, VALIDATOR,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

static EMAIL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").ok()
});

/// Roles new hires are usually filed under.
pub const STANDARD_ROLES: [&str; 10] = [
    "Software Engineer",
    "Product Manager",
    "Designer",
    "QA Engineer",
    "DevOps Engineer",
    "Data Scientist",
    "Marketing Manager",
    "Sales Representative",
    "HR Specialist",
    "Finance Analyst",
];

pub const STANDARD_DEPARTMENTS: [&str; 10] = [
    "Engineering",
    "Product",
    "Design",
    "QA",
    "DevOps",
    "Data Science",
    "Marketing",
    "Sales",
    "HR",
    "Finance",
];

const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%d-%m-%Y",
];

const REQUIRED_FIELDS: usize = 5;

/// Checks and normalizes employee data (`validate`).
///
/// Pure: no side effects, so re-delivery needs no idempotency key.
#[derive(Debug, Default)]
pub struct ValidatorAgent;

impl ValidatorAgent {
    pub fn new() -> Self {
        Self
    }

    /// Validates one draft. Every problem is reported in a single
    /// `InvalidInput` error.
    pub fn validate(&self, draft: &EmployeeDraft) -> Result<ValidationReport, AgentError> {
        let missing: Vec<String> = [
            ("name", &draft.name),
            ("email", &draft.email),
            ("role", &draft.role),
            ("department", &draft.department),
            ("start_date", &draft.start_date),
        ]
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| format!("Missing required field: {field}"))
        .collect();
        if !missing.is_empty() {
            return Err(AgentError::InvalidInput(missing.join("; ")));
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let name = collapse_title(&draft.name);
        if name.chars().count() < 2 {
            errors.push("Name must be at least 2 characters long".to_string());
        }

        let email = draft.email.trim().to_lowercase();
        if !EMAIL_RE.as_ref().is_some_and(|re| re.is_match(&email)) {
            errors.push("Invalid email format".to_string());
        }

        let role = snap(&draft.role, &STANDARD_ROLES);
        if !STANDARD_ROLES.contains(&role.as_str()) {
            warnings.push(format!("Unusual role: {role}. Consider using standard roles."));
        }

        let department = snap(&draft.department, &STANDARD_DEPARTMENTS);
        if !STANDARD_DEPARTMENTS.contains(&department.as_str()) {
            warnings.push(format!(
                "Unusual department: {department}. Consider using standard departments."
            ));
        }

        let start_date = match parse_date(&draft.start_date) {
            Some(date) => {
                if date < Utc::now().date_naive() {
                    warnings.push("Start date is in the past".to_string());
                }
                Some(date)
            }
            None => {
                errors.push(format!(
                    "Invalid start date: unable to parse '{}'",
                    draft.start_date.trim()
                ));
                None
            }
        };

        match start_date {
            Some(start_date) if errors.is_empty() => Ok(ValidationReport {
                summary: ValidationSummary {
                    total_fields: REQUIRED_FIELDS,
                    valid_fields: REQUIRED_FIELDS,
                    warning_count: warnings.len(),
                },
                employee: ValidatedEmployee {
                    name,
                    email,
                    role,
                    department,
                    start_date,
                },
                warnings,
            }),
            _ => Err(AgentError::InvalidInput(errors.join("; "))),
        }
    }
}

#[async_trait]
impl Agent for ValidatorAgent {
    fn id(&self) -> &str {
        VALIDATOR
    }

    async fn process(&self, input: AgentInput) -> Result<serde_json::Value, AgentError> {
        let method = input.payload.method();
        let Payload::Validate(params) = input.payload else {
            return Err(AgentError::InvalidInput(format!(
                "validator does not handle '{method}'"
            )));
        };
        let report = self.validate(&params.employee)?;
        debug!(
            workflow_id = %input.correlation_id,
            warnings = report.warnings.len(),
            "employee validated"
        );
        serde_json::to_value(report).map_err(|e| AgentError::PermanentFailure(e.to_string()))
    }
}

/// Title-cases like a word processor: a letter is upper-cased when it follows
/// a non-letter, so `r&d` becomes `R&D` and `o'neil` becomes `O'Neil`.
fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut prev_alpha = false;
    for c in word.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn collapse_title(raw: &str) -> String {
    raw.split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Word-set Jaccard similarity.
fn similarity(a: &str, b: &str) -> f64 {
    let a: HashSet<&str> = a.split_whitespace().collect();
    let b: HashSet<&str> = b.split_whitespace().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Cleans `raw` and replaces it with the first standard value whose word set
/// is more than 80% similar.
fn snap(raw: &str, standard: &[&str]) -> String {
    let cleaned = collapse_title(raw);
    let lowered = cleaned.to_lowercase();
    standard
        .iter()
        .find(|s| similarity(&lowered, &s.to_lowercase()) > 0.8)
        .map_or(cleaned, |s| (*s).to_string())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn ada() -> EmployeeDraft {
        EmployeeDraft {
            name: "Ada Lovelace".into(),
            email: "ada@co.com".into(),
            role: "Engineer".into(),
            department: "R&D".into(),
            start_date: "2024-03-01".into(),
        }
    }

    #[test]
    fn test_valid_employee_with_warnings() {
        let report = ValidatorAgent::new().validate(&ada()).unwrap();
        assert_eq!(report.employee.name, "Ada Lovelace");
        assert_eq!(report.employee.department, "R&D");
        assert_eq!(
            report.employee.start_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert!(report.warnings.iter().any(|w| w.contains("Unusual role: Engineer")));
        assert!(report.warnings.iter().any(|w| w == "Start date is in the past"));
        assert_eq!(report.summary.warning_count, report.warnings.len());
    }

    #[test]
    fn test_missing_email_is_invalid_input() {
        let mut draft = ada();
        draft.email = "  ".into();
        let err = ValidatorAgent::new().validate(&draft).unwrap_err();
        assert_eq!(
            err,
            AgentError::InvalidInput("Missing required field: email".into())
        );
    }

    #[test]
    fn test_every_error_reported() {
        let draft = EmployeeDraft {
            name: "a".into(),
            email: "not-an-email".into(),
            role: "x".into(),
            department: "y".into(),
            start_date: "tomorrow".into(),
        };
        let AgentError::InvalidInput(msg) = ValidatorAgent::new().validate(&draft).unwrap_err()
        else {
            panic!("expected invalid input");
        };
        assert!(msg.contains("at least 2 characters"));
        assert!(msg.contains("Invalid email format"));
        assert!(msg.contains("Invalid start date"));
    }

    #[test]
    fn test_cleaning_and_snapping() {
        let draft = EmployeeDraft {
            name: "  grace   HOPPER ".into(),
            email: " Grace@Navy.MIL ".into(),
            role: "software   engineer".into(),
            department: "data science".into(),
            start_date: "12/31/2099".into(),
        };
        let report = ValidatorAgent::new().validate(&draft).unwrap();
        assert_eq!(report.employee.name, "Grace Hopper");
        assert_eq!(report.employee.email, "grace@navy.mil");
        assert_eq!(report.employee.role, "Software Engineer");
        assert_eq!(report.employee.department, "Data Science");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_title_case_after_punctuation() {
        assert_eq!(title_case("r&d"), "R&D");
        assert_eq!(title_case("o'neil"), "O'Neil");
        assert_eq!(collapse_title("mary-jane   watson"), "Mary-Jane Watson");
    }

    #[test]
    fn test_similarity() {
        assert!((similarity("qa engineer", "qa engineer") - 1.0).abs() < f64::EPSILON);
        assert!((similarity("engineer", "software engineer") - 0.5).abs() < f64::EPSILON);
    }
}
