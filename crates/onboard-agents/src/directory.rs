//! Company contacts used by the scheduler and the notifier.

pub const COMPANY: &str = "KRNL";
pub const HR_EMAIL: &str = "hr@krnl.com";
pub const DEFAULT_MANAGER_EMAIL: &str = "manager@krnl.com";
pub const HR_CHANNEL: &str = "#hr-notifications";

/// Manager mailbox for a department; unknown departments go to the default.
pub fn manager_email(department: &str) -> &'static str {
    match department {
        "Engineering" => "engineering-manager@krnl.com",
        "Product" => "product-manager@krnl.com",
        "Design" => "design-manager@krnl.com",
        "QA" => "qa-manager@krnl.com",
        "DevOps" => "devops-manager@krnl.com",
        "Data Science" => "data-manager@krnl.com",
        "Marketing" => "marketing-manager@krnl.com",
        "Sales" => "sales-manager@krnl.com",
        "HR" => "hr-manager@krnl.com",
        "Finance" => "finance-manager@krnl.com",
        _ => DEFAULT_MANAGER_EMAIL,
    }
}

/// Team chat channel, e.g. `#data-science-team`.
pub fn team_channel(department: &str) -> String {
    let slug = department
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    format!("#{slug}-team")
}
