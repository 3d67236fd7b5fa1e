use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

impl EmployeeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0.trim().eq_ignore_ascii_case(other.trim())
    }
}

impl std::fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who approves, captured as a snapshot so later org-chart changes do not
/// reassign requests already in flight.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverContact {
    pub employee_id: EmployeeId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeProfile {
    pub employee_id: EmployeeId,
    pub display_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department: String,
    pub location: String,
    pub manager: Option<ApproverContact>,
}

impl EmployeeProfile {
    pub fn apply_override(mut self, patch: &EmployeeOverride) -> Self {
        if let Some(name) = non_empty(&patch.display_name) {
            self.display_name = name;
        }
        if let Some(email) = non_empty(&patch.email) {
            self.email = email;
        }
        if let Some(phone) = non_empty(&patch.phone) {
            self.phone = Some(phone);
        }
        if let Some(department) = non_empty(&patch.department) {
            self.department = department;
        }
        if let Some(location) = non_empty(&patch.location) {
            self.location = location;
        }
        if let Some(manager) = &patch.manager {
            self.manager = Some(manager.clone());
        }
        self
    }

    /// Builds a profile purely from local data. Used for staff that SAP does
    /// not know about (expatriates on home-country payroll).
    pub fn from_override(patch: &EmployeeOverride) -> Option<Self> {
        Some(Self {
            employee_id: patch.employee_id.clone(),
            display_name: non_empty(&patch.display_name)?,
            email: non_empty(&patch.email)?,
            phone: non_empty(&patch.phone),
            department: non_empty(&patch.department)?,
            location: non_empty(&patch.location)?,
            manager: patch.manager.clone(),
        })
    }

    pub fn as_approver(&self) -> ApproverContact {
        ApproverContact {
            employee_id: self.employee_id.clone(),
            name: self.display_name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeOverride {
    pub employee_id: EmployeeId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub manager: Option<ApproverContact>,
    pub note: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}
