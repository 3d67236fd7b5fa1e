use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::employee::EmployeeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Manager,
    Admin,
}

impl Role {
    pub fn as_key(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    pub fn parse_key(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "employee" => Some(Self::Employee),
            "manager" | "hod" => Some(Self::Manager),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Local login record. SAP owns identity, but credentials are provisioned
/// here because SuccessFactors does not expose password verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeAccount {
    pub username: String,
    pub employee_id: EmployeeId,
    pub role: Role,
    /// Argon2id PHC string.
    pub password_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
