use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::employee::{EmployeeId, EmployeeProfile};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Transport(String),
    #[error("directory rejected credentials (status {0})")]
    Unauthorized(u16),
    #[error("directory returned status {status}: {detail}")]
    Upstream { status: u16, detail: String },
    #[error("directory payload could not be decoded: {0}")]
    Decode(String),
}

/// Source of employee identity and reporting lines.
#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn find_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<EmployeeProfile>, DirectoryError>;
}

#[async_trait]
impl<D> EmployeeDirectory for Arc<D>
where
    D: EmployeeDirectory + ?Sized,
{
    async fn find_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<EmployeeProfile>, DirectoryError> {
        (**self).find_employee(employee_id).await
    }
}

/// Directory backed by a map. Used when SAP is disabled and in tests.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    profiles: Arc<RwLock<HashMap<String, EmployeeProfile>>>,
}

impl InMemoryDirectory {
    pub fn with_profiles(profiles: impl IntoIterator<Item = EmployeeProfile>) -> Self {
        let directory = Self::default();
        for profile in profiles {
            directory.insert(profile);
        }
        directory
    }

    pub fn insert(&self, profile: EmployeeProfile) {
        let key = key(&profile.employee_id);
        match self.profiles.write() {
            Ok(mut profiles) => {
                profiles.insert(key, profile);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, profile);
            }
        }
    }
}

#[async_trait]
impl EmployeeDirectory for InMemoryDirectory {
    async fn find_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<EmployeeProfile>, DirectoryError> {
        let profiles = match self.profiles.read() {
            Ok(profiles) => profiles,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(profiles.get(&key(employee_id)).cloned())
    }
}

fn key(employee_id: &EmployeeId) -> String {
    employee_id.0.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{EmployeeDirectory, InMemoryDirectory};
    use crate::domain::employee::{EmployeeId, EmployeeProfile};

    #[tokio::test]
    async fn in_memory_directory_is_case_insensitive() {
        let directory = InMemoryDirectory::with_profiles([EmployeeProfile {
            employee_id: EmployeeId("E1001".to_string()),
            display_name: "Asha Kulkarni".to_string(),
            email: "asha@example.com".to_string(),
            phone: None,
            department: "Production".to_string(),
            location: "Pune".to_string(),
            manager: None,
        }]);

        let found =
            directory.find_employee(&EmployeeId("e1001".to_string())).await.expect("lookup");
        assert_eq!(found.map(|p| p.display_name), Some("Asha Kulkarni".to_string()));

        let missing =
            directory.find_employee(&EmployeeId("E404".to_string())).await.expect("lookup");
        assert!(missing.is_none());
    }
}
