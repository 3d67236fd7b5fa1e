use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use cabflow_core::config::SapConfig;
use cabflow_core::directory::{DirectoryError, EmployeeDirectory, InMemoryDirectory};
use cabflow_core::domain::employee::{EmployeeId, EmployeeProfile};
use cabflow_core::errors::ApplicationError;
use cabflow_db::repositories::EmployeeOverrideRepository;
use cabflow_sap::{CachedDirectory, SapClient};

/// SAP lookups merged with locally maintained overrides.
pub struct ProfileService {
    directory: Arc<dyn EmployeeDirectory>,
    overrides: Arc<dyn EmployeeOverrideRepository>,
}

impl ProfileService {
    pub fn new(
        directory: Arc<dyn EmployeeDirectory>,
        overrides: Arc<dyn EmployeeOverrideRepository>,
    ) -> Self {
        Self { directory, overrides }
    }

    /// An override is applied on top of the SAP record. When SAP is down or
    /// does not know the employee, a complete override stands in for it.
    pub async fn resolve(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<EmployeeProfile, ApplicationError> {
        let patch = self.overrides.find(employee_id).await?;

        let found = match self.directory.find_employee(employee_id).await {
            Ok(found) => found,
            Err(error) => {
                warn!(
                    event_name = "directory.lookup.failed",
                    employee_id = %employee_id,
                    error = %error,
                    has_override = patch.is_some(),
                    "employee directory lookup failed"
                );
                return patch
                    .as_ref()
                    .and_then(EmployeeProfile::from_override)
                    .ok_or_else(|| ApplicationError::Integration(error.to_string()));
            }
        };

        match (found, patch) {
            (Some(profile), Some(patch)) => Ok(profile.apply_override(&patch)),
            (Some(profile), None) => Ok(profile),
            (None, Some(patch)) => EmployeeProfile::from_override(&patch).ok_or_else(|| {
                ApplicationError::NotFound(format!(
                    "employee {employee_id} is not in the directory \
                     and the local override is incomplete"
                ))
            }),
            (None, None) => Err(ApplicationError::NotFound(format!(
                "employee {employee_id} is not in the directory"
            ))),
        }
    }
}

/// SAP behind a TTL cache when enabled, otherwise an empty directory so that
/// only overrides resolve.
pub fn directory_from_config(
    config: &SapConfig,
) -> Result<Arc<dyn EmployeeDirectory>, DirectoryError> {
    if !config.enabled {
        info!(event_name = "directory.mode", mode = "overrides_only", "SAP directory disabled");
        return Ok(Arc::new(InMemoryDirectory::default()));
    }

    let client = SapClient::from_config(config)?;
    info!(
        event_name = "directory.mode",
        mode = "sap",
        cache_ttl_secs = config.cache_ttl_secs,
        "SAP directory enabled"
    );
    Ok(Arc::new(CachedDirectory::new(client, Duration::from_secs(config.cache_ttl_secs))))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use cabflow_core::directory::{DirectoryError, EmployeeDirectory, InMemoryDirectory};
    use cabflow_core::domain::employee::{EmployeeId, EmployeeOverride, EmployeeProfile};
    use cabflow_core::errors::ApplicationError;
    use cabflow_db::repositories::{EmployeeOverrideRepository, InMemoryEmployeeOverrideRepository};

    use super::ProfileService;
    use crate::test_support::profile;

    struct DownDirectory;

    #[async_trait]
    impl EmployeeDirectory for DownDirectory {
        async fn find_employee(
            &self,
            _employee_id: &EmployeeId,
        ) -> Result<Option<EmployeeProfile>, DirectoryError> {
            Err(DirectoryError::Transport("connection refused".to_string()))
        }
    }

    fn expat_override() -> EmployeeOverride {
        EmployeeOverride {
            employee_id: EmployeeId("X0042".to_string()),
            display_name: Some("Lena Weber".to_string()),
            email: Some("lena.weber@example.com".to_string()),
            phone: None,
            department: Some("Engineering".to_string()),
            location: Some("Pune".to_string()),
            manager: None,
            note: Some("home-country payroll".to_string()),
        }
    }

    #[tokio::test]
    async fn override_patches_sap_profile() {
        let overrides = Arc::new(InMemoryEmployeeOverrideRepository::default());
        overrides
            .save(EmployeeOverride {
                employee_id: EmployeeId("E1001".to_string()),
                display_name: None,
                email: None,
                phone: Some("+91 90000 11111".to_string()),
                department: None,
                location: Some("Pune".to_string()),
                manager: None,
                note: None,
            })
            .await
            .expect("save override");
        let directory =
            InMemoryDirectory::with_profiles([profile("E1001", "Asha Rao", "Finance", "Mumbai")]);
        let service = ProfileService::new(Arc::new(directory), overrides);

        let resolved = service.resolve(&EmployeeId("E1001".to_string())).await.expect("resolve");
        assert_eq!(resolved.display_name, "Asha Rao");
        assert_eq!(resolved.location, "Pune");
        assert_eq!(resolved.phone.as_deref(), Some("+91 90000 11111"));
    }

    #[tokio::test]
    async fn complete_override_stands_in_when_sap_is_down_or_silent() {
        let overrides = Arc::new(InMemoryEmployeeOverrideRepository::default());
        overrides.save(expat_override()).await.expect("save override");

        let down = ProfileService::new(Arc::new(DownDirectory), overrides.clone());
        let lena = down.resolve(&EmployeeId("X0042".to_string())).await.expect("fallback");
        assert_eq!(lena.department, "Engineering");

        let silent = ProfileService::new(Arc::new(InMemoryDirectory::default()), overrides);
        assert!(silent.resolve(&EmployeeId("X0042".to_string())).await.is_ok());
        assert!(matches!(
            silent.resolve(&EmployeeId("E404".to_string())).await,
            Err(ApplicationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn directory_outage_without_override_is_an_integration_error() {
        let service = ProfileService::new(
            Arc::new(DownDirectory),
            Arc::new(InMemoryEmployeeOverrideRepository::default()),
        );
        let error = service.resolve(&EmployeeId("E1001".to_string())).await.expect_err("outage");
        assert!(matches!(error, ApplicationError::Integration(_)));
    }
}
