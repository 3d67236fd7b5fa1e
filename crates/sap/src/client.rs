use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use cabflow_core::config::SapConfig;
use cabflow_core::directory::{DirectoryError, EmployeeDirectory};
use cabflow_core::domain::employee::{EmployeeId, EmployeeProfile};

use crate::payload::extract_profile;

const USER_SELECT: &str = "userId,displayName,firstName,lastName,email,cellPhone,businessPhone,\
department,location,manager/userId,manager/displayName,manager/firstName,manager/lastName,\
manager/email,manager/cellPhone,manager/businessPhone";
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// SuccessFactors OData v2 client for `User` lookups.
pub struct SapClient {
    http: Client,
    base_url: String,
    login: String,
    password: SecretString,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl SapClient {
    pub fn new(
        base_url: impl Into<String>,
        company_id: &str,
        username: &str,
        password: SecretString,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, DirectoryError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| DirectoryError::Transport(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            login: format!("{username}@{company_id}"),
            password,
            max_retries,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
        })
    }

    pub fn from_config(config: &SapConfig) -> Result<Self, DirectoryError> {
        let missing = |key: &str| DirectoryError::Transport(format!("sap.{key} is not configured"));
        let base_url = config.base_url.as_deref().ok_or_else(|| missing("base_url"))?;
        let company_id = config.company_id.as_deref().ok_or_else(|| missing("company_id"))?;
        let username = config.username.as_deref().ok_or_else(|| missing("username"))?;
        let password = config.password.clone().ok_or_else(|| missing("password"))?;
        Self::new(
            base_url,
            company_id,
            username,
            password,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn user_url(&self, employee_id: &EmployeeId) -> String {
        // OData string literals escape a single quote by doubling it.
        let literal = employee_id.0.trim().replace('\'', "''");
        format!(
            "{}/odata/v2/User('{literal}')?$select={USER_SELECT}&$expand=manager&$format=json",
            self.base_url
        )
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32 << attempt.min(16);
        self.retry_base_delay.saturating_mul(multiplier).min(MAX_RETRY_DELAY)
    }

    async fn fetch(&self, url: &str) -> Result<Option<Value>, Attempt> {
        let response = self
            .http
            .get(url)
            .basic_auth(&self.login, Some(self.password.expose_secret()))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|error| Attempt::Retry(DirectoryError::Transport(error.to_string())))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Attempt::Fatal(DirectoryError::Unauthorized(status.as_u16())));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let error = DirectoryError::Upstream { status: status.as_u16(), detail };
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(Attempt::Retry(error))
            } else {
                Err(Attempt::Fatal(error))
            };
        }

        response
            .json::<Value>()
            .await
            .map(Some)
            .map_err(|error| Attempt::Fatal(DirectoryError::Decode(error.to_string())))
    }
}

enum Attempt {
    Retry(DirectoryError),
    Fatal(DirectoryError),
}

#[async_trait]
impl EmployeeDirectory for SapClient {
    async fn find_employee(
        &self,
        employee_id: &EmployeeId,
    ) -> Result<Option<EmployeeProfile>, DirectoryError> {
        let url = self.user_url(employee_id);
        let mut attempt = 0;
        loop {
            match self.fetch(&url).await {
                Ok(Some(payload)) => return extract_profile(&payload),
                Ok(None) => {
                    debug!(
                        event_name = "sap.user.not_found",
                        employee_id = %employee_id,
                        "SAP has no such user"
                    );
                    return Ok(None);
                }
                Err(Attempt::Fatal(error)) => return Err(error),
                Err(Attempt::Retry(error)) if attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    warn!(
                        event_name = "sap.user.retry",
                        employee_id = %employee_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying SAP user lookup"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(Attempt::Retry(error)) => return Err(error),
            }
        }
    }
}
