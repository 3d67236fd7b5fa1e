use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cabflow_core::audit::AuditEvent;
use cabflow_core::budget::{BudgetPeriod, DepartmentBudget};
use cabflow_core::domain::account::EmployeeAccount;
use cabflow_core::domain::booking::{ReferenceId, RequestStatus, TaxiRequest};
use cabflow_core::domain::employee::{EmployeeId, EmployeeOverride};
use cabflow_core::domain::feedback::TripFeedback;
use cabflow_core::errors::ApplicationError;
use cabflow_core::routing::RoutingRule;

pub mod account;
pub mod audit;
pub mod budget;
pub mod decision_link;
pub mod employee_override;
pub mod feedback;
pub mod memory;
pub mod notification_log;
pub mod routing_rule;
pub mod taxi_request;

pub use account::SqlAccountRepository;
pub use audit::SqlAuditRepository;
pub use budget::SqlBudgetRepository;
pub use decision_link::SqlDecisionLinkRepository;
pub use employee_override::SqlEmployeeOverrideRepository;
pub use feedback::SqlFeedbackRepository;
pub use memory::{
    InMemoryAccountRepository, InMemoryAuditRepository, InMemoryBudgetRepository,
    InMemoryDecisionLinkRepository, InMemoryEmployeeOverrideRepository,
    InMemoryFeedbackRepository, InMemoryNotificationLogRepository, InMemoryRoutingRuleRepository,
    InMemoryTaxiRequestRepository,
};
pub use notification_log::SqlNotificationLogRepository;
pub use routing_rule::SqlRoutingRuleRepository;
pub use taxi_request::SqlTaxiRequestRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("credential error: {0}")]
    Credential(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict(message) => Self::Conflict(message),
            other => Self::Persistence(other.to_string()),
        }
    }
}

/// Admin listing filter. `None` fields do not constrain the query.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub department: Option<String>,
    pub pickup_from: Option<DateTime<Utc>>,
    pub pickup_to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl RequestFilter {
    pub const DEFAULT_LIMIT: u32 = 200;

    pub fn matches(&self, request: &TaxiRequest) -> bool {
        if let Some(status) = self.status {
            if request.status != status {
                return false;
            }
        }
        if let Some(department) = &self.department {
            if !request.department.eq_ignore_ascii_case(department.trim()) {
                return false;
            }
        }
        if let Some(from) = self.pickup_from {
            if request.trip.pickup_at < from {
                return false;
            }
        }
        if let Some(to) = self.pickup_to {
            if request.trip.pickup_at > to {
                return false;
            }
        }
        true
    }

    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, 1_000)
    }
}

/// Selection rule for the reminder sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverdueQuery {
    pub stage_entered_before: DateTime<Utc>,
    pub last_reminder_before: DateTime<Utc>,
    pub max_reminders: u32,
}

impl OverdueQuery {
    pub fn matches(&self, request: &TaxiRequest) -> bool {
        request.status.is_pending()
            && request.stage_entered_at <= self.stage_entered_before
            && request.reminder_count < self.max_reminders
            && request.last_reminder_at.map_or(true, |at| at <= self.last_reminder_before)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub id: Option<i64>,
    pub reference_id: ReferenceId,
    pub kind: String,
    pub channel: String,
    pub recipient: String,
    pub delivered: bool,
    pub attempts: u32,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Single-use token behind the one-click manager decision link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionLink {
    pub token: String,
    pub reference_id: ReferenceId,
    pub approver_id: EmployeeId,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DecisionLink {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }
}

#[async_trait]
pub trait TaxiRequestRepository: Send + Sync {
    async fn find(&self, id: &ReferenceId) -> Result<Option<TaxiRequest>, RepositoryError>;
    async fn save(&self, request: TaxiRequest) -> Result<(), RepositoryError>;
    async fn list_for_requester(
        &self,
        employee_id: &EmployeeId,
        limit: u32,
    ) -> Result<Vec<TaxiRequest>, RepositoryError>;
    async fn list_pending_for_approver(
        &self,
        approver_id: &EmployeeId,
    ) -> Result<Vec<TaxiRequest>, RepositoryError>;
    /// The whole transport desk queue, longest waiting first. Never capped.
    async fn list_pending_for_admin(&self) -> Result<Vec<TaxiRequest>, RepositoryError>;
    async fn list(&self, filter: &RequestFilter) -> Result<Vec<TaxiRequest>, RepositoryError>;
    async fn list_overdue(&self, query: OverdueQuery) -> Result<Vec<TaxiRequest>, RepositoryError>;
    async fn record_reminder(
        &self,
        id: &ReferenceId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RoutingRuleRepository: Send + Sync {
    async fn list_active(&self) -> Result<Vec<RoutingRule>, RepositoryError>;
    async fn list_all(&self) -> Result<Vec<RoutingRule>, RepositoryError>;
    async fn find(&self, id: i64) -> Result<Option<RoutingRule>, RepositoryError>;
    /// Inserts when `rule.id == 0`, otherwise updates. Returns the stored rule.
    async fn save(&self, rule: RoutingRule) -> Result<RoutingRule, RepositoryError>;
    async fn deactivate(&self, id: i64) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait BudgetRepository: Send + Sync {
    async fn find(
        &self,
        department: &str,
        period: &BudgetPeriod,
    ) -> Result<Option<DepartmentBudget>, RepositoryError>;
    async fn upsert_allocation(
        &self,
        department: &str,
        period: &BudgetPeriod,
        allocated: Decimal,
    ) -> Result<DepartmentBudget, RepositoryError>;
    /// Adds `amount` (may be negative) to `spent`. `None` when no row exists.
    async fn add_spend(
        &self,
        department: &str,
        period: &BudgetPeriod,
        amount: Decimal,
    ) -> Result<Option<DepartmentBudget>, RepositoryError>;
    async fn list_period(
        &self,
        period: &BudgetPeriod,
    ) -> Result<Vec<DepartmentBudget>, RepositoryError>;
}

#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    async fn find(&self, id: &ReferenceId) -> Result<Option<TripFeedback>, RepositoryError>;
    /// Fails with `Conflict` when feedback already exists for the request.
    async fn insert(&self, feedback: TripFeedback) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait EmployeeOverrideRepository: Send + Sync {
    async fn find(&self, id: &EmployeeId) -> Result<Option<EmployeeOverride>, RepositoryError>;
    async fn save(&self, patch: EmployeeOverride) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &EmployeeId) -> Result<bool, RepositoryError>;
    async fn list(&self) -> Result<Vec<EmployeeOverride>, RepositoryError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<EmployeeAccount>, RepositoryError>;
    async fn save(&self, account: EmployeeAccount) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait NotificationLogRepository: Send + Sync {
    async fn append(&self, entry: NotificationLogEntry) -> Result<(), RepositoryError>;
    async fn list_for_reference(
        &self,
        id: &ReferenceId,
    ) -> Result<Vec<NotificationLogEntry>, RepositoryError>;
}

#[async_trait]
pub trait DecisionLinkRepository: Send + Sync {
    async fn issue(&self, link: DecisionLink) -> Result<(), RepositoryError>;
    async fn find(&self, token: &str) -> Result<Option<DecisionLink>, RepositoryError>;
    /// Marks the link used. Returns `false` if it was already used or has expired.
    async fn consume(&self, token: &str, at: DateTime<Utc>) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError>;
    async fn list_for_reference(&self, id: &ReferenceId)
        -> Result<Vec<AuditEvent>, RepositoryError>;
}

pub(crate) fn decode_err(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

/// Fixed-width UTC text so that timestamp columns order lexicographically.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| parse_timestamp(column, &value)).transpose()
}

pub(crate) fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, RepositoryError> {
    raw.parse::<Decimal>().map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}
