use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use tera::Tera;

use cabflow_core::budget::BudgetLedger;
use cabflow_core::config::{AppConfig, RemindersConfig};
use cabflow_core::security::SessionSigner;
use cabflow_db::repositories::{
    AccountRepository, AuditRepository, BudgetRepository, DecisionLinkRepository,
    EmployeeOverrideRepository, FeedbackRepository, InMemoryAccountRepository,
    InMemoryAuditRepository, InMemoryBudgetRepository, InMemoryDecisionLinkRepository,
    InMemoryEmployeeOverrideRepository, InMemoryFeedbackRepository,
    InMemoryNotificationLogRepository, InMemoryRoutingRuleRepository,
    InMemoryTaxiRequestRepository, NotificationLogRepository, RoutingRuleRepository,
    SqlAccountRepository, SqlAuditRepository, SqlBudgetRepository, SqlDecisionLinkRepository,
    SqlEmployeeOverrideRepository, SqlFeedbackRepository, SqlNotificationLogRepository,
    SqlRoutingRuleRepository, SqlTaxiRequestRepository, TaxiRequestRepository,
};
use cabflow_db::DbPool;
use cabflow_notify::NotificationDispatcher;

use crate::directory::ProfileService;

pub const DECISION_LINK_TTL_HOURS: i64 = 72;

#[derive(Clone)]
pub struct Repositories {
    pub requests: Arc<dyn TaxiRequestRepository>,
    pub routing_rules: Arc<dyn RoutingRuleRepository>,
    pub budgets: Arc<dyn BudgetRepository>,
    pub feedback: Arc<dyn FeedbackRepository>,
    pub overrides: Arc<dyn EmployeeOverrideRepository>,
    pub accounts: Arc<dyn AccountRepository>,
    pub notifications: Arc<dyn NotificationLogRepository>,
    pub decision_links: Arc<dyn DecisionLinkRepository>,
    pub audit: Arc<dyn AuditRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            requests: Arc::new(SqlTaxiRequestRepository::new(pool.clone())),
            routing_rules: Arc::new(SqlRoutingRuleRepository::new(pool.clone())),
            budgets: Arc::new(SqlBudgetRepository::new(pool.clone())),
            feedback: Arc::new(SqlFeedbackRepository::new(pool.clone())),
            overrides: Arc::new(SqlEmployeeOverrideRepository::new(pool.clone())),
            accounts: Arc::new(SqlAccountRepository::new(pool.clone())),
            notifications: Arc::new(SqlNotificationLogRepository::new(pool.clone())),
            decision_links: Arc::new(SqlDecisionLinkRepository::new(pool.clone())),
            audit: Arc::new(SqlAuditRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            requests: Arc::new(InMemoryTaxiRequestRepository::default()),
            routing_rules: Arc::new(InMemoryRoutingRuleRepository::default()),
            budgets: Arc::new(InMemoryBudgetRepository::default()),
            feedback: Arc::new(InMemoryFeedbackRepository::default()),
            overrides: Arc::new(InMemoryEmployeeOverrideRepository::default()),
            accounts: Arc::new(InMemoryAccountRepository::default()),
            notifications: Arc::new(InMemoryNotificationLogRepository::default()),
            decision_links: Arc::new(InMemoryDecisionLinkRepository::default()),
            audit: Arc::new(InMemoryAuditRepository::default()),
        }
    }
}

/// Workflow knobs lifted out of [`AppConfig`] once at startup.
#[derive(Clone, Debug)]
pub struct WorkflowSettings {
    pub public_base_url: String,
    pub admin_team_emails: Vec<String>,
    pub admin_team_phones: Vec<String>,
    pub budget_ledger: BudgetLedger,
    pub decision_link_ttl: Duration,
    pub reminders: RemindersConfig,
    pub default_country_code: String,
}

impl WorkflowSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            public_base_url: config.server.public_base_url.trim_end_matches('/').to_string(),
            admin_team_emails: config.admin.team_emails.clone(),
            admin_team_phones: config.admin.team_phones.clone(),
            budget_ledger: BudgetLedger::new(Decimal::from(config.budget.warning_threshold_pct)),
            decision_link_ttl: Duration::hours(DECISION_LINK_TTL_HOURS),
            reminders: config.reminders.clone(),
            default_country_code: config.whatsapp.default_country_code.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub profiles: Arc<ProfileService>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub signer: Arc<SessionSigner>,
    pub settings: Arc<WorkflowSettings>,
    pub pages: Arc<Tera>,
}
