use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use cabflow_core::audit::AuditEvent;
use cabflow_core::budget::{BudgetPeriod, DepartmentBudget};
use cabflow_core::domain::account::EmployeeAccount;
use cabflow_core::domain::booking::{ReferenceId, RequestStatus, TaxiRequest};
use cabflow_core::domain::employee::{EmployeeId, EmployeeOverride};
use cabflow_core::domain::feedback::TripFeedback;
use cabflow_core::routing::RoutingRule;

use super::{
    AccountRepository, AuditRepository, BudgetRepository, DecisionLink, DecisionLinkRepository,
    EmployeeOverrideRepository, FeedbackRepository, NotificationLogEntry,
    NotificationLogRepository, OverdueQuery, RepositoryError, RequestFilter,
    RoutingRuleRepository, TaxiRequestRepository,
};

fn key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[derive(Default)]
pub struct InMemoryTaxiRequestRepository {
    requests: RwLock<HashMap<String, TaxiRequest>>,
}

impl InMemoryTaxiRequestRepository {
    async fn collect_sorted(
        &self,
        predicate: impl Fn(&TaxiRequest) -> bool,
        newest_first: bool,
    ) -> Vec<TaxiRequest> {
        let requests = self.requests.read().await;
        let mut matched: Vec<TaxiRequest> =
            requests.values().filter(|request| predicate(request)).cloned().collect();
        matched.sort_by_key(|request| request.created_at);
        if newest_first {
            matched.reverse();
        }
        matched
    }
}

#[async_trait::async_trait]
impl TaxiRequestRepository for InMemoryTaxiRequestRepository {
    async fn find(&self, id: &ReferenceId) -> Result<Option<TaxiRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn save(&self, request: TaxiRequest) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        requests.insert(request.id.0.clone(), request);
        Ok(())
    }

    async fn list_for_requester(
        &self,
        employee_id: &EmployeeId,
        limit: u32,
    ) -> Result<Vec<TaxiRequest>, RepositoryError> {
        let mut matched = self
            .collect_sorted(|request| request.is_requested_by(employee_id.as_str()), true)
            .await;
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn list_pending_for_approver(
        &self,
        approver_id: &EmployeeId,
    ) -> Result<Vec<TaxiRequest>, RepositoryError> {
        Ok(self
            .collect_sorted(
                |request| {
                    request.status == RequestStatus::PendingManagerApproval
                        && request.is_assigned_to(approver_id.as_str())
                },
                false,
            )
            .await)
    }

    async fn list_pending_for_admin(&self) -> Result<Vec<TaxiRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut matched: Vec<TaxiRequest> = requests
            .values()
            .filter(|request| request.status == RequestStatus::PendingAdminApproval)
            .cloned()
            .collect();
        matched.sort_by(|left, right| {
            left.stage_entered_at
                .cmp(&right.stage_entered_at)
                .then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(matched)
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<TaxiRequest>, RepositoryError> {
        let mut matched = self.collect_sorted(|request| filter.matches(request), true).await;
        matched.truncate(filter.effective_limit() as usize);
        Ok(matched)
    }

    async fn list_overdue(&self, query: OverdueQuery) -> Result<Vec<TaxiRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut matched: Vec<TaxiRequest> =
            requests.values().filter(|request| query.matches(request)).cloned().collect();
        matched.sort_by_key(|request| request.stage_entered_at);
        Ok(matched)
    }

    async fn record_reminder(
        &self,
        id: &ReferenceId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if let Some(request) = requests.get_mut(&id.0) {
            request.reminder_count += 1;
            request.last_reminder_at = Some(at);
            request.updated_at = at;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRoutingRuleRepository {
    rules: RwLock<BTreeMap<i64, RoutingRule>>,
}

#[async_trait::async_trait]
impl RoutingRuleRepository for InMemoryRoutingRuleRepository {
    async fn list_active(&self) -> Result<Vec<RoutingRule>, RepositoryError> {
        let mut rules = self.list_all().await?;
        rules.retain(|rule| rule.active);
        Ok(rules)
    }

    async fn list_all(&self) -> Result<Vec<RoutingRule>, RepositoryError> {
        let rules = self.rules.read().await;
        let mut listed: Vec<RoutingRule> = rules.values().cloned().collect();
        listed.sort_by_key(|rule| (rule.priority, rule.id));
        Ok(listed)
    }

    async fn find(&self, id: i64) -> Result<Option<RoutingRule>, RepositoryError> {
        let rules = self.rules.read().await;
        Ok(rules.get(&id).cloned())
    }

    async fn save(&self, mut rule: RoutingRule) -> Result<RoutingRule, RepositoryError> {
        let mut rules = self.rules.write().await;
        if rule.id == 0 {
            rule.id = rules.keys().next_back().copied().unwrap_or(0) + 1;
        } else if !rules.contains_key(&rule.id) {
            return Err(RepositoryError::Conflict(format!(
                "routing rule {} does not exist",
                rule.id
            )));
        }
        rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    async fn deactivate(&self, id: i64) -> Result<bool, RepositoryError> {
        let mut rules = self.rules.write().await;
        match rules.get_mut(&id) {
            Some(rule) if rule.active => {
                rule.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryBudgetRepository {
    budgets: RwLock<HashMap<(String, BudgetPeriod), DepartmentBudget>>,
}

#[async_trait::async_trait]
impl BudgetRepository for InMemoryBudgetRepository {
    async fn find(
        &self,
        department: &str,
        period: &BudgetPeriod,
    ) -> Result<Option<DepartmentBudget>, RepositoryError> {
        let budgets = self.budgets.read().await;
        Ok(budgets.get(&(key(department), period.clone())).cloned())
    }

    async fn upsert_allocation(
        &self,
        department: &str,
        period: &BudgetPeriod,
        allocated: Decimal,
    ) -> Result<DepartmentBudget, RepositoryError> {
        let mut budgets = self.budgets.write().await;
        let entry =
            budgets.entry((key(department), period.clone())).or_insert_with(|| {
                DepartmentBudget {
                    department: department.trim().to_owned(),
                    period: period.clone(),
                    allocated,
                    spent: Decimal::ZERO,
                }
            });
        entry.allocated = allocated;
        Ok(entry.clone())
    }

    async fn add_spend(
        &self,
        department: &str,
        period: &BudgetPeriod,
        amount: Decimal,
    ) -> Result<Option<DepartmentBudget>, RepositoryError> {
        let mut budgets = self.budgets.write().await;
        Ok(budgets.get_mut(&(key(department), period.clone())).map(|budget| {
            budget.spent = (budget.spent + amount).max(Decimal::ZERO);
            budget.clone()
        }))
    }

    async fn list_period(
        &self,
        period: &BudgetPeriod,
    ) -> Result<Vec<DepartmentBudget>, RepositoryError> {
        let budgets = self.budgets.read().await;
        let mut listed: Vec<DepartmentBudget> =
            budgets.values().filter(|budget| &budget.period == period).cloned().collect();
        listed.sort_by(|a, b| a.department.cmp(&b.department));
        Ok(listed)
    }
}

#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    feedback: RwLock<HashMap<String, TripFeedback>>,
}

#[async_trait::async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn find(&self, id: &ReferenceId) -> Result<Option<TripFeedback>, RepositoryError> {
        let feedback = self.feedback.read().await;
        Ok(feedback.get(&id.0).cloned())
    }

    async fn insert(&self, entry: TripFeedback) -> Result<(), RepositoryError> {
        let mut feedback = self.feedback.write().await;
        if feedback.contains_key(&entry.reference_id.0) {
            return Err(RepositoryError::Conflict(format!(
                "feedback already recorded for {}",
                entry.reference_id
            )));
        }
        feedback.insert(entry.reference_id.0.clone(), entry);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryEmployeeOverrideRepository {
    overrides: RwLock<BTreeMap<String, EmployeeOverride>>,
}

#[async_trait::async_trait]
impl EmployeeOverrideRepository for InMemoryEmployeeOverrideRepository {
    async fn find(&self, id: &EmployeeId) -> Result<Option<EmployeeOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        Ok(overrides.get(&key(id.as_str())).cloned())
    }

    async fn save(&self, patch: EmployeeOverride) -> Result<(), RepositoryError> {
        let mut overrides = self.overrides.write().await;
        overrides.insert(key(patch.employee_id.as_str()), patch);
        Ok(())
    }

    async fn delete(&self, id: &EmployeeId) -> Result<bool, RepositoryError> {
        let mut overrides = self.overrides.write().await;
        Ok(overrides.remove(&key(id.as_str())).is_some())
    }

    async fn list(&self) -> Result<Vec<EmployeeOverride>, RepositoryError> {
        let overrides = self.overrides.read().await;
        Ok(overrides.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<String, EmployeeAccount>>,
}

#[async_trait::async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<EmployeeAccount>, RepositoryError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&key(username)).cloned())
    }

    async fn save(&self, mut account: EmployeeAccount) -> Result<(), RepositoryError> {
        account.username = key(&account.username);
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.username.clone(), account);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNotificationLogRepository {
    entries: RwLock<Vec<NotificationLogEntry>>,
}

#[async_trait::async_trait]
impl NotificationLogRepository for InMemoryNotificationLogRepository {
    async fn append(&self, mut entry: NotificationLogEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        entry.id = Some(entries.len() as i64 + 1);
        entries.push(entry);
        Ok(())
    }

    async fn list_for_reference(
        &self,
        id: &ReferenceId,
    ) -> Result<Vec<NotificationLogEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|entry| &entry.reference_id == id).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryDecisionLinkRepository {
    links: RwLock<HashMap<String, DecisionLink>>,
}

#[async_trait::async_trait]
impl DecisionLinkRepository for InMemoryDecisionLinkRepository {
    async fn issue(&self, link: DecisionLink) -> Result<(), RepositoryError> {
        let mut links = self.links.write().await;
        if links.contains_key(&link.token) {
            return Err(RepositoryError::Conflict("decision token already issued".to_owned()));
        }
        links.insert(link.token.clone(), link);
        Ok(())
    }

    async fn find(&self, token: &str) -> Result<Option<DecisionLink>, RepositoryError> {
        let links = self.links.read().await;
        Ok(links.get(token).cloned())
    }

    async fn consume(&self, token: &str, at: DateTime<Utc>) -> Result<bool, RepositoryError> {
        let mut links = self.links.write().await;
        match links.get_mut(token) {
            Some(link) if link.is_usable(at) => {
                link.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryAuditRepository {
    events: RwLock<Vec<AuditEvent>>,
}

#[async_trait::async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, event: AuditEvent) -> Result<(), RepositoryError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn list_for_reference(
        &self,
        id: &ReferenceId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|event| event.reference_id.as_ref() == Some(id)).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use cabflow_core::budget::BudgetPeriod;
    use cabflow_core::domain::booking::RequestStatus;
    use cabflow_core::domain::employee::EmployeeId;
    use cabflow_core::routing::RoutingRule;

    use crate::repositories::test_support::{approver, at, fare, sample_request};
    use crate::repositories::{
        BudgetRepository, InMemoryBudgetRepository, InMemoryRoutingRuleRepository,
        InMemoryTaxiRequestRepository, OverdueQuery, RoutingRuleRepository, TaxiRequestRepository,
    };

    #[tokio::test]
    async fn in_memory_request_repo_matches_sql_queue_semantics() {
        let repo = InMemoryTaxiRequestRepository::default();
        let pending = sample_request("TX-261018-MEM001", "E1001", "E2001");
        let mut approved = sample_request("TX-261018-MEM002", "E1001", "E2001");
        approved.status = RequestStatus::Approved;
        repo.save(pending.clone()).await.expect("save");
        repo.save(approved).await.expect("save");

        let queue =
            repo.list_pending_for_approver(&EmployeeId("e2001".to_owned())).await.expect("queue");
        assert_eq!(queue, vec![pending.clone()]);

        let now = at(15);
        let query = OverdueQuery {
            stage_entered_before: now - Duration::hours(4),
            last_reminder_before: now - Duration::minutes(30),
            max_reminders: 1,
        };
        assert_eq!(repo.list_overdue(query).await.expect("overdue").len(), 1);
        repo.record_reminder(&pending.id, now).await.expect("remind");
        assert!(repo.list_overdue(query).await.expect("overdue").is_empty());
    }

    #[tokio::test]
    async fn in_memory_rules_assign_ids_and_deactivate() {
        let repo = InMemoryRoutingRuleRepository::default();
        let saved = repo
            .save(RoutingRule {
                id: 0,
                priority: 10,
                department: "Finance".to_owned(),
                location: None,
                employee_id: None,
                approver: approver("E2001"),
                active: true,
                note: None,
            })
            .await
            .expect("save");
        assert_eq!(saved.id, 1);
        assert!(repo.deactivate(saved.id).await.expect("deactivate"));
        assert!(repo.list_active().await.expect("active").is_empty());
    }

    #[tokio::test]
    async fn in_memory_budget_spend_requires_allocation() {
        let repo = InMemoryBudgetRepository::default();
        let october = BudgetPeriod::parse("2026-10").expect("valid period");
        assert!(repo.add_spend("Finance", &october, fare(10)).await.expect("spend").is_none());
        repo.upsert_allocation("Finance", &october, fare(100)).await.expect("allocate");
        let after = repo
            .add_spend("finance", &october, fare(40))
            .await
            .expect("spend")
            .expect("allocated");
        assert_eq!(after.remaining(), fare(60));
    }
}
