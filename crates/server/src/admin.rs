use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use cabflow_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use cabflow_core::budget::{BudgetPeriod, DepartmentBudget};
use cabflow_core::domain::booking::{ReferenceId, RequestStatus, TaxiRequest};
use cabflow_core::domain::employee::{ApproverContact, EmployeeId, EmployeeOverride};
use cabflow_core::errors::{ApplicationError, DomainError};
use cabflow_core::routing::RoutingRule;
use cabflow_db::repositories::{NotificationLogEntry, RequestFilter};

use crate::auth::AuthUser;
use crate::error::{ApiResult, WithCorrelation};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/admin/routing-rules", get(list_routing_rules).post(save_routing_rule))
        .route("/api/v1/admin/routing-rules/{id}/deactivate", post(deactivate_routing_rule))
        .route("/api/v1/admin/budgets", get(list_budgets).put(set_budget))
        .route("/api/v1/admin/overrides", get(list_overrides))
        .route(
            "/api/v1/admin/overrides/{employee_id}",
            get(get_override).put(put_override).delete(delete_override),
        )
        .route("/api/v1/admin/requests", get(list_requests))
        .route("/api/v1/admin/requests/{reference}/notifications", get(request_notifications))
        .route("/api/v1/admin/requests/{reference}/audit", get(request_audit))
}

#[derive(Clone, Debug, Deserialize)]
pub struct RoutingRuleBody {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub department: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    pub approver: ApproverContact,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub note: Option<String>,
}

fn default_priority() -> i32 {
    100
}

fn default_active() -> bool {
    true
}

impl RoutingRuleBody {
    fn into_rule(self) -> Result<RoutingRule, DomainError> {
        let mut problems = Vec::new();
        if self.department.trim().is_empty() {
            problems.push("department is required (use * for any department)".to_string());
        }
        if self.approver.employee_id.0.trim().is_empty() {
            problems.push("approver.employee_id is required".to_string());
        }
        if self.approver.name.trim().is_empty() {
            problems.push("approver.name is required".to_string());
        }
        if !self.approver.email.contains('@') {
            problems.push("approver.email must be an email address".to_string());
        }
        if !problems.is_empty() {
            return Err(DomainError::Validation(problems));
        }

        let trimmed = |value: Option<String>| {
            value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        Ok(RoutingRule {
            id: self.id.unwrap_or(0),
            priority: self.priority,
            department: self.department.trim().to_string(),
            location: trimmed(self.location),
            employee_id: trimmed(self.employee_id).map(EmployeeId),
            approver: self.approver,
            active: self.active,
            note: trimmed(self.note),
        })
    }
}

pub async fn list_routing_rules(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<RoutingRule>>> {
    user.require_admin()?;
    let rules = state.repos.routing_rules.list_all().await.with_correlation(&user.correlation_id)?;
    Ok(Json(rules))
}

/// Creates a rule when no id is given, otherwise replaces the existing one.
pub async fn save_routing_rule(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<RoutingRuleBody>,
) -> ApiResult<(StatusCode, Json<RoutingRule>)> {
    user.require_admin()?;
    let corr = &user.correlation_id;
    let rule = body.into_rule().with_correlation(corr)?;

    let created = rule.id == 0;
    if !created {
        let existing = state.repos.routing_rules.find(rule.id).await.with_correlation(corr)?;
        if existing.is_none() {
            return Err(ApplicationError::NotFound(format!("routing rule {} not found", rule.id)))
                .with_correlation(corr);
        }
    }

    let saved = state.repos.routing_rules.save(rule).await.with_correlation(corr)?;
    record_admin_event(&state, &user, "routing_rule.saved", |event| {
        event
            .with_metadata("rule_id", saved.id.to_string())
            .with_metadata("department", saved.department.clone())
            .with_metadata("approver_id", saved.approver.employee_id.0.clone())
    })
    .await;
    info!(
        event_name = "admin.routing_rule.saved",
        correlation_id = %corr,
        rule_id = saved.id,
        created,
        "routing rule saved"
    );

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(saved)))
}

pub async fn deactivate_routing_rule(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    let corr = &user.correlation_id;
    if !state.repos.routing_rules.deactivate(id).await.with_correlation(corr)? {
        return Err(ApplicationError::NotFound(format!("routing rule {id} not found")))
            .with_correlation(corr);
    }
    record_admin_event(&state, &user, "routing_rule.deactivated", |event| {
        event.with_metadata("rule_id", id.to_string())
    })
    .await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BudgetQuery {
    pub period: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BudgetView {
    #[serde(flatten)]
    pub budget: DepartmentBudget,
    pub remaining: Decimal,
    pub utilization_pct: Decimal,
}

impl From<DepartmentBudget> for BudgetView {
    fn from(budget: DepartmentBudget) -> Self {
        Self { remaining: budget.remaining(), utilization_pct: budget.utilization_pct(), budget }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BudgetBody {
    pub department: String,
    pub period: String,
    pub allocated: Decimal,
}

pub async fn list_budgets(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<BudgetQuery>,
) -> ApiResult<Json<Vec<BudgetView>>> {
    user.require_admin()?;
    let corr = &user.correlation_id;
    let period = match query.period.as_deref() {
        Some(raw) => BudgetPeriod::parse(raw)
            .map_err(|error| invalid(error.to_string()))
            .with_correlation(corr)?,
        None => BudgetPeriod::from_datetime(Utc::now()),
    };
    let budgets = state.repos.budgets.list_period(&period).await.with_correlation(corr)?;
    Ok(Json(budgets.into_iter().map(BudgetView::from).collect()))
}

pub async fn set_budget(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<BudgetBody>,
) -> ApiResult<Json<BudgetView>> {
    user.require_admin()?;
    let corr = &user.correlation_id;
    let department = body.department.trim();
    let mut problems = Vec::new();
    if department.is_empty() {
        problems.push("department is required".to_string());
    }
    let period = match BudgetPeriod::parse(&body.period) {
        Ok(period) => Some(period),
        Err(error) => {
            problems.push(error.to_string());
            None
        }
    };
    if body.allocated < Decimal::ZERO {
        problems.push("allocated cannot be negative".to_string());
    }
    let Some(period) = period.filter(|_| problems.is_empty()) else {
        return Err(DomainError::Validation(problems)).with_correlation(corr);
    };

    let budget = state
        .repos
        .budgets
        .upsert_allocation(department, &period, body.allocated.round_dp(2))
        .await
        .with_correlation(corr)?;
    record_admin_event(&state, &user, "budget.allocated", |event| {
        event
            .with_metadata("department", budget.department.clone())
            .with_metadata("period", budget.period.to_string())
            .with_metadata("allocated", budget.allocated.to_string())
    })
    .await;
    Ok(Json(budget.into()))
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OverrideBody {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub department: Option<String>,
    pub location: Option<String>,
    pub manager: Option<ApproverContact>,
    pub note: Option<String>,
}

pub async fn list_overrides(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<EmployeeOverride>>> {
    user.require_admin()?;
    let overrides = state.repos.overrides.list().await.with_correlation(&user.correlation_id)?;
    Ok(Json(overrides))
}

pub async fn get_override(
    State(state): State<AppState>,
    user: AuthUser,
    Path(employee_id): Path<String>,
) -> ApiResult<Json<EmployeeOverride>> {
    user.require_admin()?;
    let corr = &user.correlation_id;
    let found = state
        .repos
        .overrides
        .find(&EmployeeId(employee_id.clone()))
        .await
        .with_correlation(corr)?;
    match found {
        Some(patch) => Ok(Json(patch)),
        None => Err(ApplicationError::NotFound(format!("no override for employee {employee_id}")))
            .with_correlation(corr),
    }
}

pub async fn put_override(
    State(state): State<AppState>,
    user: AuthUser,
    Path(employee_id): Path<String>,
    Json(body): Json<OverrideBody>,
) -> ApiResult<Json<EmployeeOverride>> {
    user.require_admin()?;
    let corr = &user.correlation_id;
    let employee_id = employee_id.trim().to_string();
    if employee_id.is_empty() {
        return Err(invalid("employee_id is required".to_string())).with_correlation(corr);
    }
    if let Some(email) = body.email.as_deref().filter(|e| !e.trim().is_empty()) {
        if !email.contains('@') {
            return Err(invalid(format!("`{email}` is not an email address")))
                .with_correlation(corr);
        }
    }

    let patch = EmployeeOverride {
        employee_id: EmployeeId(employee_id),
        display_name: body.display_name,
        email: body.email,
        phone: body.phone,
        department: body.department,
        location: body.location,
        manager: body.manager,
        note: body.note,
    };
    state.repos.overrides.save(patch.clone()).await.with_correlation(corr)?;
    record_admin_event(&state, &user, "employee_override.saved", |event| {
        event.with_metadata("employee_id", patch.employee_id.0.clone())
    })
    .await;
    Ok(Json(patch))
}

pub async fn delete_override(
    State(state): State<AppState>,
    user: AuthUser,
    Path(employee_id): Path<String>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    let corr = &user.correlation_id;
    let id = EmployeeId(employee_id);
    if !state.repos.overrides.delete(&id).await.with_correlation(corr)? {
        return Err(ApplicationError::NotFound(format!("no override for employee {id}")))
            .with_correlation(corr);
    }
    record_admin_event(&state, &user, "employee_override.deleted", |event| {
        event.with_metadata("employee_id", id.0.clone())
    })
    .await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AdminRequestQuery {
    pub status: Option<String>,
    pub department: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

pub async fn list_requests(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<AdminRequestQuery>,
) -> ApiResult<Json<Vec<TaxiRequest>>> {
    user.require_admin()?;
    let corr = &user.correlation_id;
    let status = match query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => match RequestStatus::parse_key(raw) {
            Some(status) => Some(status),
            None => {
                return Err(invalid(format!("unknown status `{raw}`"))).with_correlation(corr);
            }
        },
        None => None,
    };

    let filter = RequestFilter {
        status,
        department: query.department.filter(|d| !d.trim().is_empty()),
        pickup_from: query.from,
        pickup_to: query.to,
        limit: query.limit,
    };
    let requests = state.repos.requests.list(&filter).await.with_correlation(corr)?;
    Ok(Json(requests))
}

pub async fn request_notifications(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
) -> ApiResult<Json<Vec<NotificationLogEntry>>> {
    user.require_admin()?;
    let entries = state
        .repos
        .notifications
        .list_for_reference(&ReferenceId(reference))
        .await
        .with_correlation(&user.correlation_id)?;
    Ok(Json(entries))
}

pub async fn request_audit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
) -> ApiResult<Json<Vec<AuditEvent>>> {
    user.require_admin()?;
    let events = state
        .repos
        .audit
        .list_for_reference(&ReferenceId(reference))
        .await
        .with_correlation(&user.correlation_id)?;
    Ok(Json(events))
}

fn invalid(message: String) -> DomainError {
    DomainError::Validation(vec![message])
}

async fn record_admin_event(
    state: &AppState,
    user: &AuthUser,
    event_type: &str,
    decorate: impl FnOnce(AuditEvent) -> AuditEvent,
) {
    let event = decorate(AuditEvent::new(
        None,
        &user.correlation_id,
        event_type,
        AuditCategory::Admin,
        user.actor(),
        AuditOutcome::Success,
    ));
    if let Err(error) = state.repos.audit.append(event).await {
        tracing::warn!(
            event_name = "audit.persist.failed",
            audit_event = event_type,
            error = %error,
            "failed to persist admin audit event"
        );
    }
}
