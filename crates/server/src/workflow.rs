//! Request lifecycle operations shared by the JSON API, the decision-link
//! pages and the reminder job.
//!
//! Every state change goes through the flow engine so that the transition is
//! audited, then the request row is saved, and only then are notifications
//! sent. Notification failures are logged to `notification_log` and never
//! roll back a decision.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use cabflow_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
};
use cabflow_core::budget::{BudgetCheck, BudgetLedger};
use cabflow_core::domain::account::Role;
use cabflow_core::domain::booking::{
    AdminArrangement, Decision, ReferenceId, RequestStatus, Requester, TaxiRequest, TripDetails,
};
use cabflow_core::domain::feedback::TripFeedback;
use cabflow_core::errors::{ApplicationError, DomainError};
use cabflow_core::flows::{
    FlowAction, FlowContext, FlowEngine, FlowEvent, FlowState, TransitionOutcome,
};
use cabflow_core::phone::normalize_optional_phone;
use cabflow_core::routing::{ApprovalRouter, RouteRequest};
use cabflow_db::repositories::{DecisionLink, NotificationLogEntry};
use cabflow_notify::{Notification, NotificationContent, NotificationKind, Recipient, RequestView};

use crate::auth::AuthUser;
use crate::state::AppState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Reject,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ManagerDecisionInput {
    pub decision: Verdict,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AdminDecisionInput {
    pub decision: Verdict,
    #[serde(default)]
    pub arrangement: Option<AdminArrangement>,
    #[serde(default)]
    pub override_budget: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AdminDecisionOutcome {
    pub request: TaxiRequest,
    pub budget: Option<BudgetCheck>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FeedbackInput {
    pub rating: u8,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub driver_on_time: Option<bool>,
    #[serde(default)]
    pub vehicle_clean: Option<bool>,
    #[serde(default)]
    pub actual_fare: Option<Decimal>,
}

pub async fn submit(
    state: &AppState,
    actor: &AuthUser,
    trip: TripDetails,
    now: DateTime<Utc>,
) -> Result<TaxiRequest, ApplicationError> {
    trip.validate(now)?;

    let profile = state.profiles.resolve(&actor.employee_id).await?;
    let router = ApprovalRouter::new(state.repos.routing_rules.list_active().await?);
    let route = router
        .resolve(&RouteRequest {
            employee_id: profile.employee_id.clone(),
            department: profile.department.clone(),
            location: profile.location.clone(),
            sap_manager: profile.manager.clone(),
        })
        .map_err(|error| ApplicationError::Conflict(error.to_string()))?;

    let id = ReferenceId::generate(now);
    let sink = InMemoryAuditSink::default();
    let audit = AuditContext::new(Some(id.clone()), &actor.correlation_id, actor.actor());
    let result = FlowEngine::default().apply_with_audit(
        &FlowState::Draft,
        &FlowEvent::Submitted,
        &FlowContext {
            manager_stage_required: route.manager_stage_required,
            missing_required_fields: trip.missing_fields(),
        },
        &sink,
        &audit,
    );
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(error) => {
            persist_audit(state, sink.drain()).await;
            return Err(DomainError::from(error).into());
        }
    };
    let status = landed_status(&outcome)?;

    // Self-approval skips the manager stage; record who stood in for it.
    let manager_decision = (!route.manager_stage_required).then(|| Decision {
        actor_id: profile.employee_id.0.clone(),
        comment: Some("requester is the routed approver".to_string()),
        decided_at: now,
    });

    let request = TaxiRequest {
        id: id.clone(),
        requester: Requester {
            employee_id: profile.employee_id.clone(),
            name: profile.display_name.clone(),
            email: profile.email.clone(),
            phone: normalize_optional_phone(
                profile.phone.as_deref(),
                &state.settings.default_country_code,
            ),
        },
        department: profile.department.clone(),
        location: profile.location.clone(),
        trip,
        approver: route.approver.clone(),
        routing_rule_id: route.rule_id,
        status,
        manager_decision,
        admin_decision: None,
        arrangement: None,
        rejection_reason: None,
        reminder_count: 0,
        last_reminder_at: None,
        stage_entered_at: now,
        created_at: now,
        updated_at: now,
    };
    state.repos.requests.save(request.clone()).await?;

    sink.emit(
        AuditEvent::new(
            Some(id.clone()),
            &actor.correlation_id,
            "routing.approver_resolved",
            AuditCategory::Routing,
            actor.actor(),
            AuditOutcome::Success,
        )
        .with_metadata("approver_id", route.approver.employee_id.0.clone())
        .with_metadata("source", format!("{:?}", route.source))
        .with_metadata(
            "rule_id",
            route.rule_id.map(|rule| rule.to_string()).unwrap_or_else(|| "none".to_string()),
        ),
    );
    persist_audit(state, sink.drain()).await;

    info!(
        event_name = "workflow.request.submitted",
        correlation_id = %actor.correlation_id,
        reference_id = %request.id,
        approver_id = %request.approver.employee_id,
        status = request.status.as_key(),
        "taxi request submitted"
    );

    run_actions(state, &request, &outcome.actions, now).await;
    Ok(request)
}

pub async fn cancel(
    state: &AppState,
    actor: &AuthUser,
    reference: &ReferenceId,
    now: DateTime<Utc>,
) -> Result<TaxiRequest, ApplicationError> {
    let mut request = load(state, reference).await?;
    if !request.is_requested_by(actor.employee_id.as_str()) {
        return Err(ApplicationError::Forbidden(
            "only the requester may cancel a request".to_string(),
        ));
    }

    let outcome = transition(state, &mut request, FlowEvent::CancelRequested, actor, now).await?;
    state.repos.requests.save(request.clone()).await?;
    info!(
        event_name = "workflow.request.cancelled",
        correlation_id = %actor.correlation_id,
        reference_id = %request.id,
        "taxi request cancelled"
    );

    run_actions(state, &request, &outcome.actions, now).await;
    Ok(request)
}

pub async fn manager_decide(
    state: &AppState,
    actor: &AuthUser,
    reference: &ReferenceId,
    input: ManagerDecisionInput,
    now: DateTime<Utc>,
) -> Result<TaxiRequest, ApplicationError> {
    let mut request = load(state, reference).await?;
    if !request.is_assigned_to(actor.employee_id.as_str()) {
        return Err(ApplicationError::Forbidden(
            "only the assigned approver may decide this request".to_string(),
        ));
    }

    let comment = clean(input.comment);
    let event = match input.decision {
        Verdict::Approve => FlowEvent::ManagerApproved,
        Verdict::Reject => {
            require_reason(comment.as_deref())?;
            FlowEvent::ManagerRejected
        }
    };

    let outcome = transition(state, &mut request, event, actor, now).await?;
    request.manager_decision = Some(Decision {
        actor_id: actor.employee_id.0.clone(),
        comment: comment.clone(),
        decided_at: now,
    });
    if input.decision == Verdict::Reject {
        request.rejection_reason = comment;
    }
    state.repos.requests.save(request.clone()).await?;

    info!(
        event_name = "workflow.manager.decided",
        correlation_id = %actor.correlation_id,
        reference_id = %request.id,
        decision = ?input.decision,
        status = request.status.as_key(),
        "manager decision recorded"
    );

    run_actions(state, &request, &outcome.actions, now).await;
    Ok(request)
}

pub async fn admin_decide(
    state: &AppState,
    actor: &AuthUser,
    reference: &ReferenceId,
    input: AdminDecisionInput,
    now: DateTime<Utc>,
) -> Result<AdminDecisionOutcome, ApplicationError> {
    if actor.role != Role::Admin {
        return Err(ApplicationError::Forbidden("admin role required".to_string()));
    }

    let mut request = load(state, reference).await?;
    if request.status != RequestStatus::PendingAdminApproval {
        let to = match input.decision {
            Verdict::Approve => RequestStatus::Approved,
            Verdict::Reject => RequestStatus::Rejected,
        };
        return Err(DomainError::InvalidStatusTransition { from: request.status, to }.into());
    }

    let comment = clean(input.comment);
    match input.decision {
        Verdict::Approve => {
            let arrangement = input
                .arrangement
                .ok_or_else(|| {
                    DomainError::Validation(vec!["arrangement is required to approve".to_string()])
                })?
                .normalized(&state.settings.default_country_code)?;

            let period = request.budget_period();
            let budget = state.repos.budgets.find(&request.department, &period).await?;
            let check =
                state.settings.budget_ledger.evaluate(budget.as_ref(), arrangement.estimated_fare);
            if check.blocks_approval() && !input.override_budget {
                audit_budget(state, actor, &request, &check, AuditOutcome::Rejected).await;
                return Err(ApplicationError::Conflict(format!(
                    "{} budget for {period} would be exceeded by {}",
                    request.department,
                    check.shortfall().unwrap_or_default()
                )));
            }

            let outcome =
                transition(state, &mut request, FlowEvent::AdminApproved, actor, now).await?;
            request.admin_decision = Some(Decision {
                actor_id: actor.employee_id.0.clone(),
                comment,
                decided_at: now,
            });
            request.arrangement = Some(arrangement.clone());
            state.repos.requests.save(request.clone()).await?;

            if outcome.actions.contains(&FlowAction::RecordBudgetSpend) {
                let booked = state
                    .repos
                    .budgets
                    .add_spend(&request.department, &period, arrangement.estimated_fare)
                    .await?;
                if booked.is_some() {
                    audit_budget(state, actor, &request, &check, AuditOutcome::Success).await;
                }
            }
            if check.under_pressure() {
                warn!(
                    event_name = "workflow.budget.pressure",
                    correlation_id = %actor.correlation_id,
                    reference_id = %request.id,
                    department = %request.department,
                    period = %period,
                    check = ?check,
                    "department budget under pressure"
                );
            }

            info!(
                event_name = "workflow.admin.approved",
                correlation_id = %actor.correlation_id,
                reference_id = %request.id,
                vendor = %arrangement.vendor_name,
                "booking confirmed"
            );
            run_actions(state, &request, &outcome.actions, now).await;
            Ok(AdminDecisionOutcome { request, budget: Some(check) })
        }
        Verdict::Reject => {
            require_reason(comment.as_deref())?;
            let outcome =
                transition(state, &mut request, FlowEvent::AdminRejected, actor, now).await?;
            request.admin_decision = Some(Decision {
                actor_id: actor.employee_id.0.clone(),
                comment: comment.clone(),
                decided_at: now,
            });
            request.rejection_reason = comment;
            state.repos.requests.save(request.clone()).await?;

            info!(
                event_name = "workflow.admin.rejected",
                correlation_id = %actor.correlation_id,
                reference_id = %request.id,
                "request rejected by admin"
            );
            run_actions(state, &request, &outcome.actions, now).await;
            Ok(AdminDecisionOutcome { request, budget: None })
        }
    }
}

pub async fn submit_feedback(
    state: &AppState,
    actor: &AuthUser,
    reference: &ReferenceId,
    input: FeedbackInput,
    now: DateTime<Utc>,
) -> Result<TripFeedback, ApplicationError> {
    let request = load(state, reference).await?;
    if !request.is_requested_by(actor.employee_id.as_str()) {
        return Err(ApplicationError::Forbidden(
            "only the requester may leave feedback".to_string(),
        ));
    }
    if request.status != RequestStatus::Approved {
        return Err(ApplicationError::Conflict(format!(
            "feedback is only accepted for approved trips (status is {})",
            request.status.label()
        )));
    }
    if now < request.trip.pickup_at {
        return Err(ApplicationError::Conflict("feedback opens after the pickup time".to_string()));
    }

    let feedback = TripFeedback {
        reference_id: request.id.clone(),
        rating: input.rating,
        comments: clean(input.comments),
        driver_on_time: input.driver_on_time,
        vehicle_clean: input.vehicle_clean,
        actual_fare: input.actual_fare.map(|fare| fare.round_dp(2)),
        submitted_by: actor.employee_id.0.clone(),
        submitted_at: now,
    };
    feedback.validate()?;
    state.repos.feedback.insert(feedback.clone()).await?;

    if let (Some(actual), Some(arrangement)) = (feedback.actual_fare, &request.arrangement) {
        let delta = BudgetLedger::fare_adjustment(arrangement.estimated_fare, actual);
        if !delta.is_zero() {
            let adjusted = state
                .repos
                .budgets
                .add_spend(&request.department, &request.budget_period(), delta)
                .await?;
            info!(
                event_name = "workflow.budget.fare_adjusted",
                correlation_id = %actor.correlation_id,
                reference_id = %request.id,
                delta = %delta,
                tracked = adjusted.is_some(),
                "budget adjusted to actual fare"
            );
        }
    }

    info!(
        event_name = "workflow.feedback.recorded",
        correlation_id = %actor.correlation_id,
        reference_id = %request.id,
        rating = feedback.rating,
        "trip feedback recorded"
    );
    Ok(feedback)
}

pub async fn load(
    state: &AppState,
    reference: &ReferenceId,
) -> Result<TaxiRequest, ApplicationError> {
    state
        .repos
        .requests
        .find(reference)
        .await?
        .ok_or_else(|| ApplicationError::NotFound(format!("request {reference} not found")))
}

/// Who may read a request: its requester, its approver and admins.
pub fn can_view(request: &TaxiRequest, actor: &AuthUser) -> bool {
    actor.is_admin()
        || request.is_requested_by(actor.employee_id.as_str())
        || request.is_assigned_to(actor.employee_id.as_str())
}

async fn transition(
    state: &AppState,
    request: &mut TaxiRequest,
    event: FlowEvent,
    actor: &AuthUser,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, ApplicationError> {
    let sink = InMemoryAuditSink::default();
    let audit = AuditContext::new(Some(request.id.clone()), &actor.correlation_id, actor.actor());
    let result = FlowEngine::default().apply_with_audit(
        &FlowState::from(request.status),
        &event,
        &FlowContext::default(),
        &sink,
        &audit,
    );
    persist_audit(state, sink.drain()).await;

    let outcome = result.map_err(DomainError::from)?;
    request.transition_to(landed_status(&outcome)?, now)?;
    Ok(outcome)
}

fn landed_status(outcome: &TransitionOutcome) -> Result<RequestStatus, ApplicationError> {
    outcome.to.status().ok_or_else(|| {
        DomainError::InvariantViolation(format!("flow landed in {:?}", outcome.to)).into()
    })
}

async fn persist_audit(state: &AppState, events: Vec<AuditEvent>) {
    for event in events {
        let event_type = event.event_type.clone();
        if let Err(error) = state.repos.audit.append(event).await {
            warn!(
                event_name = "audit.persist.failed",
                audit_event = %event_type,
                error = %error,
                "failed to persist audit event"
            );
        }
    }
}

async fn audit_budget(
    state: &AppState,
    actor: &AuthUser,
    request: &TaxiRequest,
    check: &BudgetCheck,
    outcome: AuditOutcome,
) {
    let event = AuditEvent::new(
        Some(request.id.clone()),
        &actor.correlation_id,
        "budget.checked",
        AuditCategory::Budget,
        actor.actor(),
        outcome,
    )
    .with_metadata("department", request.department.clone())
    .with_metadata("period", request.budget_period().to_string())
    .with_metadata("check", serde_json::to_string(check).unwrap_or_default());
    persist_audit(state, vec![event]).await;
}

fn clean(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn require_reason(comment: Option<&str>) -> Result<(), DomainError> {
    match comment {
        Some(_) => Ok(()),
        None => Err(DomainError::Validation(vec!["a reason is required to reject".to_string()])),
    }
}

fn requester_recipient(request: &TaxiRequest) -> Recipient {
    Recipient::new(
        request.requester.name.clone(),
        Some(request.requester.email.clone()),
        request.requester.phone.clone(),
    )
}

pub(crate) fn approver_recipient(request: &TaxiRequest) -> Recipient {
    Recipient::new(
        request.approver.name.clone(),
        Some(request.approver.email.clone()),
        request.approver.phone.clone(),
    )
}

pub(crate) fn admin_team_recipients(state: &AppState) -> Vec<Recipient> {
    let emails = state
        .settings
        .admin_team_emails
        .iter()
        .map(|email| Recipient::new("Transport desk", Some(email.clone()), None));
    let phones = state
        .settings
        .admin_team_phones
        .iter()
        .map(|phone| Recipient::new("Transport desk", None, Some(phone.clone())));
    emails.chain(phones).collect()
}

fn is_self_approval(request: &TaxiRequest) -> bool {
    request.is_assigned_to(request.requester.employee_id.as_str())
}

/// Who hears about a flow action, given where the request landed.
fn plan(request: &TaxiRequest, action: &FlowAction) -> Option<(NotificationKind, Audience)> {
    use NotificationKind::*;
    use RequestStatus::*;

    match (action, request.status) {
        (FlowAction::AcknowledgeRequester, _) => Some((RequestSubmitted, Audience::Requester)),
        (FlowAction::NotifyManager, _) if is_self_approval(request) => None,
        (FlowAction::NotifyManager, PendingManagerApproval) => {
            Some((ApprovalNeeded, Audience::Approver))
        }
        (FlowAction::NotifyManager, Approved) => Some((BookingConfirmed, Audience::Approver)),
        (FlowAction::NotifyManager, Rejected) => Some((RequestRejected, Audience::Approver)),
        (FlowAction::NotifyManager, Cancelled) => Some((RequestCancelled, Audience::Approver)),
        (FlowAction::NotifyRequester, PendingAdminApproval) => {
            Some((ManagerDecision, Audience::Requester))
        }
        (FlowAction::NotifyRequester, Approved) => Some((BookingConfirmed, Audience::Requester)),
        (FlowAction::NotifyRequester, Rejected) => Some((RequestRejected, Audience::Requester)),
        (FlowAction::NotifyRequester, Cancelled) => Some((RequestCancelled, Audience::Requester)),
        (FlowAction::NotifyAdminTeam, _) => Some((AdminActionNeeded, Audience::AdminTeam)),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Audience {
    Requester,
    Approver,
    AdminTeam,
}

async fn run_actions(
    state: &AppState,
    request: &TaxiRequest,
    actions: &[FlowAction],
    now: DateTime<Utc>,
) {
    for action in actions {
        let Some((kind, audience)) = plan(request, action) else {
            continue;
        };
        let recipients = match audience {
            Audience::Requester => vec![requester_recipient(request)],
            Audience::Approver => vec![approver_recipient(request)],
            Audience::AdminTeam => admin_team_recipients(state),
        };
        let decision_url = if kind == NotificationKind::ApprovalNeeded {
            issue_decision_link(state, request, now).await
        } else {
            None
        };
        send(state, request, kind, recipients, decision_url, now).await;
    }
}

/// Issues a single-use decision token for the assigned approver. A failure
/// degrades to an email without the one-click link.
pub(crate) async fn issue_decision_link(
    state: &AppState,
    request: &TaxiRequest,
    now: DateTime<Utc>,
) -> Option<String> {
    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let link = DecisionLink {
        token: token.clone(),
        reference_id: request.id.clone(),
        approver_id: request.approver.employee_id.clone(),
        expires_at: now + state.settings.decision_link_ttl,
        used_at: None,
        created_at: now,
    };
    match state.repos.decision_links.issue(link).await {
        Ok(()) => Some(format!("{}/decision/{token}", state.settings.public_base_url)),
        Err(error) => {
            warn!(
                event_name = "workflow.decision_link.failed",
                reference_id = %request.id,
                error = %error,
                "could not issue decision link"
            );
            None
        }
    }
}

/// Dispatches one notification and records every delivery attempt.
pub(crate) async fn send(
    state: &AppState,
    request: &TaxiRequest,
    kind: NotificationKind,
    recipients: Vec<Recipient>,
    decision_url: Option<String>,
    now: DateTime<Utc>,
) -> usize {
    if recipients.is_empty() {
        warn!(
            event_name = "workflow.notify.no_recipients",
            reference_id = %request.id,
            kind = kind.as_key(),
            "no recipients configured"
        );
        return 0;
    }

    let notification = Notification {
        kind,
        reference_id: request.id.clone(),
        recipients,
        content: NotificationContent {
            request: RequestView::from(request),
            portal_url: state.settings.public_base_url.clone(),
            decision_url,
            decision_link_hours: state.settings.decision_link_ttl.num_hours(),
        },
    };

    let reports = state.dispatcher.dispatch(&notification).await;
    let mut delivered = 0;
    for report in reports {
        if report.delivered {
            delivered += 1;
        }
        let entry = NotificationLogEntry {
            id: None,
            reference_id: request.id.clone(),
            kind: report.kind.as_key().to_string(),
            channel: report.channel.as_key().to_string(),
            recipient: report.recipient,
            delivered: report.delivered,
            attempts: report.attempts,
            error: report.error,
            sent_at: now,
        };
        if let Err(error) = state.repos.notifications.append(entry).await {
            warn!(
                event_name = "workflow.notify.log_failed",
                reference_id = %request.id,
                error = %error,
                "failed to record notification attempt"
            );
        }
    }
    delivered
}
