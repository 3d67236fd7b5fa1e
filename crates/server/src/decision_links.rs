//! One-click manager decisions from the approval email.
//!
//! The token in the link is the only credential: it is bound to one request
//! and one approver, expires, and is consumed on first use.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Form, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tera::{Context, Tera};
use tracing::{error, info};

use cabflow_core::domain::account::Role;
use cabflow_core::domain::booking::{RequestStatus, TaxiRequest};
use cabflow_core::errors::ApplicationError;
use cabflow_db::repositories::DecisionLink;
use cabflow_notify::RequestView;

use crate::auth::{AuthUser, CorrelationId};
use crate::error::from_application;
use crate::state::AppState;
use crate::workflow::{self, ManagerDecisionInput, Verdict};

type PageResult = Result<Html<String>, (StatusCode, Html<String>)>;

const DISPLAY_TIME: &str = "%d %b %Y %H:%M UTC";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/decision/{token}", get(decision_page))
        .route("/decision/{token}/approve", post(approve_via_link))
        .route("/decision/{token}/reject", post(reject_via_link))
}

/// Portal pages compiled into the binary.
pub fn portal_pages() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("decision.html", include_str!("../../../templates/portal/decision.html")),
        ("message.html", include_str!("../../../templates/portal/message.html")),
    ])?;
    Ok(tera)
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DecisionForm {
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn decision_page(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    Path(token): Path<String>,
) -> PageResult {
    let (link, request) = usable_link(&state, &token, Utc::now(), &correlation_id).await?;

    let mut context = Context::new();
    context.insert("request", &RequestView::from(&request));
    context.insert("token", &link.token);
    context.insert("expires_at", &link.expires_at.format(DISPLAY_TIME).to_string());
    render(&state.pages, "decision.html", &context, StatusCode::OK)
}

pub async fn approve_via_link(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    Path(token): Path<String>,
    Form(form): Form<DecisionForm>,
) -> PageResult {
    decide(&state, &correlation_id, &token, Verdict::Approve, form.comment).await
}

pub async fn reject_via_link(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    Path(token): Path<String>,
    Form(form): Form<DecisionForm>,
) -> PageResult {
    decide(&state, &correlation_id, &token, Verdict::Reject, form.comment).await
}

async fn decide(
    state: &AppState,
    correlation_id: &str,
    token: &str,
    decision: Verdict,
    comment: Option<String>,
) -> PageResult {
    let now = Utc::now();
    let (link, _) = usable_link(state, token, now, correlation_id).await?;

    let comment = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
    if decision == Verdict::Reject && comment.is_none() {
        return Err(message(
            state,
            StatusCode::BAD_REQUEST,
            "Reason required",
            "Please give a reason when rejecting a request. The link is still valid.",
            Some(&link),
        ));
    }

    let consumed = state
        .repos
        .decision_links
        .consume(&link.token, now)
        .await
        .map_err(|error| unavailable(state, correlation_id, error.into()))?;
    if !consumed {
        return Err(gone(state, "This decision link has already been used.", Some(&link)));
    }

    let actor = AuthUser {
        employee_id: link.approver_id.clone(),
        role: Role::Manager,
        correlation_id: correlation_id.to_string(),
    };
    let input = ManagerDecisionInput { decision, comment };
    match workflow::manager_decide(state, &actor, &link.reference_id, input, now).await {
        Ok(request) => {
            info!(
                event_name = "decision_link.used",
                correlation_id = %correlation_id,
                reference_id = %request.id,
                decision = ?decision,
                "manager decided through email link"
            );
            let (title, text) = match decision {
                Verdict::Approve => {
                    ("Request approved", "Thanks. The transport desk will arrange the cab.")
                }
                Verdict::Reject => ("Request rejected", "Thanks. The requester has been told."),
            };
            message_ok(state, title, text, &link)
        }
        Err(error) => {
            let (status, body) = from_application(error, correlation_id);
            Err(message(state, status, "Could not record decision", &body.0.message, Some(&link)))
        }
    }
}

async fn usable_link(
    state: &AppState,
    token: &str,
    now: DateTime<Utc>,
    correlation_id: &str,
) -> Result<(DecisionLink, TaxiRequest), (StatusCode, Html<String>)> {
    let link = state
        .repos
        .decision_links
        .find(token.trim())
        .await
        .map_err(|error| unavailable(state, correlation_id, error.into()))?
        .ok_or_else(|| {
            message(
                state,
                StatusCode::NOT_FOUND,
                "Link not found",
                "This decision link is not valid. Open the taxi desk to review pending requests.",
                None,
            )
        })?;

    if !link.is_usable(now) {
        return Err(gone(
            state,
            "This decision link has already been used or has expired.",
            Some(&link),
        ));
    }

    let request = workflow::load(state, &link.reference_id)
        .await
        .map_err(|error| unavailable(state, correlation_id, error))?;
    if request.status != RequestStatus::PendingManagerApproval {
        let text = format!("This request is already {}.", request.status.label().to_lowercase());
        return Err(gone(state, &text, Some(&link)));
    }

    Ok((link, request))
}

fn render(
    pages: &Tera,
    template: &str,
    context: &Context,
    status: StatusCode,
) -> PageResult {
    match pages.render(template, context) {
        Ok(html) if status.is_success() => Ok(Html(html)),
        Ok(html) => Err((status, Html(html))),
        Err(error) => {
            error!(event_name = "portal.render.failed", template, error = %error, "template error");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<h1>Something went wrong</h1>".to_string()),
            ))
        }
    }
}

fn message_context(title: &str, text: &str, link: Option<&DecisionLink>) -> Context {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("message", text);
    context.insert("reference_id", &link.map(|link| link.reference_id.0.clone()));
    context
}

fn message(
    state: &AppState,
    status: StatusCode,
    title: &str,
    text: &str,
    link: Option<&DecisionLink>,
) -> (StatusCode, Html<String>) {
    match render(&state.pages, "message.html", &message_context(title, text, link), status) {
        Ok(html) => (status, html),
        Err(failure) => failure,
    }
}

fn message_ok(state: &AppState, title: &str, text: &str, link: &DecisionLink) -> PageResult {
    render(&state.pages, "message.html", &message_context(title, text, Some(link)), StatusCode::OK)
}

fn gone(state: &AppState, text: &str, link: Option<&DecisionLink>) -> (StatusCode, Html<String>) {
    message(state, StatusCode::GONE, "Link no longer valid", text, link)
}

fn unavailable(
    state: &AppState,
    correlation_id: &str,
    error: ApplicationError,
) -> (StatusCode, Html<String>) {
    let (status, body) = from_application(error, correlation_id);
    message(state, status, "Taxi desk unavailable", &body.0.message, None)
}
