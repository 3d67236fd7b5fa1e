use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use cabflow_core::domain::booking::{ReferenceId, TaxiRequest};

use crate::auth::AuthUser;
use crate::error::{ApiResult, WithCorrelation};
use crate::state::AppState;
use crate::workflow::{self, AdminDecisionInput, AdminDecisionOutcome, ManagerDecisionInput};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/approvals/pending", get(pending))
        .route("/api/v1/approvals/{reference}/manager", post(manager_decision))
        .route("/api/v1/approvals/{reference}/admin", post(admin_decision))
}

/// Admins see the transport desk queue; everyone else sees what is waiting
/// on them as approver.
pub async fn pending(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<TaxiRequest>>> {
    let requests = if user.is_admin() {
        state.repos.requests.list_pending_for_admin().await
    } else {
        state.repos.requests.list_pending_for_approver(&user.employee_id).await
    };
    Ok(Json(requests.with_correlation(&user.correlation_id)?))
}

pub async fn manager_decision(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
    Json(body): Json<ManagerDecisionInput>,
) -> ApiResult<Json<TaxiRequest>> {
    let request =
        workflow::manager_decide(&state, &user, &ReferenceId(reference), body, Utc::now())
            .await
            .with_correlation(&user.correlation_id)?;
    Ok(Json(request))
}

pub async fn admin_decision(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
    Json(body): Json<AdminDecisionInput>,
) -> ApiResult<Json<AdminDecisionOutcome>> {
    user.require_admin()?;
    let outcome = workflow::admin_decide(&state, &user, &ReferenceId(reference), body, Utc::now())
        .await
        .with_correlation(&user.correlation_id)?;
    Ok(Json(outcome))
}
