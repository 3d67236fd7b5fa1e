use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use cabflow_core::domain::booking::{ReferenceId, TaxiRequest, TripDetails, TripType};
use cabflow_core::domain::feedback::TripFeedback;
use cabflow_core::errors::ApplicationError;

use crate::auth::AuthUser;
use crate::error::{ApiResult, WithCorrelation};
use crate::state::AppState;
use crate::workflow::{self, FeedbackInput};

const DEFAULT_OWN_LIMIT: u32 = 50;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/requests", post(submit_request).get(list_own_requests))
        .route("/api/v1/requests/{reference}", get(get_request))
        .route("/api/v1/requests/{reference}/cancel", post(cancel_request))
        .route("/api/v1/requests/{reference}/feedback", post(submit_feedback))
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubmitRequestBody {
    pub purpose: String,
    pub pickup_location: String,
    pub drop_location: String,
    pub pickup_at: DateTime<Utc>,
    #[serde(default)]
    pub return_at: Option<DateTime<Utc>>,
    pub passengers: u8,
    pub trip_type: TripType,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl From<SubmitRequestBody> for TripDetails {
    fn from(body: SubmitRequestBody) -> Self {
        Self {
            purpose: body.purpose.trim().to_string(),
            pickup_location: body.pickup_location.trim().to_string(),
            drop_location: body.drop_location.trim().to_string(),
            pickup_at: body.pickup_at,
            return_at: body.return_at,
            passengers: body.passengers,
            trip_type: body.trip_type,
            remarks: body.remarks.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

pub async fn submit_request(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<SubmitRequestBody>,
) -> ApiResult<(StatusCode, Json<TaxiRequest>)> {
    let request = workflow::submit(&state, &user, body.into(), Utc::now())
        .await
        .with_correlation(&user.correlation_id)?;
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_own_requests(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<TaxiRequest>>> {
    let limit = query.limit.unwrap_or(DEFAULT_OWN_LIMIT).clamp(1, 200);
    let requests = state
        .repos
        .requests
        .list_for_requester(&user.employee_id, limit)
        .await
        .with_correlation(&user.correlation_id)?;
    Ok(Json(requests))
}

pub async fn get_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
) -> ApiResult<Json<TaxiRequest>> {
    let request = workflow::load(&state, &ReferenceId(reference))
        .await
        .with_correlation(&user.correlation_id)?;
    if !workflow::can_view(&request, &user) {
        let message = format!("request {} is not visible to you", request.id);
        return Err(ApplicationError::Forbidden(message)).with_correlation(&user.correlation_id);
    }
    Ok(Json(request))
}

pub async fn cancel_request(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
) -> ApiResult<Json<TaxiRequest>> {
    let request = workflow::cancel(&state, &user, &ReferenceId(reference), Utc::now())
        .await
        .with_correlation(&user.correlation_id)?;
    Ok(Json(request))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reference): Path<String>,
    Json(body): Json<FeedbackInput>,
) -> ApiResult<(StatusCode, Json<TripFeedback>)> {
    let feedback =
        workflow::submit_feedback(&state, &user, &ReferenceId(reference), body, Utc::now())
            .await
            .with_correlation(&user.correlation_id)?;
    Ok((StatusCode::CREATED, Json(feedback)))
}
