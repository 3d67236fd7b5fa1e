use std::convert::Infallible;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use cabflow_core::domain::account::Role;
use cabflow_core::domain::employee::{EmployeeId, EmployeeProfile};
use cabflow_core::security::verify_password;

use crate::error::{failure, unauthorized, ApiFailure, ApiResult, WithCorrelation};
use crate::state::AppState;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/auth/login", post(login)).route("/api/v1/me", get(me))
}

/// Caller correlation id, taken from `x-correlation-id` or freshly minted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    fn from_parts(parts: &Parts) -> Self {
        let supplied = parts
            .headers
            .get(CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.len() <= 128);
        Self(supplied.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string()))
    }
}

impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts))
    }
}

/// The signed-in caller. Also stands in for a manager acting through a
/// decision link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub employee_id: EmployeeId,
    pub role: Role,
    pub correlation_id: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn actor(&self) -> String {
        format!("{}:{}", self.role.as_key(), self.employee_id)
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(failure(
                StatusCode::FORBIDDEN,
                "forbidden",
                "admin role required",
                &self.correlation_id,
            ))
        }
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiFailure;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let CorrelationId(correlation_id) = CorrelationId::from_parts(parts);
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| unauthorized("missing bearer token", &correlation_id))?;

        let claims = state.signer.verify(token, Utc::now()).map_err(|error| {
            warn!(
                event_name = "auth.token.rejected",
                correlation_id = %correlation_id,
                error = %error,
                "session token rejected"
            );
            unauthorized(error.to_string(), &correlation_id)
        })?;

        Ok(Self { employee_id: claims.employee_id, role: claims.role, correlation_id })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub employee_id: String,
    pub role: Role,
}

pub async fn login(
    State(state): State<AppState>,
    CorrelationId(correlation_id): CorrelationId,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let username = body.username.trim();
    let account =
        state.repos.accounts.find_by_username(username).await.with_correlation(&correlation_id)?;

    let Some(account) = account.filter(|account| {
        account.active && verify_password(&body.password, &account.password_hash)
    }) else {
        warn!(
            event_name = "auth.login.failed",
            correlation_id = %correlation_id,
            username = %username,
            "login failed"
        );
        return Err(unauthorized("invalid username or password", &correlation_id));
    };

    let now = Utc::now();
    let token = state
        .signer
        .issue(&account.employee_id, account.role, now)
        .with_correlation(&correlation_id)?;
    info!(
        event_name = "auth.login.succeeded",
        correlation_id = %correlation_id,
        employee_id = %account.employee_id,
        role = account.role.as_key(),
        "login succeeded"
    );

    Ok(Json(LoginResponse {
        token,
        expires_at: now + state.signer.ttl(),
        employee_id: account.employee_id.0,
        role: account.role,
    }))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MeResponse {
    pub role: Role,
    pub profile: EmployeeProfile,
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<MeResponse>> {
    let profile = state
        .profiles
        .resolve(&user.employee_id)
        .await
        .with_correlation(&user.correlation_id)?;
    Ok(Json(MeResponse { role: user.role, profile }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::extract::State;
    use axum::Json;
    use tower::ServiceExt;

    use cabflow_core::domain::account::Role;

    use super::{login, CorrelationId, LoginRequest};
    use crate::test_support::{harness, token_for};

    #[tokio::test]
    async fn login_issues_a_token_that_the_api_accepts() {
        let harness = harness().await;

        let Json(response) = login(
            State(harness.state.clone()),
            CorrelationId("corr-login".to_string()),
            Json(LoginRequest {
                username: "asha".to_string(),
                password: "cabflow-demo".to_string(),
            }),
        )
        .await
        .expect("login");
        assert_eq!(response.employee_id, "E1001");
        assert_eq!(response.token.split('.').count(), 3, "bearer token is a compact JWT");
        let claims = harness.state.signer.verify(&response.token, chrono::Utc::now()).expect("jwt");
        assert_eq!(claims.role, Role::Employee);

        let app = crate::router(harness.state.clone());
        let reply = app
            .oneshot(
                Request::get("/api/v1/me")
                    .header("authorization", format!("Bearer {}", response.token))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(reply.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_password_and_missing_token_are_unauthorized() {
        let harness = harness().await;

        let (status, Json(body)) = login(
            State(harness.state.clone()),
            CorrelationId("corr-bad".to_string()),
            Json(LoginRequest { username: "asha".to_string(), password: "nope".to_string() }),
        )
        .await
        .expect_err("rejected");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body.correlation_id, "corr-bad");

        let app = crate::router(harness.state.clone());
        let reply = app
            .oneshot(Request::get("/api/v1/me").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(reply.status(), StatusCode::UNAUTHORIZED);

        let tampered = format!("{}00", token_for(&harness.state, "E1001", Role::Admin));
        let reply = crate::router(harness.state)
            .oneshot(
                Request::get("/api/v1/me")
                    .header("authorization", format!("Bearer {tampered}"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(reply.status(), StatusCode::UNAUTHORIZED);
    }
}
