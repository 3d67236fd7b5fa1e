use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use cabflow_core::errors::{ApplicationError, InterfaceError};

/// JSON error body. `error` is a stable machine code, `message` is safe to
/// show to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApiError {
    pub error: &'static str,
    pub message: String,
    pub correlation_id: String,
}

pub type ApiFailure = (StatusCode, Json<ApiError>);
pub type ApiResult<T> = Result<T, ApiFailure>;

pub fn failure(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    correlation_id: &str,
) -> ApiFailure {
    (
        status,
        Json(ApiError {
            error: code,
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        }),
    )
}

pub fn unauthorized(message: impl Into<String>, correlation_id: &str) -> ApiFailure {
    failure(StatusCode::UNAUTHORIZED, "unauthorized", message, correlation_id)
}

pub fn gone(message: impl Into<String>, correlation_id: &str) -> ApiFailure {
    failure(StatusCode::GONE, "gone", message, correlation_id)
}

/// Maps through the interface tier so internal details never reach clients.
pub fn from_application(error: ApplicationError, correlation_id: &str) -> ApiFailure {
    let interface = error.into_interface(correlation_id);
    let (status, code) = match &interface {
        InterfaceError::BadRequest { .. } => (StatusCode::BAD_REQUEST, "validation_failed"),
        InterfaceError::Forbidden { .. } => (StatusCode::FORBIDDEN, "forbidden"),
        InterfaceError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        InterfaceError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
        InterfaceError::ServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
        }
        InterfaceError::Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    };

    let message = match &interface {
        InterfaceError::ServiceUnavailable { message, .. }
        | InterfaceError::Internal { message, .. } => {
            error!(
                event_name = "api.request.failed",
                correlation_id = %correlation_id,
                error = %message,
                "request failed"
            );
            interface.user_message().to_string()
        }
        _ => {
            warn!(
                event_name = "api.request.rejected",
                correlation_id = %correlation_id,
                status = status.as_u16(),
                error = %interface.message(),
                "request rejected"
            );
            interface.message().to_string()
        }
    };

    failure(status, code, message, correlation_id)
}

/// Handler-side error carrying its correlation id, so `?` works on
/// `ApplicationError` inside handlers.
#[derive(Debug)]
pub struct HandlerError {
    pub error: ApplicationError,
    pub correlation_id: String,
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        from_application(self.error, &self.correlation_id).into_response()
    }
}

pub trait WithCorrelation<T> {
    fn with_correlation(self, correlation_id: &str) -> ApiResult<T>;
}

impl<T, E> WithCorrelation<T> for Result<T, E>
where
    E: Into<ApplicationError>,
{
    fn with_correlation(self, correlation_id: &str) -> ApiResult<T> {
        self.map_err(|error| from_application(error.into(), correlation_id))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::from_application;
    use cabflow_core::errors::{ApplicationError, DomainError};

    #[test]
    fn persistence_details_are_hidden_from_clients() {
        let (status, body) =
            from_application(ApplicationError::Persistence("disk I/O error".into()), "corr-1");
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!body.message.contains("disk"));
        assert_eq!(body.correlation_id, "corr-1");
    }

    #[test]
    fn validation_problems_are_returned_verbatim() {
        let (status, body) = from_application(
            DomainError::Validation(vec!["passengers must be between 1 and 6".into()]).into(),
            "corr-2",
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error, "validation_failed");
        assert_eq!(body.message, "passengers must be between 1 and 6");
    }
}
