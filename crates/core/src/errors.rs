use thiserror::Error;

use crate::{domain::booking::RequestStatus, flows::FlowTransitionError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid request transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: RequestStatus, to: RequestStatus },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::NotFound { .. } => "The requested booking or resource was not found.",
            Self::Conflict { .. } => {
                "The booking is no longer in a state that allows this action."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Validation(problems)) => {
                Self::BadRequest { message: problems.join("; "), correlation_id: unassigned() }
            }
            ApplicationError::Domain(DomainError::InvariantViolation(message)) => {
                Self::BadRequest { message, correlation_id: unassigned() }
            }
            ApplicationError::Domain(error @ DomainError::InvalidStatusTransition { .. })
            | ApplicationError::Domain(error @ DomainError::FlowTransition(_)) => {
                Self::Conflict { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::NotFound(message) => {
                Self::NotFound { message, correlation_id: unassigned() }
            }
            ApplicationError::Forbidden(message) => {
                Self::Forbidden { message, correlation_id: unassigned() }
            }
            ApplicationError::Conflict(message) => {
                Self::Conflict { message, correlation_id: unassigned() }
            }
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::booking::RequestStatus;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn validation_error_maps_to_bad_request_with_all_problems() {
        let interface = ApplicationError::from(DomainError::Validation(vec![
            "pickup_location is required".to_owned(),
            "passengers must be between 1 and 6".to_owned(),
        ]))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert!(interface.message().contains("pickup_location is required"));
        assert!(interface.message().contains("passengers"));
    }

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::InvalidStatusTransition {
            from: RequestStatus::Approved,
            to: RequestStatus::Cancelled,
        })
        .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(
            interface.user_message(),
            "The booking is no longer in a state that allows this action."
        );
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("smtp relay missing".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.correlation_id(), "req-4");
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn forbidden_and_not_found_keep_their_messages() {
        let forbidden = ApplicationError::Forbidden("not the assigned approver".to_owned())
            .into_interface("req-5");
        let missing =
            ApplicationError::NotFound("TX-261018-ABCDEF".to_owned()).into_interface("req-6");

        assert_eq!(forbidden.message(), "not the assigned approver");
        assert!(matches!(missing, InterfaceError::NotFound { .. }));
    }
}
