use serde::{Deserialize, Serialize};

use crate::domain::booking::RequestStatus;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    Draft,
    PendingManagerApproval,
    PendingAdminApproval,
    Approved,
    Rejected,
    Cancelled,
}

impl FlowState {
    pub fn status(&self) -> Option<RequestStatus> {
        match self {
            Self::Draft => None,
            Self::PendingManagerApproval => Some(RequestStatus::PendingManagerApproval),
            Self::PendingAdminApproval => Some(RequestStatus::PendingAdminApproval),
            Self::Approved => Some(RequestStatus::Approved),
            Self::Rejected => Some(RequestStatus::Rejected),
            Self::Cancelled => Some(RequestStatus::Cancelled),
        }
    }
}

impl From<RequestStatus> for FlowState {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::PendingManagerApproval => Self::PendingManagerApproval,
            RequestStatus::PendingAdminApproval => Self::PendingAdminApproval,
            RequestStatus::Approved => Self::Approved,
            RequestStatus::Rejected => Self::Rejected,
            RequestStatus::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    Submitted,
    ManagerApproved,
    ManagerRejected,
    AdminApproved,
    AdminRejected,
    CancelRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub manager_stage_required: bool,
    pub missing_required_fields: Vec<String>,
}

impl Default for FlowContext {
    fn default() -> Self {
        Self { manager_stage_required: true, missing_required_fields: Vec::new() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    AcknowledgeRequester,
    NotifyManager,
    NotifyAdminTeam,
    NotifyRequester,
    RecordBudgetSpend,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: FlowState,
    pub to: FlowState,
    pub event: FlowEvent,
    pub actions: Vec<FlowAction>,
}
