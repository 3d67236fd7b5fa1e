use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> FlowState;
    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// HOD first, admin team second.
#[derive(Clone, Debug, Default)]
pub struct TwoStageApprovalFlow;

impl FlowDefinition for TwoStageApprovalFlow {
    fn initial_state(&self) -> FlowState {
        FlowState::Draft
    }

    fn transition(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_two_stage(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> FlowState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &FlowState,
        event: &FlowEvent,
        context: &FlowContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.reference_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.reference_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<TwoStageApprovalFlow> {
    fn default() -> Self {
        Self::new(TwoStageApprovalFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields before transition from {state:?}: {missing_fields:?}")]
    MissingRequiredFields { state: FlowState, missing_fields: Vec<String> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: FlowState, event: FlowEvent },
}

fn transition_two_stage(
    current: &FlowState,
    event: &FlowEvent,
    context: &FlowContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use FlowAction::{
        AcknowledgeRequester, NotifyAdminTeam, NotifyManager, NotifyRequester, RecordBudgetSpend,
    };
    use FlowEvent::{
        AdminApproved, AdminRejected, CancelRequested, ManagerApproved, ManagerRejected, Submitted,
    };
    use FlowState::{
        Approved, Cancelled, Draft, PendingAdminApproval, PendingManagerApproval, Rejected,
    };

    let (to, actions) = match (current, event) {
        (Draft, Submitted) => {
            if !context.missing_required_fields.is_empty() {
                return Err(FlowTransitionError::MissingRequiredFields {
                    state: current.clone(),
                    missing_fields: context.missing_required_fields.clone(),
                });
            }
            if context.manager_stage_required {
                (PendingManagerApproval, vec![NotifyManager, AcknowledgeRequester])
            } else {
                (PendingAdminApproval, vec![NotifyAdminTeam, AcknowledgeRequester])
            }
        }
        (PendingManagerApproval, ManagerApproved) => {
            (PendingAdminApproval, vec![NotifyAdminTeam, NotifyRequester])
        }
        (PendingManagerApproval, ManagerRejected) => (Rejected, vec![NotifyRequester]),
        (PendingAdminApproval, AdminApproved) => {
            (Approved, vec![RecordBudgetSpend, NotifyRequester, NotifyManager])
        }
        (PendingAdminApproval, AdminRejected) => (Rejected, vec![NotifyRequester, NotifyManager]),
        (PendingManagerApproval, CancelRequested) | (PendingAdminApproval, CancelRequested) => {
            (Cancelled, vec![NotifyManager])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::booking::ReferenceId;
    use crate::flows::engine::{FlowEngine, FlowTransitionError, TwoStageApprovalFlow};
    use crate::flows::states::{FlowAction, FlowContext, FlowEvent, FlowState};

    #[test]
    fn two_stage_happy_path() {
        let engine = FlowEngine::new(TwoStageApprovalFlow);
        let context = FlowContext::default();

        let submitted = engine
            .apply(&engine.initial_state(), &FlowEvent::Submitted, &context)
            .expect("draft -> pending manager");
        assert_eq!(submitted.to, FlowState::PendingManagerApproval);
        assert_eq!(
            submitted.actions,
            vec![FlowAction::NotifyManager, FlowAction::AcknowledgeRequester]
        );

        let manager = engine
            .apply(&submitted.to, &FlowEvent::ManagerApproved, &context)
            .expect("pending manager -> pending admin");
        assert_eq!(manager.to, FlowState::PendingAdminApproval);
        assert!(manager.actions.contains(&FlowAction::NotifyAdminTeam));

        let approved = engine
            .apply(&manager.to, &FlowEvent::AdminApproved, &context)
            .expect("pending admin -> approved");
        assert_eq!(approved.to, FlowState::Approved);
        assert_eq!(approved.actions[0], FlowAction::RecordBudgetSpend);
    }

    #[test]
    fn self_approving_requester_goes_straight_to_admin() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(
                &FlowState::Draft,
                &FlowEvent::Submitted,
                &FlowContext { manager_stage_required: false, ..FlowContext::default() },
            )
            .expect("draft -> pending admin");

        assert_eq!(outcome.to, FlowState::PendingAdminApproval);
        assert!(outcome.actions.contains(&FlowAction::NotifyAdminTeam));
        assert!(!outcome.actions.contains(&FlowAction::NotifyManager));
    }

    #[test]
    fn rejection_is_possible_at_both_stages() {
        let engine = FlowEngine::default();
        let context = FlowContext::default();

        let by_manager = engine
            .apply(&FlowState::PendingManagerApproval, &FlowEvent::ManagerRejected, &context)
            .expect("manager reject");
        assert_eq!(by_manager.to, FlowState::Rejected);

        let by_admin = engine
            .apply(&FlowState::PendingAdminApproval, &FlowEvent::AdminRejected, &context)
            .expect("admin reject");
        assert_eq!(by_admin.to, FlowState::Rejected);
        assert!(by_admin.actions.contains(&FlowAction::NotifyManager));
    }

    #[test]
    fn admin_cannot_act_before_manager() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &FlowState::PendingManagerApproval,
                &FlowEvent::AdminApproved,
                &FlowContext::default(),
            )
            .expect_err("admin approval requires manager approval first");

        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                state: FlowState::PendingManagerApproval,
                event: FlowEvent::AdminApproved
            }
        ));
    }

    #[test]
    fn terminal_states_cannot_be_cancelled() {
        let engine = FlowEngine::default();
        for state in [FlowState::Approved, FlowState::Rejected, FlowState::Cancelled] {
            assert!(engine
                .apply(&state, &FlowEvent::CancelRequested, &FlowContext::default())
                .is_err());
        }
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(
                &FlowState::Draft,
                &FlowEvent::Submitted,
                &FlowContext {
                    manager_stage_required: true,
                    missing_required_fields: vec!["pickup_location".to_owned()],
                },
            )
            .expect_err("must reject missing fields");

        assert!(matches!(error, FlowTransitionError::MissingRequiredFields { .. }));
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                &FlowState::PendingManagerApproval,
                &FlowEvent::ManagerApproved,
                &FlowContext::default(),
                &sink,
                &AuditContext::new(
                    Some(ReferenceId("TX-261018-ABC123".to_owned())),
                    "req-42",
                    "E0007",
                ),
            )
            .expect("transition should succeed");

        let _ = engine.apply_with_audit(
            &FlowState::Approved,
            &FlowEvent::ManagerRejected,
            &FlowContext::default(),
            &sink,
            &AuditContext::new(None, "req-43", "E0007"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[1].event_type, "flow.transition_rejected");
    }
}
