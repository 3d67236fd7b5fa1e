pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, TwoStageApprovalFlow};
pub use states::{FlowAction, FlowContext, FlowEvent, FlowState, TransitionOutcome};
