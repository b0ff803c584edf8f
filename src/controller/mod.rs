pub mod context;
pub mod error;
pub mod reconciler;
pub mod sequencer;
pub mod state_machine;
pub mod status;
pub mod validation;

pub use context::Context;
pub use error::{BackoffConfig, Error, Result};
pub use reconciler::{FINALIZER, error_policy, reconcile};
pub use sequencer::{Decision, Deferral, Effect, Sequencer, SequencerInput};
pub use state_machine::{RolloutEvent, RolloutStateMachine, TransitionContext, TransitionResult};
pub use status::{
    ConditionBuilder, DecisionFlags, RecurringFailure, StatusManager, StatusReport, build_status,
    condition_status, condition_types, derive_phase, recurring_failure, spec_changed, with_failure,
};
pub use validation::{MAX_NODES_PER_POOL, validate_spec};
