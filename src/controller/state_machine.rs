//! Formal finite state machine for the rollout sequencer
//!
//! The transition table lists every legal move between rollout phases and the
//! event that causes it. Guards check the live conditions a transition needs
//! (cluster health, step convergence, an open quorum/health gate); a failed
//! guard keeps the sequencer where it is.

use std::fmt;

use crate::crd::{ClusterHealth, RolloutPhase};

/// Events that trigger rollout phase transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RolloutEvent {
    /// Planned topology differs from live topology
    ChangesDetected,
    /// Ordered change queue has been built
    QueueBuilt,
    /// Diff turned out to be empty
    NothingToDo,
    /// The in-flight change was applied
    StepApplied,
    /// The in-flight change is already reflected in live state
    StepSatisfied,
    /// The in-flight change no longer matches the desired state
    StepStale,
    /// Applying the in-flight change failed and will be retried
    StepRetry,
    /// Applying the in-flight change failed permanently
    StepErrored,
    /// Cursor moved past the last change
    QueueExhausted,
    /// Applied change converged with more changes queued
    StepConverged,
    /// Applied change converged and it was the last one
    RolloutComplete,
    /// Management state switched to Unmanaged
    ManagementSuspended,
    /// Management resumed or the spec generation changed after a step error
    Resumed,
    /// Spec failed planning
    SpecInvalid,
    /// Previously invalid spec plans again
    SpecRecovered,
    /// The resource is being deleted
    Cancelled,
}

impl fmt::Display for RolloutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Context information available during state transitions
#[derive(Debug, Clone)]
pub struct TransitionContext {
    /// Current cluster health
    pub health: ClusterHealth,
    /// Health required to advance past AwaitingHealth
    pub proceed_health: ClusterHealth,
    /// Whether the applied workload reached its target
    pub step_converged: bool,
    /// Health gate waived for an intermediate create while the cluster forms
    pub bootstrapping: bool,
    /// Reason the gate in front of the in-flight change is closed
    pub gate_closed: Option<String>,
    /// Whether the resource is managed
    pub managed: bool,
}

impl TransitionContext {
    pub fn new(health: ClusterHealth, proceed_health: ClusterHealth) -> Self {
        Self {
            health,
            proceed_health,
            step_converged: false,
            bootstrapping: false,
            gate_closed: None,
            managed: true,
        }
    }

    /// Health satisfies the proceed threshold. Red never does, not even
    /// while bootstrapping.
    pub fn health_ok(&self) -> bool {
        self.health != ClusterHealth::Red
            && (self.bootstrapping || self.health.at_least(self.proceed_health))
    }
}

/// A state transition definition with optional guard
#[derive(Debug)]
pub struct Transition {
    /// Source state
    pub from: RolloutPhase,
    /// Target state
    pub to: RolloutPhase,
    /// Event that triggers this transition
    pub event: RolloutEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: RolloutPhase,
        to: RolloutPhase,
        event: RolloutEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: RolloutPhase,
        to: RolloutPhase,
        event: RolloutEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: RolloutPhase,
        event: RolloutEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: RolloutPhase,
        to: RolloutPhase,
        event: RolloutEvent,
        reason: String,
    },
}

/// Formal state machine for rollouts
pub struct RolloutStateMachine {
    transitions: Vec<Transition>,
}

impl Default for RolloutStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RolloutStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        use RolloutEvent as E;
        use RolloutPhase as P;

        let mut transitions = vec![
            // === Idle ===
            Transition::new(P::Idle, P::Diffing, E::ChangesDetected, "Live topology differs from plan"),
            // === Diffing ===
            Transition::new(P::Diffing, P::Applying, E::QueueBuilt, "Change queue built"),
            Transition::new(P::Diffing, P::Idle, E::NothingToDo, "Live topology matches plan"),
            // === Applying ===
            Transition::new(P::Applying, P::AwaitingHealth, E::StepApplied, "Change applied, awaiting health"),
            Transition::new(P::Applying, P::AwaitingHealth, E::StepSatisfied, "Change already live, awaiting health"),
            Transition::new(P::Applying, P::Diffing, E::StepStale, "Queued change no longer matches plan"),
            Transition::new(P::Applying, P::Applying, E::StepRetry, "Change failed, retrying"),
            Transition::new(P::Applying, P::Paused, E::StepErrored, "Change failed permanently"),
            Transition::new(P::Applying, P::Idle, E::QueueExhausted, "No changes left"),
            // === AwaitingHealth ===
            Transition::new(P::AwaitingHealth, P::Applying, E::StepConverged, "Step converged, next change"),
            Transition::new(P::AwaitingHealth, P::Idle, E::RolloutComplete, "Rollout complete"),
            // === Failed ===
            Transition::new(P::Failed, P::Idle, E::SpecRecovered, "Spec plans again"),
            // === Paused (resume to the phase paused from) ===
            Transition::new(P::Paused, P::Idle, E::Resumed, "Resumed"),
            Transition::new(P::Paused, P::Diffing, E::Resumed, "Resumed"),
            Transition::new(P::Paused, P::Applying, E::Resumed, "Resumed"),
            Transition::new(P::Paused, P::AwaitingHealth, E::Resumed, "Resumed"),
            Transition::new(P::Paused, P::Failed, E::Resumed, "Resumed"),
        ];

        // Suspension, invalid specs and cancellation apply from (almost) anywhere
        for from in [
            P::Idle,
            P::Diffing,
            P::Applying,
            P::AwaitingHealth,
            P::Failed,
        ] {
            transitions.push(Transition::new(from, P::Paused, E::ManagementSuspended, "Management suspended"));
        }
        for from in [
            P::Idle,
            P::Diffing,
            P::Applying,
            P::AwaitingHealth,
            P::Paused,
            P::Failed,
        ] {
            transitions.push(Transition::new(from, P::Failed, E::SpecInvalid, "Spec is invalid"));
            transitions.push(Transition::new(from, P::Idle, E::Cancelled, "Rollout cancelled for teardown"));
        }

        Self { transitions }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: &RolloutPhase,
        event: RolloutEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);
        self.resolve(current, event, transition, ctx)
    }

    /// Like [`Self::transition`] for events with several possible targets
    pub fn transition_to(
        &self,
        current: &RolloutPhase,
        event: RolloutEvent,
        target: RolloutPhase,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event && t.to == target);
        self.resolve(current, event, transition, ctx)
    }

    fn resolve(
        &self,
        current: &RolloutPhase,
        event: RolloutEvent,
        transition: Option<&Transition>,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &RolloutPhase, event: &RolloutEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: &RolloutPhase) -> Vec<&RolloutEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *state)
            .map(|t| &t.event)
            .collect()
    }

    /// Check guard conditions for a transition
    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            RolloutEvent::StepApplied => ctx.gate_closed.clone(),
            RolloutEvent::StepConverged | RolloutEvent::RolloutComplete => {
                if !ctx.health_ok() {
                    Some(format!(
                        "Cluster health {} below {}",
                        ctx.health, ctx.proceed_health
                    ))
                } else if !ctx.step_converged {
                    Some("Applied workload has not reached its target".to_string())
                } else {
                    None
                }
            }
            RolloutEvent::Resumed if transition.from == RolloutPhase::Paused && !ctx.managed => {
                Some("Cluster is unmanaged".to_string())
            }
            _ => None,
        }
    }
}
