//! Rollout sequencer
//!
//! Moves the live topology toward the plan one workload change at a time.
//! Each call to [`Sequencer::step`] is a pure function of the persisted
//! [`RolloutState`], the plan, the observed workloads, a health snapshot and
//! the current time. It fires at most one transition and returns the next
//! state plus at most one [`Effect`] for the reconciler to perform.
//!
//! Waits are persisted as `notBefore`: a reconcile triggered early (for
//! instance by the status write of the previous pass) leaves the state
//! untouched and only requeues for the remaining time.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use super::state_machine::{RolloutEvent, RolloutStateMachine, TransitionContext, TransitionResult};
use crate::config::RolloutPolicy;
use crate::crd::{ChangeKind, ClusterHealth, PauseReason, PlannedChange, RolloutPhase, RolloutState};
use crate::elasticsearch::ClusterStatus;
use crate::topology::{LiveWorkload, QuorumState, TopologyPlan, WorkloadDescriptor};

/// Requeue used while a rollout is moving between phases
pub const STEP_REQUEUE: Duration = Duration::from_secs(2);

/// Everything the sequencer looks at besides its own state
pub struct SequencerInput<'a> {
    pub managed: bool,
    /// `metadata.generation` of the resource
    pub generation: Option<i64>,
    pub plan: &'a TopologyPlan,
    pub live: &'a [LiveWorkload],
    pub health: &'a ClusterStatus,
    pub now: DateTime<Utc>,
}

/// Side effect requested by a step
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    None,
    /// Create, re-render, restart or delete one workload
    Apply(PlannedChange),
}

/// Why a guarded step was not applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Deferral {
    /// Taking the master down would lose quorum
    Quorum(String),
    /// Cluster health is below what the step requires
    Health(String),
}

impl Deferral {
    pub fn message(&self) -> &str {
        match self {
            Deferral::Quorum(m) | Deferral::Health(m) => m,
        }
    }
}

/// Outcome of one sequencer step
#[derive(Clone, Debug)]
pub struct Decision {
    pub state: RolloutState,
    pub effect: Effect,
    /// State to restore when the effect fails
    pub rollback: Option<RolloutState>,
    /// Requeue interval; `None` when the rollout is at rest
    pub requeue: Option<Duration>,
    pub deferred: Option<Deferral>,
    /// The in-flight change has waited longer than the maximum wait
    pub stalled: bool,
    /// Consecutive transient apply failures exceeded the retry budget
    pub retries_exhausted: bool,
    /// The in-flight change was not evaluated because its wait is not over
    pub held: bool,
    /// Events fired during the step, in order
    pub events: Vec<RolloutEvent>,
}

impl Decision {
    fn hold(state: &RolloutState) -> Self {
        Self {
            state: state.clone(),
            effect: Effect::None,
            rollback: None,
            requeue: None,
            deferred: None,
            stalled: false,
            retries_exhausted: false,
            held: false,
            events: Vec::new(),
        }
    }

    /// The step changed the persisted state
    pub fn changed(&self, previous: &RolloutState) -> bool {
        self.state != *previous
    }
}

/// Health-gated, one-change-at-a-time rollout driver
pub struct Sequencer {
    policy: RolloutPolicy,
    machine: RolloutStateMachine,
}

impl Sequencer {
    pub fn new(policy: RolloutPolicy) -> Self {
        Self {
            policy,
            machine: RolloutStateMachine::new(),
        }
    }

    pub fn policy(&self) -> &RolloutPolicy {
        &self.policy
    }

    /// Whether the next step may consult cluster health. Unmanaged and halted
    /// clusters are never probed.
    pub fn needs_health(
        &self,
        state: &RolloutState,
        managed: bool,
        generation: Option<i64>,
        plan: &TopologyPlan,
        live: &[LiveWorkload],
    ) -> bool {
        if !managed {
            return false;
        }
        match state.phase {
            RolloutPhase::Applying | RolloutPhase::AwaitingHealth => true,
            RolloutPhase::Idle | RolloutPhase::Diffing | RolloutPhase::Failed => {
                !diff(plan, live).is_empty()
            }
            RolloutPhase::Paused => match state.pause_reason {
                Some(PauseReason::StepError) => state.halted_generation != generation,
                _ => matches!(
                    state.paused_from,
                    Some(RolloutPhase::Applying | RolloutPhase::AwaitingHealth)
                ) || !diff(plan, live).is_empty(),
            },
        }
    }

    /// Fire at most one transition. Work left after it is picked up by the
    /// next pass after [`STEP_REQUEUE`].
    pub fn step(&self, state: &RolloutState, input: &SequencerInput<'_>) -> Decision {
        let mut decision = Decision::hold(state);
        let more = self.advance(&mut decision, input);
        if decision.requeue.is_none() {
            decision.requeue = match decision.state.phase {
                RolloutPhase::Paused | RolloutPhase::Failed => None,
                RolloutPhase::Idle if !more => None,
                _ => Some(STEP_REQUEUE),
            };
        }
        decision
    }

    /// Halt on a spec that cannot be planned. Nothing is applied until the
    /// spec plans again. An unmanaged rollout stays frozen as it is.
    pub fn fail(
        &self,
        state: &RolloutState,
        managed: bool,
        message: &str,
        generation: Option<i64>,
    ) -> Decision {
        let mut decision = Decision::hold(state);
        if !managed || (state.phase == RolloutPhase::Failed && state.message.as_deref() == Some(message)) {
            return decision;
        }
        let ctx = TransitionContext::new(ClusterHealth::Unknown, self.policy.proceed_health);
        if self.fire(&mut decision, RolloutEvent::SpecInvalid, None, &ctx) {
            decision.state = RolloutState {
                phase: RolloutPhase::Failed,
                halted_generation: generation,
                message: Some(message.to_string()),
                ..RolloutState::default()
            };
        }
        decision
    }

    /// Drop the rollout for teardown
    pub fn cancel(&self, state: &RolloutState) -> Decision {
        let mut decision = Decision::hold(state);
        let ctx = TransitionContext::new(ClusterHealth::Unknown, self.policy.proceed_health);
        if self.fire(&mut decision, RolloutEvent::Cancelled, None, &ctx) {
            decision.state = RolloutState::default();
        }
        decision
    }

    /// Record a failed effect. Retryable failures stay in Applying on the
    /// health backoff schedule; anything else pauses until the spec changes.
    pub fn apply_failed(
        &self,
        decision: &Decision,
        retryable: bool,
        message: &str,
        generation: Option<i64>,
        now: DateTime<Utc>,
    ) -> Decision {
        let base = decision.rollback.as_ref().unwrap_or(&decision.state);
        let mut next = Decision::hold(base);
        let ctx = TransitionContext::new(ClusterHealth::Unknown, self.policy.proceed_health);

        if retryable {
            if !self.fire(&mut next, RolloutEvent::StepRetry, None, &ctx) {
                return next;
            }
            let delay = self.policy.health_backoff.delay_for_attempt(base.attempts);
            let state = &mut next.state;
            state.attempts = base.attempts.saturating_add(1);
            state.waiting_since.get_or_insert_with(|| timestamp(now));
            state.not_before = Some(timestamp(now + to_chrono(delay)));
            state.message = Some(message.to_string());
            next.retries_exhausted = state.attempts >= self.policy.transient_retry_budget;
            next.requeue = Some(delay);
        } else if self.fire(&mut next, RolloutEvent::StepErrored, None, &ctx) {
            let state = &mut next.state;
            state.phase = RolloutPhase::Paused;
            state.paused_from = Some(RolloutPhase::Applying);
            state.pause_reason = Some(PauseReason::StepError);
            state.halted_generation = generation;
            state.not_before = None;
            state.message = Some(message.to_string());
        }
        next
    }

    /// One transition. Returns whether another one can follow right away.
    fn advance(&self, d: &mut Decision, input: &SequencerInput<'_>) -> bool {
        let proceed = self.policy.proceed_health;
        let mut ctx = TransitionContext::new(input.health.health, proceed);
        ctx.managed = input.managed;

        if !input.managed {
            let phase = d.state.phase;
            if phase == RolloutPhase::Paused {
                return false;
            }
            if self.fire(d, RolloutEvent::ManagementSuspended, None, &ctx) {
                d.state.phase = RolloutPhase::Paused;
                d.state.paused_from = Some(phase);
                d.state.pause_reason = Some(PauseReason::Unmanaged);
                d.state.message = Some("Cluster is unmanaged".to_string());
            }
            return false;
        }

        match d.state.phase {
            RolloutPhase::Paused => self.resume(d, input, &ctx),
            RolloutPhase::Failed => {
                if self.fire(d, RolloutEvent::SpecRecovered, None, &ctx) {
                    d.state = RolloutState::default();
                    return true;
                }
                false
            }
            RolloutPhase::Idle => {
                if diff(input.plan, input.live).is_empty() {
                    return false;
                }
                if self.fire(d, RolloutEvent::ChangesDetected, None, &ctx) {
                    d.state.phase = RolloutPhase::Diffing;
                    return true;
                }
                false
            }
            RolloutPhase::Diffing => {
                let queue = diff(input.plan, input.live);
                if queue.is_empty() {
                    if self.fire(d, RolloutEvent::NothingToDo, None, &ctx) {
                        d.state = RolloutState::default();
                    }
                    return false;
                }
                if self.fire(d, RolloutEvent::QueueBuilt, None, &ctx) {
                    debug!(changes = queue.len(), "Built rollout queue");
                    d.state = RolloutState {
                        phase: RolloutPhase::Applying,
                        changes: queue,
                        ..RolloutState::default()
                    };
                    return true;
                }
                false
            }
            RolloutPhase::Applying => self.apply(d, input, ctx),
            RolloutPhase::AwaitingHealth => self.await_health(d, input, ctx),
        }
    }

    fn resume(&self, d: &mut Decision, input: &SequencerInput<'_>, ctx: &TransitionContext) -> bool {
        match d.state.pause_reason {
            Some(PauseReason::StepError) => {
                if d.state.halted_generation == input.generation {
                    return false;
                }
                if self.fire(d, RolloutEvent::Resumed, Some(RolloutPhase::Diffing), ctx) {
                    d.state = RolloutState {
                        phase: RolloutPhase::Diffing,
                        ..RolloutState::default()
                    };
                    return true;
                }
                false
            }
            _ => {
                let target = d.state.paused_from.unwrap_or(RolloutPhase::Idle);
                if !self.fire(d, RolloutEvent::Resumed, Some(target), ctx) {
                    return false;
                }
                let state = &mut d.state;
                state.phase = target;
                state.paused_from = None;
                state.pause_reason = None;
                state.message = None;
                state.attempts = 0;
                state.not_before = None;
                if state.waiting_since.is_some() {
                    state.waiting_since = Some(timestamp(input.now));
                }
                true
            }
        }
    }

    fn apply(&self, d: &mut Decision, input: &SequencerInput<'_>, mut ctx: TransitionContext) -> bool {
        let Some(change) = d.state.current().cloned() else {
            if self.fire(d, RolloutEvent::QueueExhausted, None, &ctx) {
                d.state = RolloutState::default();
            }
            return false;
        };

        if let Some(remaining) = held(&d.state, input.now) {
            d.requeue = Some(remaining);
            d.held = true;
            return false;
        }

        if is_satisfied(&change, input.live) {
            if self.fire(d, RolloutEvent::StepSatisfied, None, &ctx) {
                start_waiting(&mut d.state, input.now);
                return true;
            }
            return false;
        }

        if !diff(input.plan, input.live).contains(&change) {
            if self.fire(d, RolloutEvent::StepStale, None, &ctx) {
                debug!(change = %change, "Queued change is stale, rebuilding queue");
                d.state = RolloutState {
                    phase: RolloutPhase::Diffing,
                    ..RolloutState::default()
                };
                return true;
            }
            return false;
        }

        let deferral = gate(&change, input, &self.policy);
        ctx.gate_closed = deferral.as_ref().map(|g| g.message().to_string());
        match self.machine.transition(&d.state.phase, RolloutEvent::StepApplied, &ctx) {
            TransitionResult::Success { .. } => {
                d.events.push(RolloutEvent::StepApplied);
                d.rollback = Some(d.state.clone());
                start_waiting(&mut d.state, input.now);
                d.effect = Effect::Apply(change);
                true
            }
            TransitionResult::GuardFailed { reason, .. } => {
                debug!(change = %change, reason = %reason, "Deferring change");
                let interval = self.policy.deferral_interval;
                let state = &mut d.state;
                state.attempts = state.attempts.saturating_add(1);
                state.waiting_since.get_or_insert_with(|| timestamp(input.now));
                state.not_before = Some(timestamp(input.now + to_chrono(interval)));
                state.message = Some(reason);
                d.deferred = deferral;
                d.requeue = Some(interval);
                false
            }
            TransitionResult::InvalidTransition { current, event } => {
                warn!(%current, %event, "Invalid rollout transition");
                false
            }
        }
    }

    fn await_health(
        &self,
        d: &mut Decision,
        input: &SequencerInput<'_>,
        mut ctx: TransitionContext,
    ) -> bool {
        let last = d.state.cursor as usize + 1 >= d.state.changes.len();
        let event = if last {
            RolloutEvent::RolloutComplete
        } else {
            RolloutEvent::StepConverged
        };

        match d.state.current().cloned() {
            Some(change) => {
                ctx.bootstrapping = is_bootstrapping(&d.state, &change, input.live);
                ctx.step_converged = if ctx.bootstrapping {
                    is_satisfied(&change, input.live)
                } else {
                    is_converged(&change, input.live)
                };
            }
            None => ctx.step_converged = true,
        }

        match self.machine.transition(&d.state.phase, event, &ctx) {
            TransitionResult::Success { .. } => {
                d.events.push(event);
                if last {
                    d.state = RolloutState::default();
                } else {
                    let state = &mut d.state;
                    state.phase = RolloutPhase::Applying;
                    state.cursor += 1;
                    state.attempts = 0;
                    state.waiting_since = None;
                    state.not_before = None;
                    state.message = None;
                }
                true
            }
            TransitionResult::GuardFailed { reason, .. } => {
                d.stalled = waited(&d.state, input.now) > self.policy.max_wait;
                if let Some(remaining) = held(&d.state, input.now) {
                    d.requeue = Some(remaining);
                    d.held = true;
                    return false;
                }
                let delay = self.policy.health_backoff.delay_for_attempt(d.state.attempts);
                let state = &mut d.state;
                state.attempts = state.attempts.saturating_add(1);
                state.not_before = Some(timestamp(input.now + to_chrono(delay)));
                state.message = Some(reason);
                d.requeue = Some(delay);
                false
            }
            TransitionResult::InvalidTransition { current, event } => {
                warn!(%current, %event, "Invalid rollout transition");
                false
            }
        }
    }

    /// Validate `event` against the transition table and record it
    fn fire(
        &self,
        d: &mut Decision,
        event: RolloutEvent,
        target: Option<RolloutPhase>,
        ctx: &TransitionContext,
    ) -> bool {
        let result = match target {
            Some(target) => self.machine.transition_to(&d.state.phase, event, target, ctx),
            None => self.machine.transition(&d.state.phase, event, ctx),
        };
        match result {
            TransitionResult::Success { from, to, .. } => {
                debug!(%from, %to, %event, "Rollout transition");
                d.events.push(event);
                true
            }
            TransitionResult::GuardFailed { reason, .. } => {
                debug!(%event, reason = %reason, "Rollout transition blocked");
                false
            }
            TransitionResult::InvalidTransition { current, event } => {
                warn!(%current, %event, "Invalid rollout transition");
                false
            }
        }
    }
}

/// Ordered change list from plan against live workloads: creates, then
/// in-place updates and certificate restarts, then deletes. Non-master
/// changes precede master changes; deletes remove higher ordinals first.
pub fn diff(plan: &TopologyPlan, live: &[LiveWorkload]) -> Vec<PlannedChange> {
    let by_name: HashMap<&str, &LiveWorkload> = live.iter().map(|w| (w.name.as_str(), w)).collect();

    let mut creates = Vec::new();
    let mut updates = Vec::new();
    for descriptor in &plan.descriptors {
        match by_name.get(descriptor.name.as_str()) {
            None => creates.push(planned(ChangeKind::Create, descriptor)),
            Some(workload) => {
                let fingerprint = descriptor.fingerprint();
                if workload.fingerprint.as_deref() != Some(fingerprint.as_str()) {
                    updates.push(planned(ChangeKind::Update, descriptor));
                } else if workload.cert_version < descriptor.cert_version {
                    updates.push(planned(ChangeKind::Restart, descriptor));
                }
            }
        }
    }
    updates.sort_by_key(|c| c.is_master());

    let mut deletes: Vec<&LiveWorkload> = live
        .iter()
        .filter(|w| plan.get(&w.name).is_none())
        .collect();
    deletes.sort_by(|a, b| {
        (a.roles.is_master(), Reverse(a.ordinal), &a.name)
            .cmp(&(b.roles.is_master(), Reverse(b.ordinal), &b.name))
    });

    creates
        .into_iter()
        .chain(updates)
        .chain(deletes.into_iter().map(|w| PlannedChange {
            kind: ChangeKind::Delete,
            workload: w.name.clone(),
            pool: w.pool.clone(),
            roles: w.roles.roles(),
            fingerprint: None,
            cert_version: None,
        }))
        .collect()
}

fn planned(kind: ChangeKind, descriptor: &WorkloadDescriptor) -> PlannedChange {
    PlannedChange {
        kind,
        workload: descriptor.name.clone(),
        pool: descriptor.pool.clone(),
        roles: descriptor.roles.roles(),
        fingerprint: Some(descriptor.fingerprint()),
        cert_version: Some(descriptor.cert_version),
    }
}

/// Live state already reflects the change
pub fn is_satisfied(change: &PlannedChange, live: &[LiveWorkload]) -> bool {
    let workload = live.iter().find(|w| w.name == change.workload);
    match (change.kind, workload) {
        (ChangeKind::Delete, w) => w.is_none(),
        (_, None) => false,
        (ChangeKind::Restart, Some(w)) => w.cert_version >= change.cert_version.unwrap_or(0),
        (ChangeKind::Create | ChangeKind::Update, Some(w)) => {
            w.fingerprint == change.fingerprint
                && w.cert_version >= change.cert_version.unwrap_or(0)
        }
    }
}

/// The change is live and its workload is ready (or gone, for deletes)
pub fn is_converged(change: &PlannedChange, live: &[LiveWorkload]) -> bool {
    if !is_satisfied(change, live) {
        return false;
    }
    change.kind == ChangeKind::Delete
        || live.iter().any(|w| w.name == change.workload && w.ready)
}

/// Quorum and health gate in front of a change. `None` when it may be applied.
pub fn gate(change: &PlannedChange, input: &SequencerInput<'_>, policy: &RolloutPolicy) -> Option<Deferral> {
    if !change.is_disruptive() {
        return None;
    }
    let health = input.health.health;

    if change.is_master() {
        if health == ClusterHealth::Unknown {
            return Some(Deferral::Health(
                "Cluster health unknown, master change deferred".to_string(),
            ));
        }
        let live_masters = input.live.iter().filter(|w| w.roles.is_master()).count() as u32;
        // a lone master can only ever be updated in place
        let sole_master = change.kind != ChangeKind::Delete
            && live_masters == 1
            && input.plan.quorum.masters == 1;
        let quorum = QuorumState::new(live_masters, input.health.ready_masters());
        if !sole_master && !quorum.can_take_down_master() {
            return Some(Deferral::Quorum(format!(
                "Quorum of {} needs {} ready masters to take one down, {} ready",
                quorum.quorum,
                quorum.quorum + 1,
                quorum.ready_masters
            )));
        }
    }

    if change.kind == ChangeKind::Delete && change.is_data() {
        let threshold = policy.data_removal_threshold(input.plan.replicas.replicas);
        if !health.at_least(threshold) {
            return Some(Deferral::Health(format!(
                "Data node removal needs {} health, cluster is {}",
                threshold, health
            )));
        }
    }

    None
}

/// A create whose cluster has not formed yet: no master workload is ready and
/// more creates follow, so health cannot be expected before they land.
fn is_bootstrapping(state: &RolloutState, change: &PlannedChange, live: &[LiveWorkload]) -> bool {
    change.kind == ChangeKind::Create
        && !live.iter().any(|w| w.ready && w.roles.is_master())
        && state
            .changes
            .iter()
            .skip(state.cursor as usize + 1)
            .any(|c| c.kind == ChangeKind::Create)
}

fn start_waiting(state: &mut RolloutState, now: DateTime<Utc>) {
    state.phase = RolloutPhase::AwaitingHealth;
    state.attempts = 0;
    state.waiting_since = Some(timestamp(now));
    state.not_before = None;
    state.message = None;
}

/// Time left before the in-flight change may be evaluated again
fn held(state: &RolloutState, now: DateTime<Utc>) -> Option<Duration> {
    let not_before = parse_time(state.not_before.as_deref())?;
    if now >= not_before {
        return None;
    }
    let remaining = (not_before - now).to_std().unwrap_or(Duration::ZERO);
    Some(remaining.max(Duration::from_secs(1)))
}

fn waited(state: &RolloutState, now: DateTime<Utc>) -> Duration {
    parse_time(state.waiting_since.as_deref())
        .and_then(|since| (now - since).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
