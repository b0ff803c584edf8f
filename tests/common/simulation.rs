//! In-memory cluster driven by the rollout sequencer
//!
//! Applied workloads come up one tick after they are created or re-rendered.
//! Cluster health is derived from the live workloads: Red while the joined
//! masters are below the majority of live masters, Yellow while any workload
//! is still starting, Green otherwise.

use std::time::Duration;

use chrono::{DateTime, Utc};
use elasticsearch_operator::config::RolloutPolicy;
use elasticsearch_operator::controller::sequencer::{Decision, Effect, Sequencer, SequencerInput};
use elasticsearch_operator::crd::{ChangeKind, ClusterHealth, PlannedChange, RolloutPhase, RolloutState};
use elasticsearch_operator::elasticsearch::{ClusterStatus, NodeReadiness};
use elasticsearch_operator::topology::{LiveWorkload, TopologyPlan, quorum_for};

use super::fixtures::live_from;

/// Fixed start time for simulations
pub fn sim_start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Observation recorded right after an effect was applied
#[derive(Clone, Debug)]
pub struct AppliedStep {
    pub change: PlannedChange,
    /// Master workloads present before the change
    pub masters_before: u32,
    /// Joined masters right after the change
    pub ready_masters_after: u32,
}

pub struct SimCluster {
    pub live: Vec<LiveWorkload>,
    pub state: RolloutState,
    pub now: DateTime<Utc>,
    pub managed: bool,
    pub applied: Vec<AppliedStep>,
    pub decisions: Vec<Decision>,
    sequencer: Sequencer,
}

impl SimCluster {
    pub fn new(policy: RolloutPolicy) -> Self {
        Self {
            live: Vec::new(),
            state: RolloutState::default(),
            now: sim_start(),
            managed: true,
            applied: Vec::new(),
            decisions: Vec::new(),
            sequencer: Sequencer::new(policy),
        }
    }

    /// Cluster already running `plan` with every workload ready
    pub fn converged(plan: &TopologyPlan, policy: RolloutPolicy) -> Self {
        let mut sim = Self::new(policy);
        sim.live = plan.descriptors.iter().map(|d| live_from(d, true)).collect();
        sim
    }

    pub fn live_masters(&self) -> u32 {
        self.live.iter().filter(|w| w.roles.is_master()).count() as u32
    }

    pub fn ready_masters(&self) -> u32 {
        self.live
            .iter()
            .filter(|w| w.roles.is_master() && w.ready)
            .count() as u32
    }

    pub fn health(&self) -> ClusterStatus {
        let nodes: Vec<NodeReadiness> = self
            .live
            .iter()
            .filter(|w| w.ready)
            .map(|w| NodeReadiness {
                name: w.name.clone(),
                master_eligible: w.roles.is_master(),
                data: w.roles.is_data(),
                elected_master: false,
            })
            .collect();
        let ready_masters = self.ready_masters();
        let health = if ready_masters == 0 || ready_masters < quorum_for(self.live_masters()) {
            ClusterHealth::Red
        } else if self.live.iter().any(|w| !w.ready) {
            ClusterHealth::Yellow
        } else {
            ClusterHealth::Green
        };
        ClusterStatus { health, nodes }
    }

    /// One reconcile: start pending pods, step, apply the effect
    pub fn tick(&mut self, plan: &TopologyPlan) -> Decision {
        for workload in &mut self.live {
            workload.ready = true;
        }

        let health = self.health();
        let input = SequencerInput {
            managed: self.managed,
            generation: Some(1),
            plan,
            live: &self.live,
            health: &health,
            now: self.now,
        };
        let decision = self.sequencer.step(&self.state, &input);

        if let Effect::Apply(change) = &decision.effect {
            let masters_before = self.live_masters();
            self.apply(plan, change);
            self.applied.push(AppliedStep {
                change: change.clone(),
                masters_before,
                ready_masters_after: self.ready_masters(),
            });
        }

        self.state = decision.state.clone();
        let wait = decision.requeue.unwrap_or(Duration::from_secs(60));
        self.now += chrono::Duration::from_std(wait).unwrap() + chrono::Duration::seconds(1);
        self.decisions.push(decision.clone());
        decision
    }

    /// Tick until the rollout is idle with nothing left to do, or `max_ticks`
    pub fn run(&mut self, plan: &TopologyPlan, max_ticks: usize) -> bool {
        for _ in 0..max_ticks {
            let decision = self.tick(plan);
            if decision.state.phase == RolloutPhase::Idle
                && decision.effect == Effect::None
                && elasticsearch_operator::controller::sequencer::diff(plan, &self.live).is_empty()
            {
                return true;
            }
        }
        false
    }

    fn apply(&mut self, plan: &TopologyPlan, change: &PlannedChange) {
        match change.kind {
            ChangeKind::Delete => self.live.retain(|w| w.name != change.workload),
            ChangeKind::Create | ChangeKind::Update | ChangeKind::Restart => {
                let descriptor = plan.get(&change.workload).unwrap();
                self.live.retain(|w| w.name != change.workload);
                self.live.push(live_from(descriptor, false));
            }
        }
    }
}
