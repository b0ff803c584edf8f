// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for topology planning and rollout sequencing
//!
//! These tests use proptest to generate random pool layouts and scale changes
//! and verify that:
//! 1. Planning is deterministic and replanning against its own output is stable
//! 2. Change queues create every new workload before removing any
//! 3. A rollout never takes down a master while that would lose quorum
//! 4. Field validation is deterministic and never panics

#[path = "../common/mod.rs"]
mod common;

use proptest::prelude::*;

use elasticsearch_operator::config::RolloutPolicy;
use elasticsearch_operator::controller::sequencer::diff;
use elasticsearch_operator::controller::validate_spec;
use elasticsearch_operator::crd::{
    ChangeKind, ElasticsearchSpec, NodePool, NodeRole, RedundancyPolicy, StorageSpec,
};
use elasticsearch_operator::topology::{ExistingTopology, TopologyPlan, plan, quorum_for};

use common::{SimCluster, TEST_UID, live_from, pool};

// =============================================================================
// Strategies
// =============================================================================

/// A non-empty role set
fn roles() -> impl Strategy<Value = Vec<NodeRole>> {
    (any::<bool>(), any::<bool>(), any::<bool>())
        .prop_filter("at least one role", |(m, d, c)| *m || *d || *c)
        .prop_map(|(m, d, c)| {
            let mut roles = Vec::new();
            if m {
                roles.push(NodeRole::Master);
            }
            if d {
                roles.push(NodeRole::Data);
            }
            if c {
                roles.push(NodeRole::Client);
            }
            roles
        })
}

fn redundancy() -> impl Strategy<Value = RedundancyPolicy> {
    prop_oneof![
        Just(RedundancyPolicy::ZeroRedundancy),
        Just(RedundancyPolicy::SingleRedundancy),
        Just(RedundancyPolicy::MultipleRedundancy),
        Just(RedundancyPolicy::FullRedundancy),
    ]
}

/// A plannable spec: a master pool first, then up to two more pools of
/// arbitrary roles (shrinks toward a single small master pool)
fn plannable_spec() -> impl Strategy<Value = ElasticsearchSpec> {
    (
        1..=5i32,
        prop::collection::vec((roles(), 0..=4i32), 0..=2),
        redundancy(),
    )
        .prop_map(|(masters, extra, redundancy_policy)| {
            let mut nodes = vec![pool("masters", &[NodeRole::Master], masters)];
            for (i, (roles, count)) in extra.into_iter().enumerate() {
                nodes.push(pool(&format!("pool{}", i), &roles, count));
            }
            ElasticsearchSpec {
                nodes,
                redundancy_policy,
                ..Default::default()
            }
        })
}

/// Storage size strings, valid or not
fn any_storage_size() -> impl Strategy<Value = String> {
    prop_oneof![
        (0..=100u32).prop_map(|n| format!("{}Gi", n)),
        (0..=999u32).prop_map(|n| format!("{}Mi", n)),
        (1..=100u32).prop_map(|n| format!("{}GB", n)),
        (1..=100u32).prop_map(|n| n.to_string()),
        "[a-zA-Z0-9 .-]{0,8}",
    ]
}

fn masters_and_data(masters: i32, data: i32) -> ElasticsearchSpec {
    ElasticsearchSpec {
        nodes: vec![
            pool("masters", &[NodeRole::Master], masters),
            pool("data", &[NodeRole::Data, NodeRole::Client], data),
        ],
        redundancy_policy: RedundancyPolicy::SingleRedundancy,
        ..Default::default()
    }
}

fn plan_fresh(spec: &ElasticsearchSpec) -> TopologyPlan {
    plan("es", TEST_UID, spec, &ExistingTopology::default()).unwrap()
}

// =============================================================================
// Planning properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn planning_is_deterministic(spec in plannable_spec()) {
        let first = plan("es", TEST_UID, &spec, &ExistingTopology::default());
        let second = plan("es", TEST_UID, &spec, &ExistingTopology::default());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn replanning_against_live_output_is_stable(spec in plannable_spec()) {
        let planned = plan_fresh(&spec);
        let live: Vec<_> = planned.descriptors.iter().map(|d| live_from(d, true)).collect();
        let existing = ExistingTopology::from_workloads(&live);

        let replanned = plan("es", TEST_UID, &spec, &existing).unwrap();
        prop_assert_eq!(&planned, &replanned);
        prop_assert!(diff(&replanned, &live).is_empty());
    }

    #[test]
    fn quorum_is_majority_of_planned_masters(spec in plannable_spec()) {
        let planned = plan_fresh(&spec);
        let masters = planned.descriptors.iter().filter(|d| d.roles.is_master()).count() as u32;
        prop_assert_eq!(planned.quorum.masters, masters);
        prop_assert_eq!(planned.quorum.quorum, quorum_for(masters));
        prop_assert!(planned.quorum.quorum * 2 > masters);
    }

    #[test]
    fn replicas_never_exceed_data_nodes(spec in plannable_spec()) {
        let planned = plan_fresh(&spec);
        let data = planned.data_nodes();
        prop_assert!(planned.replicas.replicas <= data.saturating_sub(1));
    }

    #[test]
    fn creates_precede_deletes(
        from in plannable_spec(),
        to_masters in 1..=5i32,
        to_data in 0..=4i32,
    ) {
        let current = plan_fresh(&from);
        let live: Vec<_> = current.descriptors.iter().map(|d| live_from(d, true)).collect();

        let mut target = from.clone();
        target.nodes[0].node_count = to_masters;
        target.nodes.truncate(1);
        target.nodes.push(pool("fresh", &[NodeRole::Data], to_data));
        let next = plan("es", TEST_UID, &target, &ExistingTopology::from_workloads(&live)).unwrap();

        let kinds: Vec<_> = diff(&next, &live).into_iter().map(|c| c.kind).collect();
        if let Some(first_delete) = kinds.iter().position(|k| *k == ChangeKind::Delete) {
            prop_assert!(
                !kinds[first_delete..].contains(&ChangeKind::Create),
                "create queued after a delete: {:?}",
                kinds
            );
        }
    }
}

// =============================================================================
// Rollout properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn rollout_never_drops_below_quorum(
        from_masters in prop_oneof![Just(1i32), Just(3), Just(5)],
        to_masters in 1..=5i32,
        from_data in 0..=3i32,
        to_data in 0..=3i32,
    ) {
        let current = plan_fresh(&masters_and_data(from_masters, from_data));
        let mut sim = SimCluster::converged(&current, RolloutPolicy::default());

        let existing = ExistingTopology::from_workloads(&sim.live);
        let target = plan("es", TEST_UID, &masters_and_data(to_masters, to_data), &existing).unwrap();
        sim.run(&target, 100);

        for step in &sim.applied {
            if step.change.is_master() && step.change.kind == ChangeKind::Delete {
                prop_assert!(
                    step.ready_masters_after >= quorum_for(step.masters_before),
                    "{} left {} of {} masters",
                    step.change,
                    step.ready_masters_after,
                    step.masters_before
                );
            }
        }
        prop_assert!(sim.live_masters() >= to_masters as u32);
    }

    #[test]
    fn scale_up_always_converges(
        from_masters in prop_oneof![Just(1i32), Just(3)],
        extra_masters in 0..=2i32,
        from_data in 0..=2i32,
        extra_data in 0..=3i32,
    ) {
        let current = plan_fresh(&masters_and_data(from_masters, from_data));
        let mut sim = SimCluster::converged(&current, RolloutPolicy::default());

        let existing = ExistingTopology::from_workloads(&sim.live);
        let spec = masters_and_data(from_masters + extra_masters, from_data + extra_data);
        let target = plan("es", TEST_UID, &spec, &existing).unwrap();

        prop_assert!(sim.run(&target, 100));
        prop_assert_eq!(sim.live.len(), target.descriptors.len());
        prop_assert!(sim.applied.iter().all(|s| s.change.kind == ChangeKind::Create));
    }
}

// =============================================================================
// Validation properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn storage_validation_is_deterministic(size in any_storage_size()) {
        let spec = ElasticsearchSpec {
            nodes: vec![NodePool {
                storage: Some(StorageSpec { storage_class: None, size: size.clone() }),
                ..pool("nodes", &[NodeRole::Master, NodeRole::Data], 1)
            }],
            ..Default::default()
        };
        let first = validate_spec(&spec).is_ok();
        let second = validate_spec(&spec).is_ok();
        prop_assert_eq!(first, second);

        let well_formed = ["Gi", "Mi", "Ti"]
            .iter()
            .find_map(|unit| size.strip_suffix(unit))
            .and_then(|n| n.parse::<u64>().ok())
            .is_some_and(|n| n > 0);
        prop_assert_eq!(first, well_formed, "size {:?}", size);
    }
}
