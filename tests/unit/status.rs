//! Unit tests for status management

use elasticsearch_operator::controller::{
    ConditionBuilder, DecisionFlags, Error, StatusReport, build_status, condition_status,
    condition_types, derive_phase, recurring_failure, spec_changed, with_failure,
};
use elasticsearch_operator::crd::{
    ChangeKind, ClusterHealth, ClusterPhase, ElasticsearchStatus, NodePoolStatus, NodeRole,
    PauseReason, PlannedChange, RolloutPhase, RolloutState,
};

use crate::common::*;

fn pool_status(desired: i32, ready: i32) -> NodePoolStatus {
    NodePoolStatus {
        name: "nodes".to_string(),
        roles: ALL_ROLES.to_vec(),
        generation: "abc12345".to_string(),
        desired,
        ready,
    }
}

/// A managed, idle cluster with every node ready
fn healthy_report() -> StatusReport {
    StatusReport {
        generation: Some(1),
        managed: true,
        health: ClusterHealth::Green,
        pools: vec![pool_status(3, 3)],
        rollout: RolloutState::default(),
        decision: Some(DecisionFlags::default()),
        replicas: Some((1, true)),
        ..Default::default()
    }
}

fn applying(kind: ChangeKind) -> RolloutState {
    RolloutState {
        phase: RolloutPhase::Applying,
        changes: vec![PlannedChange {
            kind,
            workload: "logs-m-abc12345-0".to_string(),
            pool: "masters".to_string(),
            roles: vec![NodeRole::Master],
            fingerprint: None,
            cert_version: None,
        }],
        ..Default::default()
    }
}

fn condition<'a>(status: &'a ElasticsearchStatus, type_: &str) -> Option<&'a str> {
    status
        .conditions
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| c.status.as_str())
}

mod phase_tests {
    use super::*;

    #[test]
    fn test_running_when_converged_and_healthy() {
        assert_eq!(derive_phase(&healthy_report()), ClusterPhase::Running);

        let yellow = StatusReport {
            health: ClusterHealth::Yellow,
            ..healthy_report()
        };
        assert_eq!(derive_phase(&yellow), ClusterPhase::Running);
    }

    #[test]
    fn test_pending_before_any_node_is_ready() {
        let report = StatusReport {
            health: ClusterHealth::Unknown,
            pools: vec![pool_status(3, 0)],
            ..healthy_report()
        };
        assert_eq!(derive_phase(&report), ClusterPhase::Pending);
    }

    #[test]
    fn test_degraded_cases() {
        let red = StatusReport {
            health: ClusterHealth::Red,
            ..healthy_report()
        };
        assert_eq!(derive_phase(&red), ClusterPhase::Degraded);

        let missing_node = StatusReport {
            pools: vec![pool_status(3, 2)],
            ..healthy_report()
        };
        assert_eq!(derive_phase(&missing_node), ClusterPhase::Degraded);

        let unachievable = StatusReport {
            replicas: Some((0, false)),
            ..healthy_report()
        };
        assert_eq!(derive_phase(&unachievable), ClusterPhase::Degraded);
    }

    #[test]
    fn test_rollout_phases() {
        let rolling = StatusReport {
            rollout: applying(ChangeKind::Create),
            ..healthy_report()
        };
        assert_eq!(derive_phase(&rolling), ClusterPhase::RollingOut);

        let failed = StatusReport {
            rollout: RolloutState {
                phase: RolloutPhase::Failed,
                ..Default::default()
            },
            ..healthy_report()
        };
        assert_eq!(derive_phase(&failed), ClusterPhase::Failed);
    }

    #[test]
    fn test_unmanaged_is_paused() {
        let report = StatusReport {
            managed: false,
            rollout: applying(ChangeKind::Update),
            ..healthy_report()
        };
        assert_eq!(derive_phase(&report), ClusterPhase::Paused);
    }
}

mod build_tests {
    use super::*;

    #[test]
    fn test_healthy_cluster_conditions() {
        let status = build_status(None, healthy_report());
        assert_eq!(status.phase, ClusterPhase::Running);
        assert_eq!(status.cluster_health, ClusterHealth::Green);
        assert_eq!(status.observed_generation, Some(1));
        assert_eq!(condition(&status, condition_types::READY), Some(condition_status::TRUE));
        assert_eq!(
            condition(&status, condition_types::PROGRESSING),
            Some(condition_status::FALSE)
        );
        assert_eq!(condition(&status, condition_types::DEGRADED), Some(condition_status::FALSE));
        assert_eq!(
            condition(&status, condition_types::SPEC_VALID),
            Some(condition_status::TRUE)
        );
        assert_eq!(
            condition(&status, condition_types::REDUNDANCY_UNACHIEVABLE),
            Some(condition_status::FALSE)
        );
    }

    #[test]
    fn test_rebuilding_unchanged_report_is_stable() {
        let first = build_status(None, healthy_report());
        let second = build_status(Some(&first), healthy_report());
        assert_eq!(first, second);
    }

    #[test]
    fn test_quorum_deferral_raises_condition() {
        let report = StatusReport {
            rollout: applying(ChangeKind::Delete),
            decision: Some(DecisionFlags {
                quorum_blocked: Some("removing a master would break quorum".to_string()),
                ..Default::default()
            }),
            ..healthy_report()
        };
        let status = build_status(None, report);
        let blocked = status
            .conditions
            .iter()
            .find(|c| c.type_ == condition_types::QUORUM_BLOCKED)
            .unwrap();
        assert_eq!(blocked.status, condition_status::TRUE);
        assert!(blocked.message.contains("quorum"));
        assert_eq!(
            condition(&status, condition_types::PROGRESSING),
            Some(condition_status::TRUE)
        );
    }

    #[test]
    fn test_held_decision_keeps_conditions() {
        let blocked = StatusReport {
            rollout: applying(ChangeKind::Delete),
            decision: Some(DecisionFlags {
                stalled: true,
                quorum_blocked: Some("deferred".to_string()),
                ..Default::default()
            }),
            ..healthy_report()
        };
        let first = build_status(None, blocked);

        let held = StatusReport {
            rollout: applying(ChangeKind::Delete),
            decision: Some(DecisionFlags {
                held: true,
                ..Default::default()
            }),
            ..healthy_report()
        };
        let second = build_status(Some(&first), held);
        assert_eq!(
            condition(&second, condition_types::QUORUM_BLOCKED),
            Some(condition_status::TRUE)
        );
        assert_eq!(
            condition(&second, condition_types::ROLLOUT_STALLED),
            Some(condition_status::TRUE)
        );
    }

    #[test]
    fn test_retry_budget_exhaustion() {
        let report = StatusReport {
            rollout: applying(ChangeKind::Create),
            decision: Some(DecisionFlags {
                retries_exhausted: true,
                ..Default::default()
            }),
            ..healthy_report()
        };
        let status = build_status(None, report);
        assert_eq!(
            condition(&status, condition_types::TRANSIENT_ERRORS),
            Some(condition_status::TRUE)
        );
    }

    #[test]
    fn test_failed_rollout_marks_spec_invalid() {
        let report = StatusReport {
            rollout: RolloutState {
                phase: RolloutPhase::Failed,
                message: Some("pool data has no roles".to_string()),
                ..Default::default()
            },
            decision: None,
            ..healthy_report()
        };
        let status = build_status(None, report);
        let spec_valid = status
            .conditions
            .iter()
            .find(|c| c.type_ == condition_types::SPEC_VALID)
            .unwrap();
        assert_eq!(spec_valid.status, condition_status::FALSE);
        assert_eq!(spec_valid.message, "pool data has no roles");
    }

    #[test]
    fn test_unmanaged_pass_leaves_rollout_conditions() {
        let blocked = StatusReport {
            rollout: applying(ChangeKind::Delete),
            decision: Some(DecisionFlags {
                quorum_blocked: Some("deferred".to_string()),
                ..Default::default()
            }),
            ..healthy_report()
        };
        let first = build_status(None, blocked);

        let unmanaged = StatusReport {
            managed: false,
            rollout: RolloutState {
                phase: RolloutPhase::Paused,
                pause_reason: Some(PauseReason::Unmanaged),
                paused_from: Some(RolloutPhase::Applying),
                ..applying(ChangeKind::Delete)
            },
            decision: None,
            ..healthy_report()
        };
        let second = build_status(Some(&first), unmanaged);
        assert_eq!(second.phase, ClusterPhase::Paused);
        assert_eq!(
            condition(&second, condition_types::QUORUM_BLOCKED),
            Some(condition_status::TRUE)
        );
    }

    #[test]
    fn test_unmanaged_invalid_spec_keeps_paused_rollout() {
        let frozen = RolloutState {
            phase: RolloutPhase::Paused,
            pause_reason: Some(PauseReason::Unmanaged),
            paused_from: Some(RolloutPhase::Applying),
            cursor: 0,
            ..applying(ChangeKind::Delete)
        };
        let report = StatusReport {
            managed: false,
            rollout: frozen.clone(),
            decision: None,
            replicas: None,
            spec_error: Some("no master nodes".to_string()),
            ..healthy_report()
        };
        let status = build_status(None, report);
        assert_eq!(status.phase, ClusterPhase::Paused);
        assert_eq!(status.rollout, frozen);
        let spec_valid = status
            .conditions
            .iter()
            .find(|c| c.type_ == condition_types::SPEC_VALID)
            .unwrap();
        assert_eq!(spec_valid.status, condition_status::FALSE);
        assert_eq!(spec_valid.message, "no master nodes");
    }

    #[test]
    fn test_ca_expiring_condition() {
        let report = StatusReport {
            ca_expiring: true,
            ..healthy_report()
        };
        let status = build_status(None, report);
        assert_eq!(
            condition(&status, condition_types::CA_EXPIRING),
            Some(condition_status::TRUE)
        );
    }

    #[test]
    fn test_previous_step_and_replicas_carry_over() {
        let first = build_status(
            None,
            StatusReport {
                applied_step: Some("create logs-m-abc12345-0".to_string()),
                replica_shards_applied: Some(1),
                ..healthy_report()
            },
        );
        let second = build_status(Some(&first), healthy_report());
        assert_eq!(
            second.last_rollout_step.as_deref(),
            Some("create logs-m-abc12345-0")
        );
        assert_eq!(second.replica_shards, Some(1));
    }
}

mod recurring_failure_tests {
    use super::*;

    #[test]
    fn test_conditions_raised_once_budget_is_spent() {
        let persistence = Error::PersistenceFailure("secret write refused".to_string());
        assert!(recurring_failure(&persistence, 4, 5).is_none());
        let raised = recurring_failure(&persistence, 5, 5).unwrap();
        assert_eq!(raised.condition, condition_types::PERSISTENCE_FAILURE);
        assert!(raised.blocking);

        let transient = Error::TransientError("connection reset".to_string());
        let raised = recurring_failure(&transient, 6, 5).unwrap();
        assert_eq!(raised.condition, condition_types::TRANSIENT_ERRORS);
        assert!(!raised.blocking);
    }

    #[test]
    fn test_halting_and_permanent_errors_raise_nothing() {
        let invalid = Error::InvalidSpec("no master nodes".to_string());
        assert!(recurring_failure(&invalid, 10, 5).is_none());
        let permanent = Error::MissingObjectKey("metadata.namespace");
        assert!(recurring_failure(&permanent, 10, 5).is_none());
    }

    #[test]
    fn test_persistence_failure_blocks_until_a_pass_succeeds() {
        let healthy = build_status(None, healthy_report());
        let error = Error::PersistenceFailure("secret write refused".to_string());
        let failure = recurring_failure(&error, 5, 5).unwrap();

        let failing = with_failure(Some(&healthy), Some(1), &failure, &error.to_string());
        assert_eq!(failing.phase, healthy.phase);
        assert_eq!(failing.rollout, healthy.rollout);
        assert_eq!(
            condition(&failing, condition_types::PERSISTENCE_FAILURE),
            Some(condition_status::TRUE)
        );
        assert_eq!(condition(&failing, condition_types::READY), Some(condition_status::FALSE));

        let recovered = build_status(Some(&failing), healthy_report());
        assert_eq!(
            condition(&recovered, condition_types::PERSISTENCE_FAILURE),
            Some(condition_status::FALSE)
        );
        assert_eq!(condition(&recovered, condition_types::READY), Some(condition_status::TRUE));
    }

    #[test]
    fn test_transient_errors_clear_on_next_decision() {
        let error = Error::TransientError("connection reset".to_string());
        let failure = recurring_failure(&error, 5, 5).unwrap();
        let failing = with_failure(None, Some(1), &failure, &error.to_string());
        assert_eq!(
            condition(&failing, condition_types::TRANSIENT_ERRORS),
            Some(condition_status::TRUE)
        );
        assert!(condition(&failing, condition_types::READY).is_none());

        let recovered = build_status(Some(&failing), healthy_report());
        assert_eq!(
            condition(&recovered, condition_types::TRANSIENT_ERRORS),
            Some(condition_status::FALSE)
        );
    }
}

mod condition_tests {
    use super::*;

    #[test]
    fn test_transition_time_moves_only_on_status_change() {
        let first = ConditionBuilder::new(Some(1))
            .ready(false, "Pending", "waiting")
            .build();
        let original = first[0].last_transition_time.clone();

        let same = ConditionBuilder::from_existing(first.clone(), Some(2))
            .ready(false, "Pending", "still waiting")
            .build();
        assert_eq!(same[0].last_transition_time, original);
        assert_eq!(same[0].message, "still waiting");
        assert_eq!(same[0].observed_generation, Some(2));

        let flipped = ConditionBuilder::from_existing(first, Some(2))
            .ready(true, "Running", "ok")
            .build();
        assert_eq!(flipped.len(), 1);
        assert_eq!(flipped[0].status, condition_status::TRUE);
    }

    #[test]
    fn test_status_of() {
        let builder = ConditionBuilder::new(None)
            .degraded(true, "HealthRed", "red")
            .flag(condition_types::SPEC_VALID, true, "Planned", "");
        assert_eq!(builder.status_of(condition_types::DEGRADED), Some("True"));
        assert_eq!(builder.status_of(condition_types::SPEC_VALID), Some("True"));
        assert_eq!(builder.status_of(condition_types::READY), None);
    }

    #[test]
    fn test_spec_changed() {
        let fresh = ElasticsearchBuilder::new("logs", "logging")
            .with_generation(2)
            .build();
        assert!(spec_changed(&fresh));

        let observed = ElasticsearchBuilder::new("logs", "logging")
            .with_generation(2)
            .with_status(ElasticsearchStatus {
                observed_generation: Some(2),
                ..Default::default()
            })
            .build();
        assert!(!spec_changed(&observed));

        let stale = ElasticsearchBuilder::new("logs", "logging")
            .with_generation(3)
            .with_status(ElasticsearchStatus {
                observed_generation: Some(2),
                ..Default::default()
            })
            .build();
        assert!(spec_changed(&stale));
    }
}
