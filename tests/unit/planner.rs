//! Unit tests for topology planning

use elasticsearch_operator::crd::{NodeRole, RedundancyPolicy, ResourceList, ResourceRequirements};
use elasticsearch_operator::topology::{
    ExistingTopology, MAX_WORKLOAD_NAME_LEN, PlanError, RoleSet, plan,
};

use crate::common::*;

mod descriptor_tests {
    use super::*;

    #[test]
    fn test_single_pool_all_roles_one_node() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("all", ALL_ROLES, 1)
            .with_redundancy(RedundancyPolicy::ZeroRedundancy)
            .build();

        let plan = plan("es", TEST_UID, &es.spec, &ExistingTopology::default()).unwrap();
        assert_eq!(plan.descriptors.len(), 1);

        let descriptor = &plan.descriptors[0];
        assert!(descriptor.roles.is_master());
        assert!(descriptor.roles.is_data());
        assert!(descriptor.roles.is_client());
        assert_eq!(descriptor.ordinal, 0);
        assert_eq!(plan.quorum.masters, 1);
        assert_eq!(plan.quorum.quorum, 1);
        assert_eq!(plan.replicas.replicas, 0);
        assert!(plan.replicas.achievable);
    }

    #[test]
    fn test_workload_names_carry_class_generation_and_ordinal() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 3)
            .with_gen_uuid("abc12345")
            .build();

        let plan = plan("es", TEST_UID, &es.spec, &ExistingTopology::default()).unwrap();
        let class = RoleSet::from_roles(&[NodeRole::Master]).unwrap().class_tag();
        let names: Vec<_> = plan.descriptors.iter().map(|d| d.name.clone()).collect();
        assert_eq!(
            names,
            (0..3)
                .map(|i| format!("es-{}-abc12345-{}", class, i))
                .collect::<Vec<_>>()
        );
        assert!(names.iter().all(|n| n.len() <= MAX_WORKLOAD_NAME_LEN));
    }

    #[test]
    fn test_pool_resources_fall_back_to_cluster_defaults() {
        let mut es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 1)
            .build();
        es.spec.resources = Some(ResourceRequirements {
            limits: None,
            requests: Some(ResourceList {
                cpu: Some("500m".to_string()),
                memory: Some("2Gi".to_string()),
            }),
        });

        let plan = plan("es", TEST_UID, &es.spec, &ExistingTopology::default()).unwrap();
        assert_eq!(plan.descriptors[0].resources, es.spec.resources);
    }

    #[test]
    fn test_zero_node_pool_keeps_its_generation() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 1)
            .with_pool("data", &[NodeRole::Data], 0)
            .build();

        let plan = plan("es", TEST_UID, &es.spec, &ExistingTopology::default()).unwrap();
        assert_eq!(plan.descriptors.len(), 1);
        assert!(plan.generations.contains_key("data"));
    }
}

mod idempotence_tests {
    use super::*;

    #[test]
    fn test_replanning_against_own_output_is_identical() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 3)
            .with_pool("data", &[NodeRole::Data, NodeRole::Client], 2)
            .build();

        let first = plan("es", TEST_UID, &es.spec, &ExistingTopology::default()).unwrap();
        let live: Vec<_> = first.descriptors.iter().map(|d| live_from(d, true)).collect();
        let second = plan("es", TEST_UID, &es.spec, &ExistingTopology::from_workloads(&live)).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_generation_survives_uid_independent_replanning() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 1)
            .build();

        let first = plan("es", TEST_UID, &es.spec, &ExistingTopology::default()).unwrap();
        let live: Vec<_> = first.descriptors.iter().map(|d| live_from(d, true)).collect();
        // a different uid would mint a different generation; live state wins
        let second = plan("es", "other-uid", &es.spec, &ExistingTopology::from_workloads(&live)).unwrap();
        assert_eq!(first.generations, second.generations);
    }

    #[test]
    fn test_scale_down_keeps_lowest_ordinals() {
        let three = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 3)
            .build();
        let one = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 1)
            .build();

        let before = plan("es", TEST_UID, &three.spec, &ExistingTopology::default()).unwrap();
        let live: Vec<_> = before.descriptors.iter().map(|d| live_from(d, true)).collect();
        let after = plan("es", TEST_UID, &one.spec, &ExistingTopology::from_workloads(&live)).unwrap();

        assert_eq!(after.descriptors.len(), 1);
        assert_eq!(after.descriptors[0].name, before.descriptors[0].name);
    }
}

mod error_tests {
    use super::*;

    #[test]
    fn test_no_masters_rejected() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("data", &[NodeRole::Data], 3)
            .build();
        assert_eq!(
            plan("es", TEST_UID, &es.spec, &ExistingTopology::default()),
            Err(PlanError::NoMasterNodes)
        );
    }

    #[test]
    fn test_master_pool_with_zero_nodes_rejected() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 0)
            .with_pool("data", &[NodeRole::Data], 2)
            .build();
        assert_eq!(
            plan("es", TEST_UID, &es.spec, &ExistingTopology::default()),
            Err(PlanError::NoMasterNodes)
        );
    }

    #[test]
    fn test_duplicate_pool_rejected() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("nodes", ALL_ROLES, 1)
            .with_pool("nodes", ALL_ROLES, 1)
            .build();
        assert!(matches!(
            plan("es", TEST_UID, &es.spec, &ExistingTopology::default()),
            Err(PlanError::DuplicatePool(_))
        ));
    }

    #[test]
    fn test_negative_count_rejected() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 1)
            .with_pool("data", &[NodeRole::Data], -1)
            .build();
        assert!(matches!(
            plan("es", TEST_UID, &es.spec, &ExistingTopology::default()),
            Err(PlanError::NegativeNodeCount { count: -1, .. })
        ));
    }

    #[test]
    fn test_role_change_of_existing_pool_rejected() {
        let before = ElasticsearchBuilder::new("es", "logging")
            .with_pool("nodes", &[NodeRole::Master, NodeRole::Data], 1)
            .build();
        let first = plan("es", TEST_UID, &before.spec, &ExistingTopology::default()).unwrap();
        let live: Vec<_> = first.descriptors.iter().map(|d| live_from(d, true)).collect();

        let after = ElasticsearchBuilder::new("es", "logging")
            .with_pool("nodes", ALL_ROLES, 1)
            .build();
        assert!(matches!(
            plan("es", TEST_UID, &after.spec, &ExistingTopology::from_workloads(&live)),
            Err(PlanError::RolesChanged { .. })
        ));
    }

    #[test]
    fn test_name_too_long_rejected() {
        let name = "x".repeat(MAX_WORKLOAD_NAME_LEN);
        let es = ElasticsearchBuilder::new(&name, "logging")
            .with_pool("masters", &[NodeRole::Master], 1)
            .build();
        assert!(matches!(
            plan(&name, TEST_UID, &es.spec, &ExistingTopology::default()),
            Err(PlanError::NameTooLong { .. })
        ));
    }
}

mod redundancy_tests {
    use super::*;

    #[test]
    fn test_single_redundancy_on_one_data_node_is_unachievable() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("all", ALL_ROLES, 1)
            .with_redundancy(RedundancyPolicy::SingleRedundancy)
            .build();

        let plan = plan("es", TEST_UID, &es.spec, &ExistingTopology::default()).unwrap();
        assert!(plan.is_degraded());
        assert_eq!(plan.replicas.replicas, 0);
    }

    #[test]
    fn test_full_redundancy_replicas_every_data_node() {
        let es = ElasticsearchBuilder::new("es", "logging")
            .with_pool("masters", &[NodeRole::Master], 3)
            .with_pool("data", &[NodeRole::Data], 4)
            .with_redundancy(RedundancyPolicy::FullRedundancy)
            .build();

        let plan = plan("es", TEST_UID, &es.spec, &ExistingTopology::default()).unwrap();
        assert_eq!(plan.data_nodes(), 4);
        assert_eq!(plan.replicas.replicas, 3);
        assert!(!plan.is_degraded());
    }
}
