//! Unit tests for certificate lifecycle management

use std::collections::BTreeMap;

use elasticsearch_operator::pki::{
    CertificateManager, Identity, MemorySecretStore, PkiError, ca_secret_name,
};

fn manager(store: &MemorySecretStore) -> CertificateManager<MemorySecretStore> {
    CertificateManager::new(store.clone(), "logs", "logging", 365)
}

mod issuance_tests {
    use super::*;

    #[tokio::test]
    async fn test_every_identity_gets_its_own_secret() {
        let store = MemorySecretStore::new();
        let m = manager(&store);
        for identity in Identity::ALL {
            m.ensure(identity).await.unwrap();
        }

        assert!(store.get("logs-ca").await.is_some());
        assert!(store.get("logs-node-tls").await.is_some());
        assert!(store.get("logs-admin-tls").await.is_some());
        assert!(store.get("logs-dashboard-proxy-tls").await.is_some());
    }

    #[tokio::test]
    async fn test_bundles_share_the_cluster_ca() {
        let store = MemorySecretStore::new();
        let m = manager(&store);
        let ca = m.ensure_ca().await.unwrap();
        let node = m.ensure(Identity::Node).await.unwrap();
        let admin = m.ensure(Identity::Admin).await.unwrap();

        assert_eq!(node.ca_cert_pem, ca.cert_pem());
        assert_eq!(admin.ca_cert_pem, ca.cert_pem());
        assert!(ca.verify(&node.cert_pem));
        assert!(ca.verify(&admin.cert_pem));
    }

    #[tokio::test]
    async fn test_ensure_survives_a_new_manager() {
        let store = MemorySecretStore::new();
        let first = manager(&store).ensure(Identity::Node).await.unwrap();
        let second = manager(&store).ensure(Identity::Node).await.unwrap();
        assert_eq!(first.cert_pem, second.cert_pem);
        assert_eq!(second.version, 1);
    }

    #[tokio::test]
    async fn test_unreadable_bundle_is_reissued_with_next_version() {
        let store = MemorySecretStore::new();
        let m = manager(&store);
        m.ensure(Identity::Node).await.unwrap();

        store
            .put(
                "logs-node-tls",
                BTreeMap::from([
                    ("version".to_string(), "4".to_string()),
                    ("tls.crt".to_string(), "garbage".to_string()),
                ]),
            )
            .await;

        let reissued = m.ensure(Identity::Node).await.unwrap();
        assert_eq!(reissued.version, 5);
    }

    #[tokio::test]
    async fn test_ensure_adds_missing_versioned_keys() {
        let store = MemorySecretStore::new();
        let m = manager(&store);
        let bundle = m.ensure(Identity::Node).await.unwrap();

        let mut data = store.get("logs-node-tls").await.unwrap();
        data.remove("v1-tls.crt");
        data.remove("v1-tls.key");
        store.put("logs-node-tls", data).await;

        assert_eq!(m.ensure(Identity::Node).await.unwrap(), bundle);
        let data = store.get("logs-node-tls").await.unwrap();
        assert_eq!(data.get("v1-tls.crt"), Some(&bundle.cert_pem));
        assert_eq!(data.get("v1-tls.key"), Some(&bundle.key_pem));
    }
}

mod rotation_tests {
    use super::*;

    #[tokio::test]
    async fn test_rotate_then_ensure_returns_rotated_bundle() {
        let store = MemorySecretStore::new();
        let m = manager(&store);
        let original = m.ensure(Identity::Node).await.unwrap();
        let rotated = m.rotate(Identity::Node).await.unwrap();

        assert_eq!(rotated.version, original.version + 1);
        assert_ne!(rotated.cert_pem, original.cert_pem);

        let current = m.ensure(Identity::Node).await.unwrap();
        assert_eq!(current, rotated);
    }

    #[tokio::test]
    async fn test_previous_kept_until_released() {
        let store = MemorySecretStore::new();
        let m = manager(&store);
        let original = m.ensure(Identity::Node).await.unwrap();
        m.rotate(Identity::Node).await.unwrap();

        let previous = m.previous(Identity::Node).await.unwrap().unwrap();
        assert_eq!(previous.version, original.version);
        assert_eq!(previous.cert_pem, original.cert_pem);

        // pods not yet restarted still find their own pair
        let data = store.get("logs-node-tls").await.unwrap();
        assert_eq!(data.get("v1-tls.crt"), Some(&original.cert_pem));
        assert!(data.contains_key("v2-tls.crt"));

        assert!(m.release_previous(Identity::Node).await.unwrap());
        assert!(m.previous(Identity::Node).await.unwrap().is_none());
        let data = store.get("logs-node-tls").await.unwrap();
        assert!(!data.contains_key("v1-tls.crt"));
        assert!(data.contains_key("v2-tls.key"));
        assert!(!m.release_previous(Identity::Node).await.unwrap());

        // the current version is untouched by the release
        assert_eq!(m.ensure(Identity::Node).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_rotation_leaves_other_identities_alone() {
        let store = MemorySecretStore::new();
        let m = manager(&store);
        let admin = m.ensure(Identity::Admin).await.unwrap();
        m.ensure(Identity::Node).await.unwrap();
        m.rotate(Identity::Node).await.unwrap();

        assert_eq!(m.ensure(Identity::Admin).await.unwrap(), admin);
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_corrupt_ca_is_reported_not_replaced() {
        let store = MemorySecretStore::new();
        let garbage = BTreeMap::from([
            ("ca.crt".to_string(), "not a certificate".to_string()),
            ("ca.key".to_string(), "not a key".to_string()),
        ]);
        store.put(&ca_secret_name("logs"), garbage.clone()).await;

        let m = manager(&store);
        let result = m.ensure(Identity::Node).await;
        assert!(matches!(result, Err(PkiError::CaCorruption { .. })));

        assert_eq!(store.get("logs-ca").await, Some(garbage));
        assert!(store.get("logs-node-tls").await.is_none());
    }

    #[tokio::test]
    async fn test_ca_missing_key_is_corrupt() {
        let store = MemorySecretStore::new();
        let ca = manager(&MemorySecretStore::new()).ensure_ca().await.unwrap();
        store
            .put(
                "logs-ca",
                BTreeMap::from([("ca.crt".to_string(), ca.cert_pem().to_string())]),
            )
            .await;

        let result = manager(&store).ensure_ca().await;
        assert!(matches!(result, Err(PkiError::CaCorruption { .. })));
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces() {
        let store = MemorySecretStore::new();
        store.fail_writes_to("logs-admin-tls").await;
        let m = manager(&store);

        // other identities are unaffected
        m.ensure(Identity::Node).await.unwrap();

        let result = m.ensure(Identity::Admin).await;
        assert!(matches!(result, Err(PkiError::Persistence { ref secret, .. }) if secret == "logs-admin-tls"));
        assert!(store.get("logs-admin-tls").await.is_none());
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_current_bundle() {
        let store = MemorySecretStore::new();
        let m = manager(&store);
        let original = m.ensure(Identity::Node).await.unwrap();

        store.fail_writes_to("logs-node-tls").await;
        assert!(m.rotate(Identity::Node).await.is_err());
        assert_eq!(m.ensure(Identity::Node).await.unwrap(), original);
    }
}
