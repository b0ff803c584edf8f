//! Validation of the Elasticsearch spec
//!
//! Pool structure (names, roles, master presence, generation IDs) is checked
//! by the topology planner. This module covers the remaining fields that
//! would otherwise only fail once rendered into workloads:
//! - Node counts
//! - Image reference
//! - Storage sizes

use crate::controller::error::{Error, Result};
use crate::crd::{ElasticsearchSpec, NodePool};

/// Maximum number of nodes in a single pool
pub const MAX_NODES_PER_POOL: i32 = 100;

const STORAGE_UNITS: [&str; 3] = ["Gi", "Mi", "Ti"];

/// Validate the cluster spec
pub fn validate_spec(spec: &ElasticsearchSpec) -> Result<()> {
    validate_image(&spec.image)?;
    for pool in &spec.nodes {
        validate_node_count(pool)?;
        validate_storage(pool)?;
    }
    Ok(())
}

fn validate_image(image: &str) -> Result<()> {
    if image.trim().is_empty() {
        return Err(Error::InvalidSpec("image must not be empty".to_string()));
    }
    if image.chars().any(char::is_whitespace) {
        return Err(Error::InvalidSpec(format!(
            "image reference contains whitespace: {:?}",
            image
        )));
    }
    Ok(())
}

fn validate_node_count(pool: &NodePool) -> Result<()> {
    if pool.node_count > MAX_NODES_PER_POOL {
        return Err(Error::InvalidSpec(format!(
            "pool {} node count {} exceeds maximum {}",
            pool.name, pool.node_count, MAX_NODES_PER_POOL
        )));
    }
    Ok(())
}

/// Validate storage configuration
fn validate_storage(pool: &NodePool) -> Result<()> {
    let Some(storage) = &pool.storage else {
        return Ok(());
    };
    let size = &storage.size;

    // e.g. "10Gi", "512Mi"
    let Some(num_str) = STORAGE_UNITS.iter().find_map(|unit| size.strip_suffix(unit)) else {
        return Err(Error::InvalidSpec(format!(
            "pool {} storage size must end with Gi, Mi, or Ti: {}",
            pool.name, size
        )));
    };

    let num: u64 = num_str.parse().map_err(|_| {
        Error::InvalidSpec(format!(
            "pool {} has invalid storage size number: {}",
            pool.name, size
        ))
    })?;
    if num == 0 {
        return Err(Error::InvalidSpec(format!(
            "pool {} storage size must be positive",
            pool.name
        )));
    }

    Ok(())
}
