//! Elasticsearch administrative API: client and health prober

pub mod client;
pub mod health;

pub use client::{AdminClient, CatNode, ClientError, ClusterApi, HealthResponse, cluster_endpoint};
pub use health::{ClusterStatus, HealthProber, NodeReadiness, classify};
