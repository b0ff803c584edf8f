// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for the Elasticsearch Operator
//!
//! This module contains unit tests for:
//! - Topology planning (descriptors, quorum, redundancy, generations)
//! - The rollout sequencer driven against a simulated cluster
//! - Certificate lifecycle over an in-memory secret store
//! - Resource generators (StatefulSet, Services, ConfigMap, PDB, Secret)
//! - Status and condition derivation
//! - Spec validation

#[path = "../common/mod.rs"]
mod common;

mod pki;
mod planner;
mod status;
