pub mod common;
pub mod config;
pub mod pdb;
pub mod secret;
pub mod service;
pub mod workload;

pub use common::{API_VERSION, FIELD_MANAGER, KIND, owner_reference, standard_labels};
pub use service::{cluster_service_name, discovery_service_name};
