//! Node agent that watches GPUs for critical faults and keeps the node's
//! `Device` resource in line with the locally observed inventory.

pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use domain::health;
pub use domain::inventory;
pub use domain::reconcile;
pub use infrastructure::k8s;
pub use infrastructure::kube_client;
pub use infrastructure::nvml;
