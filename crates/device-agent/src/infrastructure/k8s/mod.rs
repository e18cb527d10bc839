//! Kubernetes side of device reporting.

mod device_store;
mod node;
mod types;

pub use device_store::KubeInventoryStore;
pub use node::fetch_node_identity;
pub use types::KubernetesError;
