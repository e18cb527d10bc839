//! Reconciliation of the per-node device object against the inventory
//! snapshot.

pub mod memory;
pub mod reconciler;
pub mod retry;
pub mod store;

pub use reconciler::NodeIdentity;
pub use reconciler::ReconcileError;
pub use reconciler::Reconciler;
pub use reconciler::ReportOutcome;
pub use retry::RetryPolicy;
pub use store::InventoryStore;
pub use store::StoreError;
