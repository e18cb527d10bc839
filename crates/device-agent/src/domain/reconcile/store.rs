use core::error::Error;

use api_types::Device;
use async_trait::async_trait;
use error_stack::Report;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum StoreError {
    #[display("device object not found")]
    NotFound,
    #[display("device object was modified concurrently")]
    Conflict,
    #[display("device object already exists")]
    AlreadyExists,
    #[display("store is throttling requests")]
    TooManyRequests,
    #[display("store request failed: {message}")]
    Request { message: String },
}

impl Error for StoreError {}

impl StoreError {
    /// Errors after which a fresh read and rewrite can succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Conflict | StoreError::TooManyRequests)
    }
}

/// Persistence of the per-node device object.
///
/// `get` may serve a cached copy. `update` is optimistic: it fails with
/// [`StoreError::Conflict`] when the object's resource version is stale.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Device>, Report<StoreError>>;

    async fn create(&self, device: &Device) -> Result<Device, Report<StoreError>>;

    async fn update(&self, device: &Device) -> Result<Device, Report<StoreError>>;
}
