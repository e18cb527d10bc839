//! In-process [`InventoryStore`] with optimistic concurrency and injectable
//! failures.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::PoisonError;

use api_types::Device;
use async_trait::async_trait;
use error_stack::Report;

use super::store::InventoryStore;
use super::store::StoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub get: usize,
    pub create: usize,
    pub update: usize,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, Device>,
    next_version: u64,
    calls: StoreCalls,
    committed_writes: usize,
    get_failures: VecDeque<StoreError>,
    create_failures: VecDeque<StoreError>,
    update_failures: VecDeque<StoreError>,
    racing_create: Option<Device>,
    racing_update: Option<Device>,
}

impl Inner {
    fn store(&mut self, mut device: Device) -> Device {
        self.next_version += 1;
        device.metadata.resource_version = Some(self.next_version.to_string());
        let name = device.metadata.name.clone().unwrap_or_default();
        self.objects.insert(name, device.clone());
        device
    }
}

/// Device objects held in memory, versioned like an API server would.
#[derive(Debug, Default)]
pub struct InMemoryInventoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores an object as if written by another client.
    pub fn insert(&self, device: Device) -> Device {
        self.lock().store(device)
    }

    pub fn object(&self, name: &str) -> Option<Device> {
        self.lock().objects.get(name).cloned()
    }

    pub fn calls(&self) -> StoreCalls {
        self.lock().calls
    }

    /// Number of creates and updates that changed the stored object.
    pub fn committed_writes(&self) -> usize {
        self.lock().committed_writes
    }

    pub fn fail_next_get(&self, error: StoreError) {
        self.lock().get_failures.push_back(error);
    }

    pub fn fail_next_create(&self, error: StoreError) {
        self.lock().create_failures.push_back(error);
    }

    pub fn fail_next_update(&self, error: StoreError) {
        self.lock().update_failures.push_back(error);
    }

    /// Makes the next create lose a race: `device` is stored by a competing
    /// writer just before the create is applied.
    pub fn race_next_create(&self, device: Device) {
        self.lock().racing_create = Some(device);
    }

    /// Makes the next update race a competing writer that stores `device`
    /// between the caller's read and its write.
    pub fn race_next_update(&self, device: Device) {
        self.lock().racing_update = Some(device);
    }
}

fn object_name(device: &Device) -> Result<&str, Report<StoreError>> {
    device.metadata.name.as_deref().ok_or_else(|| {
        Report::new(StoreError::Request {
            message: "device object has no name".to_string(),
        })
    })
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn get(&self, name: &str) -> Result<Option<Device>, Report<StoreError>> {
        let mut inner = self.lock();
        inner.calls.get += 1;
        if let Some(error) = inner.get_failures.pop_front() {
            return Err(Report::new(error));
        }
        Ok(inner.objects.get(name).cloned())
    }

    async fn create(&self, device: &Device) -> Result<Device, Report<StoreError>> {
        let name = object_name(device)?;
        let mut inner = self.lock();
        inner.calls.create += 1;
        if let Some(error) = inner.create_failures.pop_front() {
            return Err(Report::new(error));
        }
        if let Some(competitor) = inner.racing_create.take() {
            inner.store(competitor);
        }
        if inner.objects.contains_key(name) {
            return Err(Report::new(StoreError::AlreadyExists)
                .attach_printable(format!("device object {name} already exists")));
        }
        inner.committed_writes += 1;
        Ok(inner.store(device.clone()))
    }

    async fn update(&self, device: &Device) -> Result<Device, Report<StoreError>> {
        let name = object_name(device)?;
        let mut inner = self.lock();
        inner.calls.update += 1;
        if let Some(error) = inner.update_failures.pop_front() {
            return Err(Report::new(error));
        }
        if let Some(competitor) = inner.racing_update.take() {
            inner.store(competitor);
        }
        let Some(current) = inner.objects.get(name) else {
            return Err(Report::new(StoreError::NotFound));
        };
        if current.metadata.resource_version != device.metadata.resource_version {
            return Err(Report::new(StoreError::Conflict).attach_printable(format!(
                "stale resource version {:?}, current {:?}",
                device.metadata.resource_version, current.metadata.resource_version
            )));
        }
        inner.committed_writes += 1;
        Ok(inner.store(device.clone()))
    }
}

#[cfg(test)]
mod tests {
    use api_types::DeviceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use similar_asserts::assert_eq;

    use super::*;

    fn device(name: &str) -> Device {
        Device::new(
            ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            DeviceSpec::default(),
        )
    }

    #[tokio::test]
    async fn test_create_then_get_assigns_version() {
        let store = InMemoryInventoryStore::new();

        let created = store.create(&device("node-1")).await.expect("create should succeed");
        let fetched = store
            .get("node-1")
            .await
            .expect("get should succeed")
            .expect("object should exist");

        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert_eq!(fetched.metadata.resource_version.as_deref(), Some("1"));
        assert_eq!(store.committed_writes(), 1);
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = InMemoryInventoryStore::new();
        let first = store.insert(device("node-1"));
        store.insert(first.clone());

        let result = store.update(&first).await;

        assert_eq!(
            result.unwrap_err().current_context(),
            &StoreError::Conflict
        );
        assert_eq!(store.committed_writes(), 0);
    }

    #[tokio::test]
    async fn test_update_missing_object_is_not_found() {
        let store = InMemoryInventoryStore::new();
        let result = store.update(&device("node-1")).await;
        assert_eq!(result.unwrap_err().current_context(), &StoreError::NotFound);
    }

    #[tokio::test]
    async fn test_racing_create_reports_already_exists() {
        let store = InMemoryInventoryStore::new();
        store.race_next_create(device("node-1"));

        let result = store.create(&device("node-1")).await;

        assert_eq!(
            result.unwrap_err().current_context(),
            &StoreError::AlreadyExists
        );
        assert!(store.object("node-1").is_some());
    }

    #[tokio::test]
    async fn test_racing_update_makes_read_version_stale() {
        let store = InMemoryInventoryStore::new();
        let read = store.insert(device("node-1"));
        store.race_next_update(device("node-1"));

        let result = store.update(&read).await;

        assert_eq!(result.unwrap_err().current_context(), &StoreError::Conflict);
        let current = store.object("node-1").expect("object should exist");
        assert_eq!(current.metadata.resource_version.as_deref(), Some("2"));
        assert!(store.update(&current).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_once() {
        let store = InMemoryInventoryStore::new();
        store.fail_next_get(StoreError::TooManyRequests);

        assert!(store.get("node-1").await.is_err());
        assert!(store.get("node-1").await.expect("get should succeed").is_none());
        assert_eq!(store.calls().get, 2);
    }
}
