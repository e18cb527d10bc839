use core::error::Error;
use std::sync::Arc;

use api_types::Device;
use api_types::DeviceInfo;
use api_types::DeviceSpec;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;
use tracing::info;

use super::retry::RetryPolicy;
use super::store::InventoryStore;
use super::store::StoreError;
use crate::domain::inventory::InventoryBuilder;

/// The node that owns the device object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ReportOutcome {
    /// No devices were found, the store was not touched
    #[display("skipped")]
    Skipped,
    #[display("unchanged")]
    Unchanged,
    #[display("updated")]
    Updated,
    #[display("created")]
    Created,
}

#[derive(Debug, derive_more::Display)]
pub enum ReconcileError {
    #[display("failed to update device object for node {node}")]
    UpdateFailed { node: String },
    #[display("failed to create device object for node {node}")]
    CreateFailed { node: String },
}

impl Error for ReconcileError {}

/// Keeps the node's device object in line with the inventory snapshot.
pub struct Reconciler {
    builder: InventoryBuilder,
    store: Arc<dyn InventoryStore>,
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(
        builder: InventoryBuilder,
        store: Arc<dyn InventoryStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            builder,
            store,
            retry,
        }
    }

    /// Runs one report cycle for `node`.
    ///
    /// An empty snapshot never reaches the store, so a metrics outage cannot
    /// wipe a previously reported inventory.
    pub async fn report_devices(
        &self,
        node: &NodeIdentity,
    ) -> Result<ReportOutcome, Report<ReconcileError>> {
        let devices = self.builder.build_snapshot();
        if devices.is_empty() {
            debug!(node = %node.name, "no devices to report");
            return Ok(ReportOutcome::Skipped);
        }

        match self.update_with_retry(&node.name, &devices).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if *e.current_context() == StoreError::NotFound => {
                self.create(node, devices).await
            }
            Err(e) => Err(e.change_context(ReconcileError::UpdateFailed {
                node: node.name.clone(),
            })),
        }
    }

    async fn update_with_retry(
        &self,
        name: &str,
        devices: &[DeviceInfo],
    ) -> Result<ReportOutcome, Report<StoreError>> {
        self.retry
            .retry(
                || self.try_update(name, devices),
                |e| e.current_context().is_retriable(),
            )
            .await
    }

    async fn try_update(
        &self,
        name: &str,
        devices: &[DeviceInfo],
    ) -> Result<ReportOutcome, Report<StoreError>> {
        let Some(mut existing) = self.store.get(name).await? else {
            return Err(Report::new(StoreError::NotFound));
        };
        DeviceInfo::sort_by_minor(&mut existing.spec.devices);
        if DeviceInfo::lists_semantically_equal(&existing.spec.devices, devices) {
            debug!(node = name, "device object is up to date");
            return Ok(ReportOutcome::Unchanged);
        }

        existing.spec.devices = devices.to_vec();
        self.store.update(&existing).await?;
        info!(node = name, devices = devices.len(), "updated device object");
        Ok(ReportOutcome::Updated)
    }

    async fn create(
        &self,
        node: &NodeIdentity,
        devices: Vec<DeviceInfo>,
    ) -> Result<ReportOutcome, Report<ReconcileError>> {
        let device = Device::new(
            ObjectMeta {
                name: Some(node.name.clone()),
                owner_references: Some(vec![node_owner_reference(node)]),
                ..Default::default()
            },
            DeviceSpec {
                devices: devices.clone(),
            },
        );

        match self.store.create(&device).await {
            Ok(_) => {
                info!(node = %node.name, devices = devices.len(), "created device object");
                Ok(ReportOutcome::Created)
            }
            Err(e) if *e.current_context() == StoreError::AlreadyExists => {
                debug!(node = %node.name, "device object created concurrently, updating instead");
                self.update_with_retry(&node.name, &devices)
                    .await
                    .change_context(ReconcileError::UpdateFailed {
                        node: node.name.clone(),
                    })
            }
            Err(e) => Err(e.change_context(ReconcileError::CreateFailed {
                node: node.name.clone(),
            })),
        }
    }
}

fn node_owner_reference(node: &NodeIdentity) -> OwnerReference {
    OwnerReference {
        api_version: "v1".to_string(),
        kind: "Node".to_string(),
        name: node.name.clone(),
        uid: node.uid.clone(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}
