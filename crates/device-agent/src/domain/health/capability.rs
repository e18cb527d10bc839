//! Contract of the vendor device-management library as consumed by the
//! health monitor.
//!
//! [`DeviceCapability`] covers library initialization and device enumeration,
//! [`FaultEventSet`] is the fault subscription. The NVML adapter lives in
//! `infrastructure::nvml`, the test double in [`super::mock`].

use core::error::Error;
use std::time::Duration;

use error_stack::Report;

/// Errors reported by a device capability.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum CapabilityError {
    #[display("device management library is not available: {message}")]
    Unavailable { message: String },
    #[display("operation is not supported by the device")]
    NotSupported,
    #[display("timed out waiting for a fault event")]
    Timeout,
    #[display("capability used before initialization")]
    Uninitialized,
    #[display("device management call failed: {message}")]
    Failed { message: String },
}

impl Error for CapabilityError {}

/// Opaque reference to an enumerated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle {
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultEventType {
    /// Critical XID error, the only category that affects device health
    CriticalXid,
    /// Any other event type, carrying the raw vendor bitmask
    Other(u64),
}

/// Device an event was raised for, as resolved by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDevice {
    /// Resolved identifier. Empty when the event is not scoped to one device.
    Uuid(String),
    /// The adapter could not resolve the device.
    Unresolved { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultEvent {
    pub event_type: FaultEventType,
    /// XID code for critical XID events
    pub xid: Option<u64>,
    pub device: EventDevice,
}

impl FaultEvent {
    pub fn critical_xid(xid: u64, uuid: impl Into<String>) -> Self {
        Self {
            event_type: FaultEventType::CriticalXid,
            xid: Some(xid),
            device: EventDevice::Uuid(uuid.into()),
        }
    }

    /// A critical XID whose scope cannot be narrowed to one device.
    pub fn critical_xid_unscoped(xid: u64) -> Self {
        Self::critical_xid(xid, String::new())
    }
}

/// Device enumeration side of the vendor library.
pub trait DeviceCapability: Send {
    /// Loads and initializes the library.
    ///
    /// [`CapabilityError::Unavailable`] means no driver or library is present.
    fn initialize(&mut self) -> Result<(), Report<CapabilityError>>;

    fn device_count(&self) -> Result<u32, Report<CapabilityError>>;

    fn device_handle(&self, index: u32) -> Result<DeviceHandle, Report<CapabilityError>>;

    fn device_uuid(&self, handle: &DeviceHandle) -> Result<String, Report<CapabilityError>>;

    /// Acquires a fault event set. The set is released when the returned value
    /// is dropped.
    fn create_event_set(&self) -> Result<Box<dyn FaultEventSet + '_>, Report<CapabilityError>>;
}

/// Fault subscription owned by one monitoring session.
pub trait FaultEventSet {
    /// Subscribes the device to critical fault events.
    ///
    /// [`CapabilityError::NotSupported`] means the device predates fault events.
    fn register_fault_events(&mut self, uuid: &str) -> Result<(), Report<CapabilityError>>;

    /// Blocks for at most `timeout`. Returns [`CapabilityError::Timeout`] when
    /// nothing arrived.
    fn wait_for_event(&self, timeout: Duration) -> Result<FaultEvent, Report<CapabilityError>>;

    fn event_device_uuid(&self, event: &FaultEvent) -> Result<String, Report<CapabilityError>> {
        match &event.device {
            EventDevice::Uuid(uuid) => Ok(uuid.clone()),
            EventDevice::Unresolved { reason } => Err(Report::new(CapabilityError::Failed {
                message: reason.clone(),
            })),
        }
    }
}
