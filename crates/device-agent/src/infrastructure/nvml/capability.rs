use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use nvml_wrapper::bitmasks::event::EventTypes;
use nvml_wrapper::enums::event::XidError;
use nvml_wrapper::event::EventSet;
use nvml_wrapper::Nvml;
use tracing::warn;

use super::nvml_error;
use crate::domain::health::capability::DeviceHandle;
use crate::domain::health::capability::EventDevice;
use crate::domain::health::capability::FaultEventType;
use crate::domain::health::CapabilityError;
use crate::domain::health::DeviceCapability;
use crate::domain::health::FaultEvent;
use crate::domain::health::FaultEventSet;

/// [`DeviceCapability`] over the NVML library.
pub struct NvmlCapability {
    nvml: Option<Arc<Nvml>>,
    init_error: Option<Report<CapabilityError>>,
}

impl NvmlCapability {
    /// Wraps the outcome of the process-wide [`init_nvml`](super::init_nvml)
    /// call. A failed load is handed to the monitor through
    /// [`DeviceCapability::initialize`] and never attempted again.
    pub fn new(nvml: Result<Arc<Nvml>, Report<CapabilityError>>) -> Self {
        match nvml {
            Ok(nvml) => Self {
                nvml: Some(nvml),
                init_error: None,
            },
            Err(e) => Self {
                nvml: None,
                init_error: Some(e),
            },
        }
    }

    fn nvml(&self) -> Result<&Nvml, Report<CapabilityError>> {
        self.nvml
            .as_deref()
            .ok_or_else(|| Report::new(CapabilityError::Uninitialized))
    }
}

impl DeviceCapability for NvmlCapability {
    fn initialize(&mut self) -> Result<(), Report<CapabilityError>> {
        if let Some(e) = self.init_error.take() {
            return Err(e);
        }
        self.nvml().map(|_| ())
    }

    fn device_count(&self) -> Result<u32, Report<CapabilityError>> {
        self.nvml()?.device_count().map_err(nvml_error)
    }

    fn device_handle(&self, index: u32) -> Result<DeviceHandle, Report<CapabilityError>> {
        self.nvml()?.device_by_index(index).map_err(nvml_error)?;
        Ok(DeviceHandle { index })
    }

    fn device_uuid(&self, handle: &DeviceHandle) -> Result<String, Report<CapabilityError>> {
        self.nvml()?
            .device_by_index(handle.index)
            .and_then(|device| device.uuid())
            .map_err(nvml_error)
    }

    fn create_event_set(&self) -> Result<Box<dyn FaultEventSet + '_>, Report<CapabilityError>> {
        let nvml = self.nvml()?;
        let set = nvml.create_event_set().map_err(nvml_error)?;
        Ok(Box::new(NvmlFaultEvents {
            nvml,
            set: Some(set),
            registered: Vec::new(),
        }))
    }
}

/// NVML event set plus the devices registered on it.
///
/// A failed registration consumes the underlying set, so the set is rebuilt
/// and the devices already registered are registered again.
struct NvmlFaultEvents<'nvml> {
    nvml: &'nvml Nvml,
    set: Option<EventSet<'nvml>>,
    registered: Vec<String>,
}

impl<'nvml> NvmlFaultEvents<'nvml> {
    fn register(
        &self,
        uuid: &str,
        set: EventSet<'nvml>,
    ) -> Result<EventSet<'nvml>, Report<CapabilityError>> {
        let device = self.nvml.device_by_uuid(uuid).map_err(nvml_error)?;
        device
            .register_events(EventTypes::CRITICAL_XID_ERROR, set)
            .map_err(|e| nvml_error(e.error))
    }

    /// Builds a new set carrying every previously registered device that
    /// still accepts registration. `registered` is only replaced once the
    /// new set exists.
    fn rebuild(&mut self) -> Result<EventSet<'nvml>, Report<CapabilityError>> {
        let (set, kept) = register_all(
            self.registered.clone(),
            || self.nvml.create_event_set().map_err(nvml_error),
            |uuid, set| self.register(uuid, set),
        )?;
        self.registered = kept;
        Ok(set)
    }
}

/// Registers `devices` on a fresh set from `create`.
///
/// A failed registration consumes the set together with the registrations
/// already made on it, so the failing device is dropped and the remaining
/// ones are registered again on a new set.
fn register_all<S, E: Debug>(
    mut devices: Vec<String>,
    create: impl Fn() -> Result<S, E>,
    register: impl Fn(&str, S) -> Result<S, E>,
) -> Result<(S, Vec<String>), E> {
    'attempt: loop {
        let mut set = create()?;
        for index in 0..devices.len() {
            set = match register(&devices[index], set) {
                Ok(set) => set,
                Err(e) => {
                    let uuid = devices.remove(index);
                    warn!(
                        uuid = %uuid,
                        "dropping device from fault events, re-registration failed: {e:?}"
                    );
                    continue 'attempt;
                }
            };
        }
        return Ok((set, devices));
    }
}

impl FaultEventSet for NvmlFaultEvents<'_> {
    fn register_fault_events(&mut self, uuid: &str) -> Result<(), Report<CapabilityError>> {
        let set = match self.set.take() {
            Some(set) => set,
            None => self.rebuild()?,
        };
        match self.register(uuid, set) {
            Ok(set) => {
                self.set = Some(set);
                self.registered.push(uuid.to_string());
                Ok(())
            }
            Err(e) => {
                match self.rebuild() {
                    Ok(set) => self.set = Some(set),
                    Err(rebuild_error) => {
                        warn!("failed to rebuild fault event set: {rebuild_error:?}")
                    }
                }
                Err(e)
            }
        }
    }

    fn wait_for_event(&self, timeout: Duration) -> Result<FaultEvent, Report<CapabilityError>> {
        let set = self
            .set
            .as_ref()
            .ok_or_else(|| Report::new(CapabilityError::Uninitialized))?;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let data = set.wait(timeout_ms).map_err(nvml_error)?;

        let event_type = if data.event_type.contains(EventTypes::CRITICAL_XID_ERROR) {
            FaultEventType::CriticalXid
        } else {
            FaultEventType::Other(data.event_type.bits())
        };
        let xid = match data.event_data {
            Some(XidError::Value(xid)) => Some(xid),
            _ => None,
        };
        // SAFETY: the handle is only compared against null, never dereferenced.
        let device = if unsafe { data.device.handle() }.is_null() {
            EventDevice::Uuid(String::new())
        } else {
            match data.device.uuid() {
                Ok(uuid) => EventDevice::Uuid(uuid),
                Err(e) => EventDevice::Unresolved {
                    reason: e.to_string(),
                },
            }
        };

        Ok(FaultEvent {
            event_type,
            xid,
            device,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::cell::RefCell;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_failed_load_is_reported_once_and_not_retried() {
        let mut capability = NvmlCapability::new(Err(Report::new(CapabilityError::Unavailable {
            message: "libnvidia-ml.so.1: cannot open shared object file".to_string(),
        })));

        assert!(matches!(
            capability.initialize().unwrap_err().current_context(),
            CapabilityError::Unavailable { .. }
        ));
        assert!(matches!(
            capability.initialize().unwrap_err().current_context(),
            CapabilityError::Uninitialized
        ));
        assert!(matches!(
            capability.device_count().unwrap_err().current_context(),
            CapabilityError::Uninitialized
        ));
        assert!(capability.create_event_set().is_err());
    }

    fn devices(uuids: &[&str]) -> Vec<String> {
        uuids.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn test_register_all_drops_failing_device_and_keeps_the_rest() {
        let sets_created = Cell::new(0);
        let attempts = RefCell::new(Vec::new());

        let (set, kept) = register_all(
            devices(&["GPU-1", "GPU-lost", "GPU-3"]),
            || {
                sets_created.set(sets_created.get() + 1);
                Ok::<_, String>(Vec::<String>::new())
            },
            |uuid, mut set| {
                attempts.borrow_mut().push(uuid.to_string());
                if uuid == "GPU-lost" {
                    return Err(format!("{uuid} fell off the bus"));
                }
                set.push(uuid.to_string());
                Ok(set)
            },
        )
        .expect("registration should succeed for the remaining devices");

        assert_eq!(kept, devices(&["GPU-1", "GPU-3"]));
        assert_eq!(set, devices(&["GPU-1", "GPU-3"]));
        assert_eq!(sets_created.get(), 2);
        assert_eq!(
            attempts.into_inner(),
            devices(&["GPU-1", "GPU-lost", "GPU-1", "GPU-3"])
        );
    }

    #[test]
    fn test_register_all_propagates_set_creation_failure() {
        let result = register_all(
            devices(&["GPU-1"]),
            || Err::<Vec<String>, _>("out of memory".to_string()),
            |_, set| Ok(set),
        );

        assert_eq!(result, Err("out of memory".to_string()));
    }

    #[test]
    fn test_register_all_with_every_device_failing_yields_empty_set() {
        let (set, kept) = register_all(
            devices(&["GPU-1", "GPU-2"]),
            || Ok::<_, String>(Vec::<String>::new()),
            |uuid, _| Err(format!("{uuid} is gone")),
        )
        .expect("an empty set is still a set");

        assert!(set.is_empty());
        assert!(kept.is_empty());
    }
}
