//! Test double for the device capability
//!
//! [`FakeCapability`] scripts device enumeration and registration outcomes;
//! events are injected through the paired [`FakeEventSender`].

use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use error_stack::Report;

use super::capability::CapabilityError;
use super::capability::DeviceCapability;
use super::capability::DeviceHandle;
use super::capability::FaultEvent;
use super::capability::FaultEventSet;

/// Outcome of registering a fake device for fault events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Supported,
    Unsupported,
    Fails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitOutcome {
    Ok,
    Unavailable,
    Fails,
}

#[derive(Debug, Clone)]
struct FakeDevice {
    uuid: String,
    registration: Registration,
    handle_fails: bool,
}

/// Sends fault events into a [`FakeCapability`].
#[derive(Debug, Clone)]
pub struct FakeEventSender(mpsc::Sender<FaultEvent>);

impl FakeEventSender {
    /// Returns `false` once the capability has been dropped.
    pub fn send(&self, event: FaultEvent) -> bool {
        self.0.send(event).is_ok()
    }
}

pub struct FakeCapability {
    init: InitOutcome,
    initialized: bool,
    devices: Vec<FakeDevice>,
    events: Mutex<mpsc::Receiver<FaultEvent>>,
    live_event_sets: Arc<AtomicUsize>,
    registered: Arc<Mutex<HashSet<String>>>,
    event_set_fails: bool,
    event_set_lost: bool,
}

impl FakeCapability {
    pub fn new() -> (Self, FakeEventSender) {
        let (tx, rx) = mpsc::channel();
        let capability = Self {
            init: InitOutcome::Ok,
            initialized: false,
            devices: Vec::new(),
            events: Mutex::new(rx),
            live_event_sets: Arc::new(AtomicUsize::new(0)),
            registered: Arc::new(Mutex::new(HashSet::new())),
            event_set_fails: false,
            event_set_lost: false,
        };
        (capability, FakeEventSender(tx))
    }

    pub fn with_device(self, uuid: &str) -> Self {
        self.with_device_registration(uuid, Registration::Supported)
    }

    pub fn with_device_registration(mut self, uuid: &str, registration: Registration) -> Self {
        self.devices.push(FakeDevice {
            uuid: uuid.to_string(),
            registration,
            handle_fails: false,
        });
        self
    }

    /// Adds a device whose handle cannot be obtained during enumeration.
    pub fn with_broken_device(mut self, uuid: &str) -> Self {
        self.devices.push(FakeDevice {
            uuid: uuid.to_string(),
            registration: Registration::Supported,
            handle_fails: true,
        });
        self
    }

    /// Initialization reports that no library is installed.
    pub fn unavailable(mut self) -> Self {
        self.init = InitOutcome::Unavailable;
        self
    }

    /// Initialization fails for a reason other than a missing library.
    pub fn failing_init(mut self) -> Self {
        self.init = InitOutcome::Fails;
        self
    }

    /// Event set creation fails.
    pub fn failing_event_set(mut self) -> Self {
        self.event_set_fails = true;
        self
    }

    /// The event set is created but waiting on it reports that it is gone,
    /// as after a failed rebuild.
    pub fn lost_event_set(mut self) -> Self {
        self.event_set_lost = true;
        self
    }

    /// Number of event sets acquired and not yet released.
    pub fn live_event_sets(&self) -> Arc<AtomicUsize> {
        self.live_event_sets.clone()
    }

    /// Devices successfully registered for fault events.
    pub fn registered_devices(&self) -> Arc<Mutex<HashSet<String>>> {
        self.registered.clone()
    }

    fn ensure_initialized(&self) -> Result<(), Report<CapabilityError>> {
        if self.initialized {
            Ok(())
        } else {
            Err(Report::new(CapabilityError::Uninitialized))
        }
    }
}

impl DeviceCapability for FakeCapability {
    fn initialize(&mut self) -> Result<(), Report<CapabilityError>> {
        match self.init {
            InitOutcome::Ok => {
                self.initialized = true;
                Ok(())
            }
            InitOutcome::Unavailable => Err(Report::new(CapabilityError::Unavailable {
                message: "library not found".to_string(),
            })),
            InitOutcome::Fails => Err(Report::new(CapabilityError::Failed {
                message: "driver/library version mismatch".to_string(),
            })),
        }
    }

    fn device_count(&self) -> Result<u32, Report<CapabilityError>> {
        self.ensure_initialized()?;
        Ok(self.devices.len() as u32)
    }

    fn device_handle(&self, index: u32) -> Result<DeviceHandle, Report<CapabilityError>> {
        self.ensure_initialized()?;
        match self.devices.get(index as usize) {
            Some(device) if !device.handle_fails => Ok(DeviceHandle { index }),
            Some(_) => Err(Report::new(CapabilityError::Failed {
                message: format!("GPU is lost at index {index}"),
            })),
            None => Err(Report::new(CapabilityError::Failed {
                message: format!("no device at index {index}"),
            })),
        }
    }

    fn device_uuid(&self, handle: &DeviceHandle) -> Result<String, Report<CapabilityError>> {
        self.ensure_initialized()?;
        self.devices
            .get(handle.index as usize)
            .map(|d| d.uuid.clone())
            .ok_or_else(|| {
                Report::new(CapabilityError::Failed {
                    message: format!("no device at index {}", handle.index),
                })
            })
    }

    fn create_event_set(&self) -> Result<Box<dyn FaultEventSet + '_>, Report<CapabilityError>> {
        self.ensure_initialized()?;
        if self.event_set_fails {
            return Err(Report::new(CapabilityError::Failed {
                message: "insufficient resources to create event set".to_string(),
            }));
        }
        self.live_event_sets.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeFaultEvents { capability: self }))
    }
}

struct FakeFaultEvents<'a> {
    capability: &'a FakeCapability,
}

impl Drop for FakeFaultEvents<'_> {
    fn drop(&mut self) {
        self.capability
            .live_event_sets
            .fetch_sub(1, Ordering::SeqCst);
    }
}

impl FaultEventSet for FakeFaultEvents<'_> {
    fn register_fault_events(&mut self, uuid: &str) -> Result<(), Report<CapabilityError>> {
        let device = self
            .capability
            .devices
            .iter()
            .find(|d| d.uuid == uuid)
            .ok_or_else(|| {
                Report::new(CapabilityError::Failed {
                    message: format!("unknown device {uuid}"),
                })
            })?;

        match device.registration {
            Registration::Supported => {
                self.capability
                    .registered
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(uuid.to_string());
                Ok(())
            }
            Registration::Unsupported => Err(Report::new(CapabilityError::NotSupported)),
            Registration::Fails => Err(Report::new(CapabilityError::Failed {
                message: format!("failed to register events for {uuid}"),
            })),
        }
    }

    fn wait_for_event(&self, timeout: Duration) -> Result<FaultEvent, Report<CapabilityError>> {
        if self.capability.event_set_lost {
            return Err(Report::new(CapabilityError::Uninitialized));
        }
        let events = self
            .capability
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match events.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Report::new(CapabilityError::Timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // Sender gone: behave like an idle device rather than spinning.
                std::thread::sleep(timeout);
                Err(Report::new(CapabilityError::Timeout))
            }
        }
    }
}
