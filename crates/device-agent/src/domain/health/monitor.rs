use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::capability::CapabilityError;
use super::capability::DeviceCapability;
use super::capability::FaultEvent;
use super::capability::FaultEventSet;
use super::capability::FaultEventType;
use super::state::HealthState;

/// XIDs raised for application errors; the GPU itself is still healthy.
///
/// See <https://docs.nvidia.com/deploy/xid-errors/index.html#topic_4>.
pub const APPLICATION_XIDS: [u64; 5] = [13, 31, 43, 45, 68];

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Lifecycle of one monitoring session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Uninitialized,
    Initialized,
    Watching,
    Stopped,
    /// Initialization failed; monitoring stays off for the process lifetime.
    Disabled,
}

/// Watches device fault events and quarantines faulty devices in the shared
/// [`HealthState`].
pub struct HealthMonitor {
    capability: Box<dyn DeviceCapability>,
    health: Arc<HealthState>,
    wait_timeout: Duration,
    state: watch::Sender<MonitorState>,
}

impl HealthMonitor {
    pub fn new(
        capability: Box<dyn DeviceCapability>,
        health: Arc<HealthState>,
        wait_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(MonitorState::Uninitialized);
        Self {
            capability,
            health,
            wait_timeout,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    /// Runs the session on a blocking thread until `cancellation_token` fires
    /// or monitoring cannot start. Returns the final state.
    pub async fn run(self, cancellation_token: CancellationToken) -> MonitorState {
        match tokio::task::spawn_blocking(move || self.run_blocking(&cancellation_token)).await {
            Ok(final_state) => final_state,
            Err(e) => {
                error!("GPU health monitor thread failed: {e}");
                MonitorState::Stopped
            }
        }
    }

    /// Blocking body of [`HealthMonitor::run`]. Cancellation is observed
    /// within one wait timeout.
    #[tracing::instrument(skip_all)]
    pub fn run_blocking(mut self, cancellation_token: &CancellationToken) -> MonitorState {
        if let Err(e) = self.capability.initialize() {
            match e.current_context() {
                CapabilityError::Unavailable { .. } => {
                    warn!("GPU management library not found, health check disabled: {e:?}")
                }
                _ => warn!("GPU management library init failed, health check disabled: {e:?}"),
            }
            return self.set_state(MonitorState::Disabled);
        }
        self.set_state(MonitorState::Initialized);

        let devices = self.discover_devices();
        if devices.is_empty() {
            error!("no gpu device found");
            return self.set_state(MonitorState::Stopped);
        }

        let mut events = match self.capability.create_event_set() {
            Ok(events) => events,
            Err(e) => {
                error!("failed to create event set: {e:?}");
                return self.set_state(MonitorState::Stopped);
            }
        };
        self.register_devices(events.as_mut(), &devices);

        info!(devices = devices.len(), "start to do gpu health check");
        self.set_state(MonitorState::Watching);
        self.watch(events.as_ref(), &devices, cancellation_token);

        drop(events);
        info!("GPU health check stopped");
        self.set_state(MonitorState::Stopped)
    }

    fn set_state(&self, state: MonitorState) -> MonitorState {
        self.state.send_replace(state);
        state
    }

    fn discover_devices(&self) -> Vec<String> {
        let count = match self.capability.device_count() {
            Ok(count) => count,
            Err(e) => {
                error!("unable to get device count: {e:?}");
                return Vec::new();
            }
        };

        let mut devices = Vec::with_capacity(count as usize);
        for index in 0..count {
            let handle = match self.capability.device_handle(index) {
                Ok(handle) => handle,
                Err(e) => {
                    error!("unable to get device at index {index}: {e:?}");
                    continue;
                }
            };
            match self.capability.device_uuid(&handle) {
                Ok(uuid) => devices.push(uuid),
                Err(e) => error!("failed to get device uuid at index {index}: {e:?}"),
            }
        }
        devices
    }

    fn register_devices(&self, events: &mut dyn FaultEventSet, devices: &[String]) {
        for uuid in devices {
            match events.register_fault_events(uuid) {
                Ok(()) => debug!("registered fault events for device {uuid}"),
                Err(e) if matches!(e.current_context(), CapabilityError::NotSupported) => {
                    info!("{uuid} does not support fault events, marking it unhealthy");
                    self.quarantine(uuid);
                }
                Err(e) => error!("failed to register event for device {uuid}: {e:?}"),
            }
        }
    }

    fn watch(
        &self,
        events: &dyn FaultEventSet,
        devices: &[String],
        cancellation_token: &CancellationToken,
    ) {
        while !cancellation_token.is_cancelled() {
            match events.wait_for_event(self.wait_timeout) {
                Ok(event) => self.handle_event(events, &event, devices),
                Err(e) if matches!(e.current_context(), CapabilityError::Uninitialized) => {
                    error!("fault event set is gone, stopping gpu health check: {e:?}");
                    return;
                }
                Err(e) => self.handle_wait_error(e),
            }
        }
    }

    fn handle_wait_error(&self, e: Report<CapabilityError>) {
        if matches!(e.current_context(), CapabilityError::Timeout) {
            return;
        }
        debug!("waiting for fault event failed: {e:?}");
        // Keeps a persistently failing wait from spinning.
        std::thread::sleep(self.wait_timeout / 10);
    }

    fn handle_event(&self, events: &dyn FaultEventSet, event: &FaultEvent, devices: &[String]) {
        if event.event_type != FaultEventType::CriticalXid {
            return;
        }
        if let Some(xid) = event.xid {
            if APPLICATION_XIDS.contains(&xid) {
                debug!("ignoring application xid {xid}");
                return;
            }
        }

        let uuid = match events.event_device_uuid(event) {
            Ok(uuid) => uuid,
            Err(e) => {
                error!("failed to get uuid of faulted device (xid {:?}): {e:?}", event.xid);
                return;
            }
        };

        if uuid.is_empty() {
            warn!(
                "critical xid {:?} is not scoped to a device, marking all devices unhealthy",
                event.xid
            );
            for device in devices {
                self.quarantine(device);
            }
            return;
        }

        match devices.iter().find(|d| **d == uuid) {
            Some(device) => self.quarantine(device),
            None => debug!("ignoring fault event for untracked device {uuid}"),
        }
    }

    fn quarantine(&self, uuid: &str) {
        if self.health.mark_unhealthy(uuid) {
            info!("marked gpu {uuid} unhealthy");
        }
    }
}
