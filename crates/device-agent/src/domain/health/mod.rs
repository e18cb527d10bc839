//! GPU health monitoring.
//!
//! A [`HealthMonitor`] subscribes to critical fault events through a
//! [`DeviceCapability`] and records faulty devices in a [`HealthState`] that
//! the inventory builder reads on every report cycle.

pub mod capability;
pub mod mock;
pub mod monitor;
pub mod state;

pub use capability::CapabilityError;
pub use capability::DeviceCapability;
pub use capability::FaultEvent;
pub use capability::FaultEventSet;
pub use monitor::HealthMonitor;
pub use monitor::MonitorState;
pub use state::HealthState;
