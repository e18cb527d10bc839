//! Shared API type definitions
//!
//! This crate contains the `Device` custom resource reported by the node agent
//! (`scheduling.koordinator.sh/v1alpha1`), the resource names it carries, and
//! helpers for comparing device lists the way the API server stores them.

mod device;
pub mod quantity;

pub use device::Device;
pub use device::DeviceInfo;
pub use device::DeviceSpec;
pub use device::DeviceType;
pub use device::GPU_CORE;
pub use device::GPU_MEMORY;
pub use device::GPU_MEMORY_RATIO;
