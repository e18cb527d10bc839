//! NVML backed device capability and metrics collection.

mod capability;
mod collector;

use error_stack::Report;
use nvml_wrapper::error::NvmlError;
use nvml_wrapper::Nvml;

pub use capability::NvmlCapability;
pub use collector::GpuMetricsCollector;

use crate::domain::health::CapabilityError;

pub fn init_nvml() -> Result<Nvml, Report<CapabilityError>> {
    match Nvml::init() {
        Ok(nvml) => {
            tracing::info!("NVML initialized successfully");
            Ok(nvml)
        }
        Err(e) => {
            tracing::warn!("Standard NVML init failed ({e}), trying with explicit library path");
            let nvml = Nvml::builder()
                .lib_path(std::ffi::OsStr::new("libnvidia-ml.so.1"))
                .init()
                .map_err(nvml_error)?;
            tracing::info!("NVML initialized with explicit library path");
            Ok(nvml)
        }
    }
}

pub(crate) fn nvml_error(e: NvmlError) -> Report<CapabilityError> {
    let context = match &e {
        NvmlError::Timeout => CapabilityError::Timeout,
        NvmlError::NotSupported => CapabilityError::NotSupported,
        NvmlError::Uninitialized => CapabilityError::Uninitialized,
        NvmlError::LibloadingError(_) | NvmlError::LibraryNotFound | NvmlError::DriverNotLoaded => {
            CapabilityError::Unavailable {
                message: e.to_string(),
            }
        }
        _ => CapabilityError::Failed {
            message: e.to_string(),
        },
    };
    Report::new(context)
}
