use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use error_stack::Report;
use nvml_wrapper::Nvml;
use tokio_util::sync::CancellationToken;

use super::nvml_error;
use crate::domain::health::CapabilityError;
use crate::domain::inventory::DeviceMetric;
use crate::domain::inventory::MetricsCache;

/// Samples static device properties from NVML into a [`MetricsCache`].
pub struct GpuMetricsCollector {
    nvml: Arc<Nvml>,
    cache: Arc<MetricsCache>,
}

impl GpuMetricsCollector {
    pub fn new(nvml: Arc<Nvml>, cache: Arc<MetricsCache>) -> Self {
        Self { nvml, cache }
    }

    pub async fn run(&self, collect_interval: Duration, cancellation_token: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    tracing::info!("GPU metrics collector shutdown requested");
                    break;
                }
                _ = async {
                    match self.collect_once() {
                        Ok(sampled) => tracing::debug!(sampled, "collected gpu metrics"),
                        Err(e) => tracing::warn!("Failed to collect GPU metrics: {e:?}"),
                    }
                    tokio::time::sleep(collect_interval).await;
                } => {}
            }
        }
    }

    /// Records one sample per readable device and returns how many were
    /// recorded. A device that cannot be read is skipped.
    pub fn collect_once(&self) -> Result<usize, Report<CapabilityError>> {
        let now = Utc::now();
        let mut sampled = 0;
        for index in 0..self.nvml.device_count().map_err(nvml_error)? {
            match self.sample(index) {
                Ok(metric) => {
                    self.cache.insert(metric, now);
                    sampled += 1;
                }
                Err(e) => tracing::warn!(index, "Failed to read GPU device: {e:?}"),
            }
        }
        self.cache.evict_expired(now);
        Ok(sampled)
    }

    fn sample(&self, index: u32) -> Result<DeviceMetric, Report<CapabilityError>> {
        let device = self.nvml.device_by_index(index).map_err(nvml_error)?;
        let uuid = device.uuid().map_err(nvml_error)?;
        let minor = device.minor_number().map_err(nvml_error)?;
        let memory = device.memory_info().map_err(nvml_error)?;
        let minor = i32::try_from(minor).map_err(|_| {
            Report::new(CapabilityError::Failed {
                message: format!("minor number {minor} of {uuid} is out of range"),
            })
        })?;

        Ok(DeviceMetric {
            uuid,
            minor,
            memory_total_bytes: memory.total,
        })
    }
}
