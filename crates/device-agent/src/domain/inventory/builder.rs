use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use api_types::DeviceInfo;
use api_types::DeviceType;
use api_types::GPU_CORE;
use api_types::GPU_MEMORY;
use api_types::GPU_MEMORY_RATIO;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;
use tracing::error;

use super::metrics::DeviceMetric;
use super::metrics::DeviceMetricsSource;
use super::metrics::QueryParams;
use crate::domain::health::HealthState;

/// Trailing window of the metrics query. It tolerates collection jitter; the
/// query takes the last value, it does not average.
pub const METRICS_LOOKBACK: Duration = Duration::from_secs(60);

/// Full share of a device, used for both core and memory ratio.
const FULL_SHARE: i64 = 100;

/// Joins device metrics with the health state into an inventory snapshot.
pub struct InventoryBuilder {
    metrics: Arc<dyn DeviceMetricsSource>,
    health: Arc<HealthState>,
}

impl InventoryBuilder {
    pub fn new(metrics: Arc<dyn DeviceMetricsSource>, health: Arc<HealthState>) -> Self {
        Self { metrics, health }
    }

    /// Builds the current snapshot sorted by minor number.
    ///
    /// A failed or empty metrics query yields an empty snapshot.
    pub fn build_snapshot(&self) -> Vec<DeviceInfo> {
        let node_metrics = match self.metrics.query(&QueryParams::last_within(METRICS_LOOKBACK)) {
            Ok(node_metrics) => node_metrics,
            Err(e) => {
                error!("failed to get node device metrics: {e:?}");
                return Vec::new();
            }
        };
        if node_metrics.devices.is_empty() {
            debug!("no gpu device found");
            return Vec::new();
        }

        let mut devices: Vec<DeviceInfo> = node_metrics
            .devices
            .iter()
            .map(|metric| self.device_info(metric))
            .collect();
        DeviceInfo::sort_by_minor(&mut devices);
        devices
    }

    fn device_info(&self, metric: &DeviceMetric) -> DeviceInfo {
        DeviceInfo {
            uuid: metric.uuid.clone(),
            minor: metric.minor,
            device_type: DeviceType::Gpu,
            health: self.health.is_healthy(&metric.uuid),
            resources: BTreeMap::from([
                (GPU_CORE.to_string(), Quantity(FULL_SHARE.to_string())),
                (
                    GPU_MEMORY.to_string(),
                    Quantity(metric.memory_total_bytes.to_string()),
                ),
                (GPU_MEMORY_RATIO.to_string(), Quantity(FULL_SHARE.to_string())),
            ]),
        }
    }
}
