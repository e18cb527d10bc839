use std::sync::Arc;

use crate::domain::health::HealthMonitor;
use crate::domain::health::HealthState;
use crate::domain::reconcile::NodeIdentity;
use crate::domain::reconcile::Reconciler;
use crate::infrastructure::nvml::GpuMetricsCollector;

/// Application dependencies
pub struct ApplicationServices {
    pub node: NodeIdentity,
    pub health_state: Arc<HealthState>,
    /// Taken by the monitor task when it starts
    pub health_monitor: Option<HealthMonitor>,
    /// Absent when NVML could not be loaded
    pub metrics_collector: Option<Arc<GpuMetricsCollector>>,
    pub reconciler: Arc<Reconciler>,
}
