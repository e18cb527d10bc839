//! Device inventory snapshots built from node metrics and device health.

pub mod builder;
pub mod metrics;

pub use builder::InventoryBuilder;
pub use metrics::DeviceMetric;
pub use metrics::DeviceMetricsSource;
pub use metrics::MetricsCache;
pub use metrics::QueryParams;
