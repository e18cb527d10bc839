//! Node-local device metrics and the query interface the inventory builder
//! consumes.

use core::error::Error;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Most recent sample inside the window
    Last,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub aggregation: Aggregation,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryParams {
    /// Last-value query over `[now - lookback, now]`.
    pub fn last_within(lookback: Duration) -> Self {
        let end = Utc::now();
        let start = end - chrono::Duration::from_std(lookback).unwrap_or(chrono::Duration::zero());
        Self {
            aggregation: Aggregation::Last,
            start,
            end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMetric {
    pub uuid: String,
    pub minor: i32,
    pub memory_total_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeDeviceMetrics {
    pub devices: Vec<DeviceMetric>,
}

#[derive(Debug, derive_more::Display)]
pub enum MetricsError {
    #[display("invalid query window: start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[display("metrics query failed: {message}")]
    QueryFailed { message: String },
}

impl Error for MetricsError {}

/// Point-in-time device metrics provider.
pub trait DeviceMetricsSource: Send + Sync {
    fn query(&self, params: &QueryParams) -> Result<NodeDeviceMetrics, Report<MetricsError>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMetricSample {
    pub metric: DeviceMetric,
    pub timestamp: DateTime<Utc>,
}

/// In-memory time series of device samples, keyed by device uuid.
#[derive(Debug)]
pub struct MetricsCache {
    samples: RwLock<HashMap<String, VecDeque<DeviceMetricSample>>>,
    retention: Duration,
}

impl Default for MetricsCache {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl MetricsCache {
    pub fn new(retention: Duration) -> Self {
        Self {
            samples: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Appends a sample. Samples for one device are expected in time order.
    pub fn insert(&self, metric: DeviceMetric, timestamp: DateTime<Utc>) {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        samples
            .entry(metric.uuid.clone())
            .or_default()
            .push_back(DeviceMetricSample { metric, timestamp });
    }

    /// Drops samples older than the retention window and devices left with none.
    pub fn evict_expired(&self, now: DateTime<Utc>) {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return;
        };
        let cutoff = now - retention;
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        samples.retain(|_, series| {
            while series.front().is_some_and(|s| s.timestamp < cutoff) {
                series.pop_front();
            }
            !series.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeviceMetricsSource for MetricsCache {
    fn query(&self, params: &QueryParams) -> Result<NodeDeviceMetrics, Report<MetricsError>> {
        if params.start > params.end {
            return Err(Report::new(MetricsError::InvalidWindow {
                start: params.start,
                end: params.end,
            }));
        }

        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let devices = samples
            .values()
            .filter_map(|series| match params.aggregation {
                Aggregation::Last => series
                    .iter()
                    .rev()
                    .find(|s| s.timestamp >= params.start && s.timestamp <= params.end),
            })
            .map(|s| s.metric.clone())
            .collect();

        Ok(NodeDeviceMetrics { devices })
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn metric(uuid: &str, minor: i32, memory: u64) -> DeviceMetric {
        DeviceMetric {
            uuid: uuid.to_string(),
            minor,
            memory_total_bytes: memory,
        }
    }

    #[test]
    fn test_last_within_spans_lookback() {
        let params = QueryParams::last_within(Duration::from_secs(60));
        assert_eq!(params.aggregation, Aggregation::Last);
        assert_eq!(params.end - params.start, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_query_returns_latest_sample_in_window() {
        let cache = MetricsCache::default();
        let now = Utc::now();
        cache.insert(metric("GPU-1", 0, 1), now - chrono::Duration::seconds(30));
        cache.insert(metric("GPU-1", 0, 2), now - chrono::Duration::seconds(10));
        cache.insert(metric("GPU-1", 0, 3), now + chrono::Duration::seconds(10));

        let result = cache
            .query(&QueryParams {
                aggregation: Aggregation::Last,
                start: now - chrono::Duration::seconds(60),
                end: now,
            })
            .expect("query should succeed");

        assert_eq!(result.devices, vec![metric("GPU-1", 0, 2)]);
    }

    #[test]
    fn test_query_skips_devices_without_samples_in_window() {
        let cache = MetricsCache::default();
        let now = Utc::now();
        cache.insert(metric("GPU-stale", 1, 1), now - chrono::Duration::seconds(120));
        cache.insert(metric("GPU-fresh", 0, 1), now - chrono::Duration::seconds(5));

        let mut result = cache
            .query(&QueryParams {
                aggregation: Aggregation::Last,
                start: now - chrono::Duration::seconds(60),
                end: now,
            })
            .expect("query should succeed");
        result.devices.sort_by_key(|d| d.minor);

        assert_eq!(result.devices, vec![metric("GPU-fresh", 0, 1)]);
    }

    #[test]
    fn test_query_rejects_inverted_window() {
        let cache = MetricsCache::default();
        let now = Utc::now();
        let result = cache.query(&QueryParams {
            aggregation: Aggregation::Last,
            start: now,
            end: now - chrono::Duration::seconds(1),
        });

        assert!(matches!(
            result.unwrap_err().current_context(),
            MetricsError::InvalidWindow { .. }
        ));
    }

    #[test]
    fn test_evict_expired_drops_old_samples() {
        let cache = MetricsCache::new(Duration::from_secs(60));
        let now = Utc::now();
        cache.insert(metric("GPU-1", 0, 1), now - chrono::Duration::seconds(120));
        cache.insert(metric("GPU-1", 0, 2), now - chrono::Duration::seconds(30));
        cache.insert(metric("GPU-2", 1, 1), now - chrono::Duration::seconds(90));
        assert_eq!(cache.len(), 3);

        cache.evict_expired(now);

        assert_eq!(cache.len(), 1);
        let result = cache
            .query(&QueryParams::last_within(Duration::from_secs(600)))
            .expect("query should succeed");
        assert_eq!(result.devices, vec![metric("GPU-1", 0, 2)]);
    }
}
