//! Drives the health monitor, inventory builder and reconciler together
//! against in-process doubles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use api_types::DeviceInfo;
use api_types::DeviceType;
use api_types::GPU_CORE;
use api_types::GPU_MEMORY;
use api_types::GPU_MEMORY_RATIO;
use chrono::Utc;
use device_agent::health::mock::FakeCapability;
use device_agent::health::mock::FakeEventSender;
use device_agent::health::FaultEvent;
use device_agent::health::HealthMonitor;
use device_agent::health::HealthState;
use device_agent::health::MonitorState;
use device_agent::inventory::DeviceMetric;
use device_agent::inventory::InventoryBuilder;
use device_agent::inventory::MetricsCache;
use device_agent::reconcile::memory::InMemoryInventoryStore;
use device_agent::reconcile::memory::StoreCalls;
use device_agent::reconcile::NodeIdentity;
use device_agent::reconcile::Reconciler;
use device_agent::reconcile::ReportOutcome;
use device_agent::reconcile::RetryPolicy;
use device_agent::reconcile::StoreError;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use similar_asserts::assert_eq;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT_TIMEOUT: Duration = Duration::from_millis(20);

struct Agent {
    metrics: Arc<MetricsCache>,
    health: Arc<HealthState>,
    store: Arc<InMemoryInventoryStore>,
    reconciler: Reconciler,
    events: FakeEventSender,
    token: CancellationToken,
    monitor: JoinHandle<MonitorState>,
}

impl Agent {
    async fn start(capability: FakeCapability, events: FakeEventSender) -> Self {
        let metrics = Arc::new(MetricsCache::default());
        let health = Arc::new(HealthState::new());
        let store = Arc::new(InMemoryInventoryStore::new());
        let reconciler = Reconciler::new(
            InventoryBuilder::new(metrics.clone(), health.clone()),
            store.clone(),
            RetryPolicy {
                initial_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );

        let monitor = HealthMonitor::new(Box::new(capability), health.clone(), WAIT_TIMEOUT);
        let mut state = monitor.subscribe();
        let token = CancellationToken::new();
        let monitor = tokio::spawn(monitor.run(token.clone()));
        state
            .wait_for(|s| *s == MonitorState::Watching)
            .await
            .expect("monitor should start watching");

        Self {
            metrics,
            health,
            store,
            reconciler,
            events,
            token,
            monitor,
        }
    }

    fn observe_gpu(&self, uuid: &str, minor: i32, memory: u64) {
        self.metrics.insert(
            DeviceMetric {
                uuid: uuid.to_string(),
                minor,
                memory_total_bytes: memory,
            },
            Utc::now(),
        );
    }

    async fn report(&self) -> ReportOutcome {
        self.reconciler
            .report_devices(&node())
            .await
            .expect("report should succeed")
    }

    async fn wait_until_unhealthy(&self, uuid: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.health.is_healthy(uuid) {
                tokio::time::sleep(WAIT_TIMEOUT).await;
            }
        })
        .await
        .expect("device should be marked unhealthy");
    }

    fn stored_devices(&self) -> Vec<DeviceInfo> {
        self.store
            .object("node-1")
            .expect("device object should exist")
            .spec
            .devices
    }

    async fn stop(self) -> MonitorState {
        self.token.cancel();
        self.monitor.await.expect("monitor task should not panic")
    }
}

fn node() -> NodeIdentity {
    NodeIdentity {
        name: "node-1".to_string(),
        uid: "2f1c7a5e-node-1".to_string(),
    }
}

fn gpu(uuid: &str, minor: i32, memory: &str, health: bool) -> DeviceInfo {
    DeviceInfo {
        uuid: uuid.to_string(),
        minor,
        device_type: DeviceType::Gpu,
        health,
        resources: BTreeMap::from([
            (GPU_CORE.to_string(), Quantity("100".to_string())),
            (GPU_MEMORY.to_string(), Quantity(memory.to_string())),
            (GPU_MEMORY_RATIO.to_string(), Quantity("100".to_string())),
        ]),
    }
}

#[test_log::test(tokio::test)]
async fn critical_xid_is_reported_once_and_sticks() {
    let (capability, events) = FakeCapability::new();
    let agent = Agent::start(capability.with_device("GPU-1"), events).await;
    agent.observe_gpu("GPU-1", 0, 16_000_000_000);

    assert_eq!(agent.report().await, ReportOutcome::Created);
    assert_eq!(
        agent.stored_devices(),
        vec![gpu("GPU-1", 0, "16000000000", true)]
    );

    assert!(agent.events.send(FaultEvent::critical_xid(48, "GPU-1")));
    agent.wait_until_unhealthy("GPU-1").await;

    assert_eq!(agent.report().await, ReportOutcome::Updated);
    assert_eq!(
        agent.stored_devices(),
        vec![gpu("GPU-1", 0, "16000000000", false)]
    );

    assert_eq!(agent.report().await, ReportOutcome::Unchanged);
    assert_eq!(agent.store.committed_writes(), 2);
    assert_eq!(agent.stop().await, MonitorState::Stopped);
}

#[test_log::test(tokio::test)]
async fn ambiguous_fault_quarantines_every_device() {
    let (capability, events) = FakeCapability::new();
    let agent = Agent::start(
        capability.with_device("GPU-1").with_device("GPU-2"),
        events,
    )
    .await;
    agent.observe_gpu("GPU-2", 1, 8_000_000_000);
    agent.observe_gpu("GPU-1", 0, 8_000_000_000);

    assert!(agent.events.send(FaultEvent::critical_xid_unscoped(79)));
    agent.wait_until_unhealthy("GPU-1").await;
    agent.wait_until_unhealthy("GPU-2").await;

    assert_eq!(agent.report().await, ReportOutcome::Created);
    assert_eq!(
        agent.stored_devices(),
        vec![
            gpu("GPU-1", 0, "8000000000", false),
            gpu("GPU-2", 1, "8000000000", false),
        ]
    );
    agent.stop().await;
}

#[test_log::test(tokio::test)]
async fn application_fault_does_not_touch_inventory() {
    let (capability, events) = FakeCapability::new();
    let agent = Agent::start(capability.with_device("GPU-1"), events).await;
    agent.observe_gpu("GPU-1", 0, 16_000_000_000);
    assert_eq!(agent.report().await, ReportOutcome::Created);

    assert!(agent.events.send(FaultEvent::critical_xid(43, "GPU-1")));
    tokio::time::sleep(WAIT_TIMEOUT * 5).await;

    assert!(agent.health.is_healthy("GPU-1"));
    assert_eq!(agent.report().await, ReportOutcome::Unchanged);
    assert_eq!(agent.store.committed_writes(), 1);
    agent.stop().await;
}

#[test_log::test(tokio::test)]
async fn metrics_outage_keeps_reported_inventory() {
    let (capability, events) = FakeCapability::new();
    let agent = Agent::start(capability.with_device("GPU-1"), events).await;

    assert_eq!(agent.report().await, ReportOutcome::Skipped);
    assert_eq!(agent.store.calls(), StoreCalls::default());

    agent.observe_gpu("GPU-1", 0, 16_000_000_000);
    assert_eq!(agent.report().await, ReportOutcome::Created);

    agent.metrics.evict_expired(Utc::now() + chrono::Duration::hours(1));
    assert_eq!(agent.report().await, ReportOutcome::Skipped);
    assert_eq!(agent.stored_devices().len(), 1);
    agent.stop().await;
}

#[test_log::test(tokio::test)]
async fn concurrent_writer_conflict_is_retried() {
    let (capability, events) = FakeCapability::new();
    let agent = Agent::start(capability.with_device("GPU-1"), events).await;
    agent.observe_gpu("GPU-1", 0, 16_000_000_000);
    assert_eq!(agent.report().await, ReportOutcome::Created);

    assert!(agent.events.send(FaultEvent::critical_xid(79, "GPU-1")));
    agent.wait_until_unhealthy("GPU-1").await;
    agent.store.fail_next_update(StoreError::Conflict);
    agent.store.fail_next_update(StoreError::TooManyRequests);

    assert_eq!(agent.report().await, ReportOutcome::Updated);
    assert_eq!(agent.store.calls().update, 3);
    assert!(!agent.stored_devices()[0].health);
    agent.stop().await;
}
