use std::sync::Arc;

use anyhow::Result;

use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::DaemonArgs;
use crate::domain::health::HealthMonitor;
use crate::domain::health::HealthState;
use crate::domain::inventory::InventoryBuilder;
use crate::domain::inventory::MetricsCache;
use crate::domain::reconcile::Reconciler;
use crate::domain::reconcile::RetryPolicy;
use crate::infrastructure::k8s::fetch_node_identity;
use crate::infrastructure::k8s::KubeInventoryStore;
use crate::infrastructure::kube_client::init_kube_client;
use crate::infrastructure::nvml::init_nvml;
use crate::infrastructure::nvml::GpuMetricsCollector;
use crate::infrastructure::nvml::NvmlCapability;

pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let nvml = init_nvml().map(Arc::new);

        let health_state = Arc::new(HealthState::new());
        let metrics_cache = Arc::new(MetricsCache::default());

        let metrics_collector = nvml
            .as_ref()
            .ok()
            .map(|nvml| Arc::new(GpuMetricsCollector::new(nvml.clone(), metrics_cache.clone())));

        // With the health check on, the monitor reports a failed load.
        let health_monitor = if self.daemon_args.enable_gpu_health_check {
            Some(HealthMonitor::new(
                Box::new(NvmlCapability::new(nvml)),
                health_state.clone(),
                self.daemon_args.health_check_wait_timeout(),
            ))
        } else {
            if let Err(e) = &nvml {
                tracing::warn!("NVML is not available: {e:?}");
            }
            None
        };

        let client = init_kube_client(self.daemon_args.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;
        let node = fetch_node_identity(client.clone(), &self.daemon_args.node_name)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to resolve node identity: {e:?}"))?;

        let reconciler = Arc::new(Reconciler::new(
            InventoryBuilder::new(metrics_cache, health_state.clone()),
            Arc::new(KubeInventoryStore::new(client)),
            RetryPolicy::from(&self.daemon_args),
        ));

        let services = ApplicationServices {
            node,
            health_state,
            health_monitor,
            metrics_collector,
            reconciler,
        };

        Ok(Application::new(services, self.daemon_args))
    }
}
