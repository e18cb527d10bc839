use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::domain::health::HealthMonitor;
use crate::domain::reconcile::NodeIdentity;
use crate::domain::reconcile::Reconciler;
use crate::infrastructure::nvml::GpuMetricsCollector;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn spawn_all_tasks(&mut self, app: &mut Application) {
        if let Some(monitor) = app.services_mut().health_monitor.take() {
            let task = self.spawn_health_monitor_task(monitor);
            self.tasks.push(task);
        } else {
            tracing::info!("GPU health check is disabled");
        }

        if let Some(collector) = app.services().metrics_collector.clone() {
            let interval = app.daemon_args().metrics_collect_interval();
            let task = self.spawn_metrics_collector_task(collector, interval);
            self.tasks.push(task);
        } else {
            tracing::warn!("GPU metrics collection is unavailable, no devices will be reported");
        }

        let report_task = self.spawn_report_task(
            app.services().reconciler.clone(),
            app.services().node.clone(),
            app.daemon_args().report_interval(),
        );
        self.tasks.push(report_task);
    }

    /// Waits for a shutdown signal or for a task to end unexpectedly
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::signal;
                use tokio::signal::unix::SignalKind;
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
                        Err(e) => {
                            tracing::error!("Failed to install Ctrl+C handler: {e}");
                            std::future::pending::<()>().await;
                        }
                    }
                })
            }
        };

        tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.cancellation_token.cancel();
                self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_health_monitor_task(&self, monitor: HealthMonitor) -> JoinHandle<()> {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting GPU health monitor task");
            let final_state = monitor.run(token.clone()).await;
            tracing::info!(?final_state, "GPU health monitor finished");
            // Monitoring may end early (no library, no devices); reporting goes on.
            token.cancelled().await;
        })
    }

    fn spawn_metrics_collector_task(
        &self,
        collector: Arc<GpuMetricsCollector>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting GPU metrics collector task");
            collector.run(interval, token).await;
            tracing::info!("GPU metrics collector task completed");
        })
    }

    fn spawn_report_task(
        &self,
        reconciler: Arc<Reconciler>,
        node: NodeIdentity,
        interval: Duration,
    ) -> JoinHandle<()> {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!(node = %node.name, ?interval, "Starting device report task");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Device report task shutdown requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        match reconciler.report_devices(&node).await {
                            Ok(outcome) => {
                                tracing::debug!(%outcome, "device report cycle finished")
                            }
                            Err(e) => tracing::error!("Failed to report devices: {e:?}"),
                        }
                    }
                }
            }
        })
    }
}
