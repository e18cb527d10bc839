use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::domain::reconcile::RetryPolicy;

#[derive(Parser, Debug, Clone)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "NODE_NAME",
        help = "Name of the node this agent reports devices for"
    )]
    pub node_name: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        default_value = "60",
        help = "Seconds between device inventory reports"
    )]
    pub report_interval_secs: u64,

    #[arg(
        long,
        default_value = "10",
        help = "Seconds between GPU metrics samples"
    )]
    pub metrics_collect_interval_secs: u64,

    #[arg(
        long,
        default_value = "5000",
        help = "Milliseconds the health monitor blocks waiting for a fault event; bounds shutdown latency"
    )]
    pub health_check_wait_timeout_ms: u64,

    #[arg(
        long,
        help = "Watch GPUs for critical XID errors and report faulty devices as unhealthy",
        default_value_t = true,
        env = "ENABLE_GPU_HEALTH_CHECK",
        action = clap::ArgAction::Set
    )]
    pub enable_gpu_health_check: bool,

    #[arg(
        long,
        default_value = "5",
        help = "Attempts for a conflicting device object update"
    )]
    pub retry_steps: u32,

    #[arg(
        long,
        default_value = "10",
        help = "Initial backoff in milliseconds between conflicting updates"
    )]
    pub retry_initial_delay_ms: u64,
}

impl DaemonArgs {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }

    pub fn metrics_collect_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_collect_interval_secs.max(1))
    }

    pub fn health_check_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_wait_timeout_ms.max(1))
    }
}

impl From<&DaemonArgs> for RetryPolicy {
    fn from(args: &DaemonArgs) -> Self {
        Self {
            steps: args.retry_steps.max(1),
            initial_delay: Duration::from_millis(args.retry_initial_delay_ms),
            ..Default::default()
        }
    }
}
