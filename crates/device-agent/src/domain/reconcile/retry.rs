use std::future::Future;
use std::time::Duration;

use error_stack::Report;
use rand::Rng;
use tracing::debug;

/// Exponential backoff for optimistic-concurrency retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub steps: u32,
    pub initial_delay: Duration,
    pub factor: f64,
    /// Extra random fraction of each delay, in `[0, jitter)`
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: 5,
            initial_delay: Duration::from_millis(10),
            factor: 2.0,
            jitter: 0.1,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = (self.initial_delay.as_secs_f64() * self.factor.powi(exponent))
            .min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter > 0.0 {
            base * (1.0 + rand::rng().random_range(0.0..self.jitter))
        } else {
            base
        };
        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with an error `retriable` rejects,
    /// or the attempts are exhausted. The last error is returned.
    pub async fn retry<T, E, F, Fut>(
        &self,
        mut op: F,
        retriable: impl Fn(&Report<E>) -> bool,
    ) -> Result<T, Report<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Report<E>>>,
    {
        let steps = self.steps.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < steps && retriable(&e) => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, ?delay, "retrying after retriable error: {e}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
