use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use shared_config::RetryConfig;
use shared_models::ClassifiedError;

/// Upper bound for a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Re-runs idempotent operations while they fail with a retryable error.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        Self::run_with(&self.config, operation).await
    }

    /// `max_attempts` counts the first call. The delay starts at
    /// `initial_delay` and is multiplied by `backoff_multiplier` after every
    /// failed attempt. The last error is returned unchanged.
    pub async fn run_with<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>>,
    {
        let max_attempts = config.max_attempts.max(1);
        let mut delay = config.initial_delay.min(MAX_RETRY_DELAY);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    warn!(
                        attempt,
                        max_attempts,
                        kind = %error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying: {}", error.message()
                    );
                    sleep(delay).await;
                    delay = next_delay(delay, config.backoff_multiplier);
                    attempt += 1;
                }
                Err(error) => {
                    if error.is_retryable() {
                        warn!(attempt, kind = %error.kind(), "Retry attempts exhausted");
                    }
                    return Err(error);
                }
            }
        }
    }
}

/// Multipliers below 1 (or NaN) hold the delay steady; anything that would
/// overflow lands on the cap.
fn next_delay(delay: Duration, multiplier: f64) -> Duration {
    let scaled = delay.as_secs_f64() * multiplier.max(1.0);
    Duration::try_from_secs_f64(scaled)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}
