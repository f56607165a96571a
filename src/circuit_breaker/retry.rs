use super::types::RetryConfig;
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::{debug, warn};

/// Retry executor with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Same backoff policy with a different retry budget
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self {
            config: RetryConfig {
                max_retries,
                ..self.config.clone()
            },
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Run `f` until it succeeds, fails with an error `should_retry` rejects,
    /// or the retry budget is spent. The last error is returned as-is.
    pub async fn execute_with_predicate<F, Fut, T, E, P>(
        &self,
        dependency: &str,
        mut f: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;

            match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!(dependency, attempt, "Request succeeded after retries");
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if !should_retry(&e) {
                        debug!(dependency, attempt, error = %e, "Error not retryable");
                        return Err(e);
                    }

                    if attempt > self.config.max_retries {
                        warn!(
                            dependency,
                            attempt,
                            max_retries = self.config.max_retries,
                            error = %e,
                            "Request failed after max retries"
                        );
                        return Err(e);
                    }

                    match backoff.next_backoff() {
                        Some(wait) => {
                            debug!(
                                dependency,
                                attempt,
                                wait_ms = wait.as_millis() as u64,
                                error = %e,
                                "Request failed, retrying after backoff"
                            );
                            tokio::time::sleep(wait).await;
                        }
                        None => {
                            warn!(dependency, attempt, error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_backoff())
            .with_max_interval(self.config.max_backoff())
            .with_multiplier(self.config.backoff_multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }
}
