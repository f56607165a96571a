use super::redis::RedisCircuitStore;
use super::store::{CircuitStore, MemoryCircuitStore};
use super::types::{CircuitBreakerConfig, CircuitRecord, CircuitState, DependencyStatus};
use crate::config::RedisConfig;
use crate::error::{CommsError, Result};
use crate::metrics;
use crate::registry::ServiceRegistry;
use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Circuit breakers for every dependency of a service.
///
/// State lives in a [`CircuitStore`], so all workers sharing the store agree
/// on each dependency's health. Store failures never block traffic:
/// `allow_request` answers `true` and the `record_*` calls do nothing. Every
/// store operation is bounded by `store_timeout_ms`, and a store that does
/// not answer in time counts as failed.
#[derive(Clone)]
pub struct CircuitRegistry {
    config: CircuitBreakerConfig,
    store: Arc<dyn CircuitStore>,
    services: Arc<ServiceRegistry>,
}

impl CircuitRegistry {
    /// Create a registry over an arbitrary store
    pub fn new(
        config: CircuitBreakerConfig,
        store: Arc<dyn CircuitStore>,
        services: Arc<ServiceRegistry>,
    ) -> Self {
        info!(
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            timeout_secs = config.timeout_secs,
            failure_window_secs = config.failure_window_secs,
            "Creating circuit registry"
        );

        Self {
            config,
            store,
            services,
        }
    }

    /// Create a registry backed by a process-local store
    pub fn in_memory(config: CircuitBreakerConfig, services: Arc<ServiceRegistry>) -> Self {
        Self::new(config, Arc::new(MemoryCircuitStore::new()), services)
    }

    /// Create a registry backed by Redis, failing if Redis does not answer
    pub async fn with_redis(
        config: CircuitBreakerConfig,
        redis: &RedisConfig,
        services: Arc<ServiceRegistry>,
    ) -> Result<Self> {
        info!(url = %redis.url, prefix = %redis.key_prefix, "Connecting circuit store to Redis");

        let deadline = config.store_timeout().max(REDIS_CONNECT_TIMEOUT);
        let store = bounded(
            deadline,
            RedisCircuitStore::new(&redis.url, &redis.key_prefix),
        )
        .await?;
        bounded(deadline, store.ping()).await?;

        info!("Redis connection successful, circuit state is shared");
        Ok(Self::new(config, Arc::new(store), services))
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    async fn guarded<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
        bounded(self.config.store_timeout(), operation).await
    }

    /// Whether a call to `dependency` may be attempted now
    pub async fn allow_request(&self, dependency: &str) -> bool {
        let record = match self.guarded(self.store.load(dependency)).await {
            Ok(record) => record,
            Err(e) => {
                warn!(dependency, error = %e, "Circuit store unavailable, allowing request");
                return true;
            }
        };

        match record.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now_ms = Utc::now().timestamp_millis();
                let timeout_ms = self.config.timeout().as_millis() as i64;

                let elapsed = match record.opened_at {
                    Some(opened_at) => now_ms.saturating_sub(opened_at) >= timeout_ms,
                    None => {
                        warn!(dependency, "Circuit open but no opened_at timestamp");
                        true
                    }
                };

                if !elapsed {
                    debug!(dependency, "Circuit open, rejecting request");
                    metrics::record_circuit_rejection(dependency);
                    return false;
                }

                // Losing the race means another worker already moved the
                // circuit to half-open; the trial is allowed either way.
                self.transition(dependency, CircuitState::Open, CircuitState::HalfOpen)
                    .await;
                true
            }
        }
    }

    /// Record a successful call
    pub async fn record_success(&self, dependency: &str) {
        if let Err(e) = self.try_record_success(dependency).await {
            warn!(dependency, error = %e, "Failed to record success in circuit store");
        }
    }

    async fn try_record_success(&self, dependency: &str) -> Result<()> {
        let record = self.guarded(self.store.load(dependency)).await?;

        match record.state {
            CircuitState::Closed => {
                if record.failure_count > 0 {
                    debug!(
                        dependency,
                        failures = record.failure_count,
                        "Success clears failure count"
                    );
                }
                self.guarded(self.store.clear_failures(dependency)).await?;
            }
            CircuitState::HalfOpen => {
                let successes = self
                    .guarded(
                        self.store
                            .increment_successes(dependency, self.config.state_ttl()),
                    )
                    .await?;

                debug!(
                    dependency,
                    consecutive_successes = successes,
                    threshold = self.config.success_threshold,
                    "Half-open trial request succeeded"
                );

                if successes >= self.config.success_threshold {
                    self.transition(dependency, CircuitState::HalfOpen, CircuitState::Closed)
                        .await;
                }
            }
            CircuitState::Open => {
                debug!(dependency, "Recording success in open state");
            }
        }

        Ok(())
    }

    /// Record a failed call
    pub async fn record_failure(&self, dependency: &str) {
        if let Err(e) = self.try_record_failure(dependency).await {
            warn!(dependency, error = %e, "Failed to record failure in circuit store");
        }
    }

    async fn try_record_failure(&self, dependency: &str) -> Result<()> {
        let record = self.guarded(self.store.load(dependency)).await?;

        match record.state {
            CircuitState::Closed => {
                let failures = self
                    .guarded(
                        self.store
                            .increment_failures(dependency, self.config.failure_window()),
                    )
                    .await?;

                debug!(
                    dependency,
                    consecutive_failures = failures,
                    threshold = self.config.failure_threshold,
                    "Request failed in closed state"
                );

                if failures >= self.config.failure_threshold {
                    self.transition(dependency, CircuitState::Closed, CircuitState::Open)
                        .await;
                }
            }
            CircuitState::HalfOpen => {
                warn!(dependency, "Half-open trial request failed, reopening circuit");
                self.transition(dependency, CircuitState::HalfOpen, CircuitState::Open)
                    .await;
            }
            CircuitState::Open => {
                debug!(dependency, "Recording failure in open state");
            }
        }

        Ok(())
    }

    async fn transition(&self, dependency: &str, from: CircuitState, to: CircuitState) -> bool {
        let now_ms = Utc::now().timestamp_millis();

        match self
            .guarded(self.store.transition(
                dependency,
                from,
                to,
                now_ms,
                self.config.state_ttl(),
            ))
            .await
        {
            Ok(true) => {
                info!(dependency, from = %from, to = %to, "Circuit transition");
                metrics::record_circuit_transition(dependency, from.as_str(), to.as_str());
                metrics::record_circuit_state(dependency, to.as_gauge());
                true
            }
            Ok(false) => {
                debug!(dependency, from = %from, to = %to, "Circuit already moved by another worker");
                false
            }
            Err(e) => {
                warn!(dependency, from = %from, to = %to, error = %e, "Circuit transition failed");
                false
            }
        }
    }

    /// Current state of a dependency's circuit
    pub async fn circuit_state(&self, dependency: &str) -> CircuitState {
        self.record(dependency).await.state
    }

    /// Full circuit record, closed and empty if the store is unavailable
    pub async fn record(&self, dependency: &str) -> CircuitRecord {
        match self.guarded(self.store.load(dependency)).await {
            Ok(record) => record,
            Err(e) => {
                warn!(dependency, error = %e, "Circuit store unavailable, reporting closed");
                CircuitRecord::default()
            }
        }
    }

    /// Manually close a dependency's circuit
    pub async fn reset(&self, dependency: &str) -> Result<()> {
        if !self.services.contains(dependency) {
            return Err(CommsError::ServiceNotFound(dependency.to_string()));
        }

        self.guarded(self.store.reset(dependency)).await?;
        metrics::record_circuit_state(dependency, CircuitState::Closed.as_gauge());
        info!(dependency, "Circuit manually reset");
        Ok(())
    }

    /// Manually close every known dependency's circuit
    pub async fn reset_all(&self) -> Result<()> {
        for dependency in self.services.names() {
            self.guarded(self.store.reset(dependency)).await?;
            metrics::record_circuit_state(dependency, CircuitState::Closed.as_gauge());
        }
        info!("All circuits manually reset");
        Ok(())
    }

    /// Status of every known dependency
    pub async fn status(&self) -> BTreeMap<String, DependencyStatus> {
        let mut statuses = BTreeMap::new();

        for dependency in self.services.dependencies() {
            let record = self.record(&dependency.name).await;
            statuses.insert(
                dependency.name.clone(),
                DependencyStatus {
                    state: record.state,
                    failures: record.failure_count,
                    successes: record.success_count,
                    healthy: record.state != CircuitState::Open,
                    url: dependency.base_url.clone(),
                },
            );
        }

        statuses
    }
}

/// Run a store operation under a deadline, mapping expiry to an error
async fn bounded<T>(deadline: Duration, operation: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(CommsError::StoreTimeout(deadline)),
    }
}
