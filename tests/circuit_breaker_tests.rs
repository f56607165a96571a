use async_trait::async_trait;
use clinic_comms::circuit_breaker::{
    CircuitBreakerConfig, CircuitRecord, CircuitRegistry, CircuitState, CircuitStore,
    MemoryCircuitStore,
};
use clinic_comms::error::{CommsError, Result};
use clinic_comms::registry::ServiceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn services() -> Arc<ServiceRegistry> {
    Arc::new(ServiceRegistry::with_resolver(ServiceRegistry::builtin(), |_| None).unwrap())
}

fn fast_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        timeout_secs: 1,
        failure_window_secs: 60,
        record_ttl_secs: 3600,
        store_timeout_ms: 250,
    }
}

/// Store whose backend is always down
struct UnreachableStore;

#[async_trait]
impl CircuitStore for UnreachableStore {
    async fn load(&self, _dependency: &str) -> Result<CircuitRecord> {
        Err(CommsError::Internal("connection refused".to_string()))
    }

    async fn increment_failures(&self, _dependency: &str, _window: Duration) -> Result<u32> {
        Err(CommsError::Internal("connection refused".to_string()))
    }

    async fn increment_successes(&self, _dependency: &str, _ttl: Duration) -> Result<u32> {
        Err(CommsError::Internal("connection refused".to_string()))
    }

    async fn clear_failures(&self, _dependency: &str) -> Result<()> {
        Err(CommsError::Internal("connection refused".to_string()))
    }

    async fn transition(
        &self,
        _dependency: &str,
        _from: CircuitState,
        _to: CircuitState,
        _now_ms: i64,
        _ttl: Duration,
    ) -> Result<bool> {
        Err(CommsError::Internal("connection refused".to_string()))
    }

    async fn reset(&self, _dependency: &str) -> Result<()> {
        Err(CommsError::Internal("connection refused".to_string()))
    }

    async fn ping(&self) -> Result<()> {
        Err(CommsError::Internal("connection refused".to_string()))
    }
}

/// Store whose backend accepts connections but never answers
struct StalledStore;

#[async_trait]
impl CircuitStore for StalledStore {
    async fn load(&self, _dependency: &str) -> Result<CircuitRecord> {
        std::future::pending().await
    }

    async fn increment_failures(&self, _dependency: &str, _window: Duration) -> Result<u32> {
        std::future::pending().await
    }

    async fn increment_successes(&self, _dependency: &str, _ttl: Duration) -> Result<u32> {
        std::future::pending().await
    }

    async fn clear_failures(&self, _dependency: &str) -> Result<()> {
        std::future::pending().await
    }

    async fn transition(
        &self,
        _dependency: &str,
        _from: CircuitState,
        _to: CircuitState,
        _now_ms: i64,
        _ttl: Duration,
    ) -> Result<bool> {
        std::future::pending().await
    }

    async fn reset(&self, _dependency: &str) -> Result<()> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<()> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_full_circuit_lifecycle() {
    let circuits = CircuitRegistry::in_memory(fast_config(), services());
    let dependency = "payment_service";

    assert_eq!(circuits.circuit_state(dependency).await, CircuitState::Closed);
    assert!(circuits.allow_request(dependency).await);

    for _ in 0..3 {
        assert!(circuits.allow_request(dependency).await);
        circuits.record_failure(dependency).await;
    }

    assert_eq!(circuits.circuit_state(dependency).await, CircuitState::Open);
    for _ in 0..5 {
        assert!(!circuits.allow_request(dependency).await);
    }

    sleep(Duration::from_millis(1100)).await;

    assert!(circuits.allow_request(dependency).await);
    assert_eq!(circuits.circuit_state(dependency).await, CircuitState::HalfOpen);

    circuits.record_success(dependency).await;
    assert_eq!(circuits.circuit_state(dependency).await, CircuitState::HalfOpen);
    circuits.record_success(dependency).await;

    let record = circuits.record(dependency).await;
    assert_eq!(record, CircuitRecord::default());
    assert!(circuits.allow_request(dependency).await);
}

#[tokio::test]
async fn test_half_open_failure_reopens_circuit() {
    let circuits = CircuitRegistry::in_memory(fast_config(), services());
    let dependency = "doctor_service";

    for _ in 0..3 {
        circuits.record_failure(dependency).await;
    }
    sleep(Duration::from_millis(1100)).await;
    assert!(circuits.allow_request(dependency).await);

    circuits.record_success(dependency).await;
    circuits.record_failure(dependency).await;

    assert_eq!(circuits.circuit_state(dependency).await, CircuitState::Open);
    assert!(!circuits.allow_request(dependency).await);
}

#[tokio::test]
async fn test_dependencies_are_independent() {
    let circuits = CircuitRegistry::in_memory(fast_config(), services());

    circuits.record_success("user_service").await;
    for _ in 0..3 {
        circuits.record_failure("payment_gateway").await;
    }

    assert_eq!(circuits.circuit_state("user_service").await, CircuitState::Closed);
    assert_eq!(circuits.circuit_state("payment_gateway").await, CircuitState::Open);

    let status = circuits.status().await;
    assert!(status["user_service"].healthy);
    assert!(!status["payment_gateway"].healthy);
    assert_eq!(status["payment_gateway"].state, CircuitState::Open);
}

#[tokio::test]
async fn test_workers_share_one_store() {
    let store: Arc<dyn CircuitStore> = Arc::new(MemoryCircuitStore::new());
    let worker_a = CircuitRegistry::new(fast_config(), store.clone(), services());
    let worker_b = CircuitRegistry::new(fast_config(), store, services());

    worker_a.record_failure("appointment_service").await;
    worker_b.record_failure("appointment_service").await;
    worker_a.record_failure("appointment_service").await;

    assert!(!worker_b.allow_request("appointment_service").await);
}

#[tokio::test]
async fn test_concurrent_failures_open_once() {
    let circuits = CircuitRegistry::in_memory(fast_config(), services());

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let circuits = circuits.clone();
            tokio::spawn(async move { circuits.record_failure("user_service").await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let record = circuits.record("user_service").await;
    assert_eq!(record.state, CircuitState::Open);
    assert!(record.opened_at.is_some());
}

#[tokio::test]
async fn test_unreachable_store_fails_open() {
    let circuits = CircuitRegistry::new(fast_config(), Arc::new(UnreachableStore), services());

    for _ in 0..10 {
        circuits.record_failure("payment_service").await;
    }
    circuits.record_success("payment_service").await;

    assert!(circuits.allow_request("payment_service").await);
    assert_eq!(circuits.circuit_state("payment_service").await, CircuitState::Closed);
    assert!(circuits.reset("payment_service").await.is_err());
}

#[tokio::test]
async fn test_stalled_store_fails_open_within_deadline() {
    let config = CircuitBreakerConfig {
        store_timeout_ms: 50,
        ..fast_config()
    };
    let circuits = CircuitRegistry::new(config, Arc::new(StalledStore), services());

    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        circuits.record_failure("user_service").await;
        circuits.record_success("user_service").await;
        (
            circuits.allow_request("user_service").await,
            circuits.circuit_state("user_service").await,
        )
    })
    .await
    .expect("circuit registry blocked on a stalled store");

    assert_eq!(outcome, (true, CircuitState::Closed));
    assert!(matches!(
        circuits.reset("user_service").await,
        Err(CommsError::StoreTimeout(_))
    ));
}

#[tokio::test]
async fn test_open_circuit_outlives_short_record_ttl() {
    let config = CircuitBreakerConfig {
        failure_threshold: 1,
        timeout_secs: 60,
        record_ttl_secs: 1,
        ..fast_config()
    };
    let circuits = CircuitRegistry::in_memory(config, services());

    circuits.record_failure("payment_gateway").await;
    assert_eq!(circuits.circuit_state("payment_gateway").await, CircuitState::Open);

    sleep(Duration::from_millis(1200)).await;

    assert_eq!(circuits.circuit_state("payment_gateway").await, CircuitState::Open);
    assert!(!circuits.allow_request("payment_gateway").await);
}

#[tokio::test]
async fn test_manual_reset() {
    let circuits = CircuitRegistry::in_memory(fast_config(), services());

    for dependency in ["user_service", "doctor_service"] {
        for _ in 0..3 {
            circuits.record_failure(dependency).await;
        }
    }

    circuits.reset("user_service").await.unwrap();
    assert_eq!(circuits.circuit_state("user_service").await, CircuitState::Closed);
    assert_eq!(circuits.circuit_state("doctor_service").await, CircuitState::Open);

    circuits.reset_all().await.unwrap();
    assert_eq!(circuits.circuit_state("doctor_service").await, CircuitState::Closed);

    assert!(matches!(
        circuits.reset("billing_service").await,
        Err(CommsError::ServiceNotFound(_))
    ));
}

#[tokio::test]
#[ignore] // Requires Redis running
async fn test_redis_backed_registry() {
    let redis = clinic_comms::config::RedisConfig {
        url: "redis://127.0.0.1:6379".to_string(),
        key_prefix: format!("circuit-test-{}:", uuid::Uuid::new_v4()),
    };
    let circuits = CircuitRegistry::with_redis(fast_config(), &redis, services())
        .await
        .unwrap();

    for _ in 0..3 {
        circuits.record_failure("user_service").await;
    }
    assert_eq!(circuits.circuit_state("user_service").await, CircuitState::Open);

    circuits.reset_all().await.unwrap();
    assert_eq!(circuits.circuit_state("user_service").await, CircuitState::Closed);
}
