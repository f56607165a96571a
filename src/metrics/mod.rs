use crate::error::{CommsError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            CommsError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "comms_dependency_requests_total",
            "Total number of calls made to dependencies"
        );
        describe_histogram!(
            "comms_dependency_request_duration_seconds",
            "Dependency call latencies in seconds, retries included"
        );
        describe_counter!(
            "comms_circuit_rejections_total",
            "Calls rejected without a network attempt because the circuit was open"
        );
        describe_counter!(
            "comms_circuit_transitions_total",
            "Total number of circuit breaker state transitions"
        );
        describe_gauge!(
            "comms_circuit_state",
            "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "comms_events_published_total",
            "Events handed to the broker, by outcome"
        );
        describe_counter!(
            "comms_events_consumed_total",
            "Events received from the broker, by disposition"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record a completed dependency call; status 0 means no HTTP response
pub fn record_dependency_request(dependency: &str, method: &str, status: u16, duration: f64) {
    let labels = [
        ("dependency", dependency.to_string()),
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];

    counter!("comms_dependency_requests_total", &labels).increment(1);
    histogram!("comms_dependency_request_duration_seconds", &labels).record(duration);
}

/// Record a call rejected by an open circuit
pub fn record_circuit_rejection(dependency: &str) {
    let labels = [("dependency", dependency.to_string())];
    counter!("comms_circuit_rejections_total", &labels).increment(1);
}

/// Record circuit breaker state
/// State: 0 = Closed, 1 = Open, 2 = HalfOpen
pub fn record_circuit_state(dependency: &str, state: u8) {
    let labels = [("dependency", dependency.to_string())];
    gauge!("comms_circuit_state", &labels).set(state as f64);
}

/// Record circuit breaker transition
pub fn record_circuit_transition(dependency: &str, from_state: &str, to_state: &str) {
    let labels = [
        ("dependency", dependency.to_string()),
        ("from", from_state.to_string()),
        ("to", to_state.to_string()),
    ];
    counter!("comms_circuit_transitions_total", &labels).increment(1);
}

/// Record a publish attempt
pub fn record_event_published(event_type: &str, outcome: &str) {
    let labels = [
        ("event_type", event_type.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("comms_events_published_total", &labels).increment(1);
}

/// Record how a delivery was settled
pub fn record_event_consumed(event_type: &str, outcome: &str) {
    let labels = [
        ("event_type", event_type.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("comms_events_consumed_total", &labels).increment(1);
}
