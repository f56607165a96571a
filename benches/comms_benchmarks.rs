use clinic_comms::circuit_breaker::{CircuitBreakerConfig, CircuitRegistry};
use clinic_comms::client::Response;
use clinic_comms::config::CommsConfig;
use clinic_comms::events::{sanitize_payload, EventDispatcher};
use clinic_comms::registry::ServiceRegistry;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use http::{HeaderMap, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn registry() -> CircuitRegistry {
    let services = Arc::new(
        ServiceRegistry::with_resolver(ServiceRegistry::builtin(), |_| None)
            .expect("Failed to build registry"),
    );
    CircuitRegistry::in_memory(CircuitBreakerConfig::default(), services)
}

fn benchmark_allow_request(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create runtime");
    let circuits = registry();

    c.bench_function("allow_request_closed", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(circuits.allow_request("user_service").await) })
    });

    rt.block_on(async {
        for _ in 0..5 {
            circuits.record_failure("payment_gateway").await;
        }
    });

    c.bench_function("allow_request_open", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(circuits.allow_request("payment_gateway").await) })
    });
}

fn benchmark_record_outcomes(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create runtime");
    let circuits = registry();

    c.bench_function("record_success_closed", |b| {
        b.to_async(&rt)
            .iter(|| async { circuits.record_success("doctor_service").await })
    });
}

fn benchmark_sanitize_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("sanitize_payload");

    for width in [4usize, 32, 128].iter() {
        let payload: serde_json::Map<String, serde_json::Value> = (0..*width)
            .map(|i| {
                let key = if i % 4 == 0 {
                    "password".to_string()
                } else {
                    format!("field_{}", i)
                };
                (key, json!({"nested": {"token": "t", "value": i}}))
            })
            .collect();
        let payload = serde_json::Value::Object(payload);

        group.bench_with_input(BenchmarkId::from_parameter(width), &payload, |b, payload| {
            b.iter(|| black_box(sanitize_payload(payload)))
        });
    }
    group.finish();
}

fn benchmark_dig(c: &mut Criterion) {
    let response = Response::new(
        "user_service",
        StatusCode::OK,
        HeaderMap::new(),
        json!({"user": {"profile": {"email": "a@b.com"}}}),
        Duration::from_millis(3),
    );

    c.bench_function("response_dig", |b| {
        b.iter(|| black_box(response.dig(&["user", "profile", "email"])))
    });
}

fn benchmark_dispatch_unknown(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create runtime");
    let dispatcher = EventDispatcher::new();
    let body = serde_json::to_vec(&json!({
        "event_type": "review.submitted",
        "payload": {"review_id": 1},
        "service": "doctor_service",
        "timestamp": "2024-03-01T10:00:00.000Z",
        "version": "1.0"
    }))
    .expect("Failed to encode event");

    c.bench_function("dispatch_unknown_event", |b| {
        b.to_async(&rt)
            .iter(|| async { black_box(dispatcher.dispatch(&body, false).await) })
    });
}

fn benchmark_config_parsing(c: &mut Criterion) {
    let yaml = r#"
service:
  name: payment_service
circuit_breaker:
  failure_threshold: 5
events:
  prefetch: 20
"#;

    c.bench_function("config_parsing", |b| {
        b.iter(|| black_box(CommsConfig::from_yaml(yaml)))
    });
}

criterion_group!(
    benches,
    benchmark_allow_request,
    benchmark_record_outcomes,
    benchmark_sanitize_payload,
    benchmark_dig,
    benchmark_dispatch_unknown,
    benchmark_config_parsing
);
criterion_main!(benches);
