//! Internal administrative endpoints
//!
//! Circuit inspection and reset plus on-demand dependency probes, served on
//! a port separate from business traffic.

use crate::circuit_breaker::DependencyStatus;
use crate::client::{HealthStatus, ServiceClient};
use crate::context::context_middleware;
use crate::error::{CommsError, Result};
use crate::metrics::{metrics_handler, MetricsService};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of the admin handlers
#[derive(Clone)]
pub struct AdminState {
    client: ServiceClient,
    metrics: Option<MetricsService>,
}

impl AdminState {
    pub fn new(client: ServiceClient) -> Self {
        Self {
            client,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsService) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Build the admin router
pub fn router(state: AdminState) -> Router {
    let metrics = state.metrics.clone();

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/internal/circuits", get(circuit_status))
        .route("/internal/circuits/reset", post(reset_all))
        .route("/internal/circuits/:dependency/reset", post(reset_one))
        .route(
            "/internal/dependencies/:dependency/health",
            get(dependency_health),
        )
        .with_state(state);

    if let Some(metrics) = metrics {
        app = app.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(metrics),
        );
    }

    app.layer(middleware::from_fn(context_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AdminState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": state.client.identity(),
    }))
}

async fn circuit_status(State(state): State<AdminState>) -> Json<BTreeMap<String, DependencyStatus>> {
    Json(state.client.circuits().status().await)
}

async fn reset_all(State(state): State<AdminState>) -> Result<Json<Value>> {
    state.client.circuits().reset_all().await?;
    info!("All circuits reset through admin API");

    let dependencies: Vec<&str> = state.client.services().names().collect();
    Ok(Json(json!({ "reset": dependencies })))
}

async fn reset_one(
    State(state): State<AdminState>,
    Path(dependency): Path<String>,
) -> Result<Json<Value>> {
    state.client.circuits().reset(&dependency).await?;
    info!(dependency = %dependency, "Circuit reset through admin API");

    Ok(Json(json!({
        "dependency": dependency,
        "state": "closed",
    })))
}

async fn dependency_health(
    State(state): State<AdminState>,
    Path(dependency): Path<String>,
) -> Result<(StatusCode, Json<Value>)> {
    if !state.client.services().contains(&dependency) {
        return Err(CommsError::ServiceNotFound(dependency));
    }

    let status = state.client.health_check(&dependency).await;
    let code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };

    Ok((
        code,
        Json(json!({
            "dependency": dependency,
            "status": status,
        })),
    ))
}
