pub mod admin;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod metrics;
pub mod registry;
pub mod settlement;

use crate::admin::AdminState;
use crate::circuit_breaker::CircuitRegistry;
use crate::client::ServiceClient;
use crate::config::CommsConfig;
use crate::error::{CommsError, Result};
use crate::metrics::MetricsService;
use crate::registry::ServiceRegistry;
use std::sync::Arc;
use tracing::{info, warn};

/// Connect the circuit registry to Redis, falling back to process-local
/// state when Redis is unreachable
pub async fn connect_circuits(
    config: &CommsConfig,
    services: Arc<ServiceRegistry>,
) -> CircuitRegistry {
    match CircuitRegistry::with_redis(
        config.circuit_breaker.clone(),
        &config.redis,
        services.clone(),
    )
    .await
    {
        Ok(circuits) => circuits,
        Err(e) => {
            warn!(
                error = %e,
                "Redis unavailable, circuit state is local to this process"
            );
            CircuitRegistry::in_memory(config.circuit_breaker.clone(), services)
        }
    }
}

/// Run the admin server for a service
pub async fn init_comms(config: CommsConfig) -> Result<()> {
    config.validate()?;

    info!(
        service = %config.service.name,
        version = %config.service.version,
        "Starting communication layer"
    );

    let metrics = match MetricsService::new() {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let services = Arc::new(ServiceRegistry::from_config(&config.dependencies)?);
    for dependency in services.dependencies() {
        info!(dependency = %dependency.name, url = %dependency.base_url, "Dependency registered");
    }

    let circuits = connect_circuits(&config, services.clone()).await;
    let client = ServiceClient::from_config(&config, services, circuits)?;

    let mut state = AdminState::new(client);
    if let Some(metrics) = metrics {
        state = state.with_metrics(metrics);
    }
    let app = admin::router(state);

    let addr = format!("{}:{}", config.admin.host, config.admin.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "Admin server ready to accept connections");

    axum::serve(listener, app)
        .await
        .map_err(|e| CommsError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Environment variable selecting the log format (`json` or `compact`)
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Initialize tracing/logging
pub fn init_tracing() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clinic_comms=debug,tower_http=debug".into()),
        )
        .with_target(false);

    if json_logs(std::env::var(LOG_FORMAT_ENV).ok().as_deref()) {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn json_logs(format: Option<&str>) -> bool {
    format.is_some_and(|format| format.trim().eq_ignore_ascii_case("json"))
}
