//! Circuit-breaking RPC client for sibling services
//!
//! Every call resolves the dependency through the [`ServiceRegistry`], asks
//! the [`CircuitRegistry`] for permission, propagates the ambient
//! [`RequestContext`] as headers, retries transient failures with backoff,
//! and reports exactly one outcome back to the circuit registry.

pub mod request;
pub mod response;

pub use request::RpcRequest;
pub use response::Response;

use crate::circuit_breaker::{CircuitRegistry, RetryConfig, RetryExecutor};
use crate::config::{CommsConfig, HttpConfig};
use crate::context::{
    RequestContext, CORRELATION_ID_HEADER, INTERNAL_SERVICE_HEADER, REQUEST_ID_HEADER,
    USER_ID_HEADER,
};
use crate::error::{CommsError, Result};
use crate::metrics;
use crate::registry::ServiceRegistry;
use http::header::{HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Statuses that are retried and, once retries run out, count as failures
pub const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

/// Result of a dependency health probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    CircuitOpen,
    Error,
}

/// Failure of a single attempt
#[derive(Debug)]
enum AttemptError {
    /// Dependency answered with a retryable status
    Status(Response),
    Timeout(String),
    Unavailable(String),
    /// Request could not be built or sent for a local reason
    Local(String),
}

impl AttemptError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AttemptError::Timeout(e.to_string())
        } else if e.is_builder() {
            AttemptError::Local(e.to_string())
        } else {
            AttemptError::Unavailable(e.to_string())
        }
    }

    fn is_retryable(&self) -> bool {
        !matches!(self, AttemptError::Local(_))
    }

    fn affects_health(&self) -> bool {
        self.is_retryable()
    }

    fn status_code(&self) -> u16 {
        match self {
            AttemptError::Status(response) => response.status().as_u16(),
            _ => 0,
        }
    }

    fn into_error(self, dependency: &str) -> CommsError {
        let dependency = dependency.to_string();
        match self {
            AttemptError::Status(response) if response.status() == StatusCode::REQUEST_TIMEOUT => {
                CommsError::RequestTimeout {
                    dependency,
                    message: "HTTP 408".to_string(),
                }
            }
            AttemptError::Status(response) => CommsError::ServiceUnavailable {
                dependency,
                message: format!("HTTP {}", response.status().as_u16()),
            },
            AttemptError::Timeout(message) => CommsError::RequestTimeout {
                dependency,
                message,
            },
            AttemptError::Unavailable(message) => CommsError::ServiceUnavailable {
                dependency,
                message,
            },
            AttemptError::Local(message) => CommsError::Http(message),
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Status(response) => write!(f, "HTTP {}", response.status()),
            AttemptError::Timeout(message) => write!(f, "timeout: {}", message),
            AttemptError::Unavailable(message) => write!(f, "unavailable: {}", message),
            AttemptError::Local(message) => write!(f, "request error: {}", message),
        }
    }
}

/// RPC client shared by all request handlers of a service
#[derive(Clone)]
pub struct ServiceClient {
    http: reqwest::Client,
    identity: String,
    services: Arc<ServiceRegistry>,
    circuits: CircuitRegistry,
    retry: RetryExecutor,
    default_timeout: Duration,
}

impl ServiceClient {
    /// Create a new client identifying itself as `identity`
    pub fn new(
        identity: impl Into<String>,
        http: &HttpConfig,
        retry: RetryConfig,
        services: Arc<ServiceRegistry>,
        circuits: CircuitRegistry,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(http.connect_timeout())
            .build()
            .map_err(|e| CommsError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http: client,
            identity: identity.into(),
            services,
            circuits,
            retry: RetryExecutor::new(retry),
            default_timeout: http.timeout(),
        })
    }

    pub fn from_config(
        config: &CommsConfig,
        services: Arc<ServiceRegistry>,
        circuits: CircuitRegistry,
    ) -> Result<Self> {
        Self::new(
            config.service.name.clone(),
            &config.http,
            config.retry.clone(),
            services,
            circuits,
        )
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    pub async fn get(&self, dependency: &str, path: &str) -> Result<Response> {
        self.call(RpcRequest::get(dependency, path)).await
    }

    pub async fn post(&self, dependency: &str, path: &str, body: Value) -> Result<Response> {
        self.call(RpcRequest::post(dependency, path).json(body)).await
    }

    pub async fn put(&self, dependency: &str, path: &str, body: Value) -> Result<Response> {
        self.call(RpcRequest::put(dependency, path).json(body)).await
    }

    pub async fn patch(&self, dependency: &str, path: &str, body: Value) -> Result<Response> {
        self.call(RpcRequest::patch(dependency, path).json(body)).await
    }

    pub async fn delete(&self, dependency: &str, path: &str) -> Result<Response> {
        self.call(RpcRequest::delete(dependency, path)).await
    }

    /// Perform a call.
    ///
    /// Errors: `ServiceNotFound` for unknown names, `CircuitOpen` without any
    /// network attempt, `RequestTimeout`/`ServiceUnavailable` once retries
    /// are exhausted. Any other HTTP status comes back as a `Response`.
    pub async fn call(&self, request: RpcRequest) -> Result<Response> {
        let dependency = self.services.get(&request.dependency)?;
        let path = if request.internal {
            dependency.internal_path(&request.path)
        } else {
            request.path.clone()
        };
        let url = dependency.url_for(&path);
        let name = request.dependency.as_str();

        if !self.circuits.allow_request(name).await {
            warn!(
                dependency = name,
                method = %request.method,
                path = %path,
                "Circuit open, call not attempted"
            );
            return Err(CommsError::CircuitOpen(name.to_string()));
        }

        let context = RequestContext::current();
        let headers = self.build_headers(&request, &context)?;
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let retry = match request.retries {
            Some(retries) => self.retry.with_max_retries(retries),
            None => self.retry.clone(),
        };

        info!(
            dependency = name,
            method = %request.method,
            path = %path,
            "Calling dependency"
        );

        let started = Instant::now();
        let outcome = retry
            .execute_with_predicate(
                name,
                || self.attempt(&request, &url, &headers, timeout),
                AttemptError::is_retryable,
            )
            .await;
        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(response) => {
                let status = response.status();
                if status.is_server_error() {
                    self.circuits.record_failure(name).await;
                } else {
                    self.circuits.record_success(name).await;
                }

                metrics::record_dependency_request(
                    name,
                    request.method.as_str(),
                    status.as_u16(),
                    elapsed.as_secs_f64(),
                );

                if status.is_client_error() || status.is_server_error() {
                    warn!(
                        dependency = name,
                        method = %request.method,
                        path = %path,
                        status = status.as_u16(),
                        duration_ms,
                        "Dependency responded with error status"
                    );
                } else {
                    info!(
                        dependency = name,
                        method = %request.method,
                        path = %path,
                        status = status.as_u16(),
                        duration_ms,
                        "Dependency call completed"
                    );
                }

                Ok(response)
            }
            Err(err) => {
                if err.affects_health() {
                    self.circuits.record_failure(name).await;
                }

                metrics::record_dependency_request(
                    name,
                    request.method.as_str(),
                    err.status_code(),
                    elapsed.as_secs_f64(),
                );

                let error = err.into_error(name);
                warn!(
                    dependency = name,
                    method = %request.method,
                    path = %path,
                    duration_ms,
                    error = %error,
                    "Dependency call failed"
                );

                Err(error)
            }
        }
    }

    /// Probe a dependency's health endpoint once, never failing.
    ///
    /// The probe is an ordinary call, so its outcome is recorded in the
    /// dependency's circuit. Repeated failing probes open the circuit.
    pub async fn health_check(&self, dependency: &str) -> HealthStatus {
        let health_path = match self.services.get(dependency) {
            Ok(definition) => definition.health_path.clone(),
            Err(e) => {
                warn!(dependency, error = %e, "Health check for unknown dependency");
                return HealthStatus::Error;
            }
        };

        let request = RpcRequest::get(dependency, health_path)
            .timeout(HEALTH_CHECK_TIMEOUT)
            .retries(0);

        match self.call(request).await {
            Ok(response) if response.is_success() => HealthStatus::Healthy,
            Ok(_) => HealthStatus::Unhealthy,
            Err(CommsError::CircuitOpen(_)) => HealthStatus::CircuitOpen,
            Err(e) if e.is_retryable() => HealthStatus::Unhealthy,
            Err(e) => {
                warn!(dependency, error = %e, "Health check errored");
                HealthStatus::Error
            }
        }
    }

    async fn attempt(
        &self,
        request: &RpcRequest,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> std::result::Result<Response, AttemptError> {
        let started = Instant::now();

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers.clone())
            .timeout(timeout);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let reply = builder.send().await.map_err(AttemptError::from_reqwest)?;
        let status = reply.status();
        let reply_headers = reply.headers().clone();
        let bytes = reply.bytes().await.map_err(AttemptError::from_reqwest)?;

        let response = Response::from_bytes(
            request.dependency.as_str(),
            status,
            reply_headers,
            &bytes,
            started.elapsed(),
        );

        if is_retryable_status(status) {
            Err(AttemptError::Status(response))
        } else {
            Ok(response)
        }
    }

    fn build_headers(&self, request: &RpcRequest, context: &RequestContext) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(INTERNAL_SERVICE_HEADER, header_value(&self.identity)?);

        let request_id = context
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        headers.insert(REQUEST_ID_HEADER, header_value(&request_id)?);

        if let Some(token) = context.bearer_token() {
            let mut value = header_value(&format!("Bearer {}", token))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        if let Some(correlation_id) = &context.correlation_id {
            headers.insert(CORRELATION_ID_HEADER, header_value(correlation_id)?);
        }
        if let Some(user_id) = &context.user_id {
            headers.insert(USER_ID_HEADER, header_value(user_id)?);
        }

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CommsError::Http(format!("Invalid header name {}: {}", name, e)))?;
            headers.insert(name, header_value(value)?);
        }

        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| CommsError::Http(format!("Invalid header value: {}", e)))
}

/// `Method` parse helper for callers holding method names as strings
pub fn parse_method(method: &str) -> Result<Method> {
    Method::from_bytes(method.to_uppercase().as_bytes())
        .map_err(|_| CommsError::Http(format!("Invalid HTTP method: {}", method)))
}
