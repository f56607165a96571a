//! Ambient call context
//!
//! Values that belong to the request currently being served (request id,
//! correlation id, acting user, bearer token) are carried in a task-local so
//! that outbound RPC calls and published events pick them up without every
//! function threading them through its signature.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const INTERNAL_SERVICE_HEADER: &str = "x-internal-service";

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Context of the request being served
#[derive(Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
    pub auth_token: Option<SecretString>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("correlation_id", &self.correlation_id)
            .field("user_id", &self.user_id)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(SecretString::new(token.into()));
        self
    }

    /// Context of the current task, empty outside of a scope
    pub fn current() -> Self {
        CURRENT.try_with(Clone::clone).unwrap_or_default()
    }

    /// Run `f` with this context as the current one
    pub async fn scope<F: Future>(self, f: F) -> F::Output {
        CURRENT.scope(self, f).await
    }

    /// Request id of the current task, if any
    pub fn current_request_id() -> Option<String> {
        CURRENT
            .try_with(|ctx| ctx.request_id.clone())
            .ok()
            .flatten()
    }

    /// Bearer token in clear text, for the Authorization header only
    pub fn bearer_token(&self) -> Option<&str> {
        self.auth_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    /// Extract context from incoming request headers
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let auth_token = header(axum::http::header::AUTHORIZATION.as_str())
            .and_then(|value| {
                value
                    .strip_prefix("Bearer ")
                    .map(|token| token.trim().to_string())
            })
            .filter(|token| !token.is_empty())
            .map(SecretString::new);

        Self {
            request_id: header(REQUEST_ID_HEADER),
            correlation_id: header(CORRELATION_ID_HEADER),
            user_id: header(USER_ID_HEADER),
            auth_token,
        }
    }
}

/// Middleware that makes the incoming request's context ambient for its handler
pub async fn context_middleware(req: Request, next: Next) -> Response {
    let mut context = RequestContext::from_headers(req.headers());
    let request_id = context
        .request_id
        .get_or_insert_with(|| Uuid::new_v4().to_string())
        .clone();

    let mut response = context.scope(next.run(req)).await;

    if let Ok(value) = request_id.parse() {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}
