use crate::error::{CommsError, Result};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

/// Normalized response from a dependency
#[derive(Debug, Clone)]
pub struct Response {
    dependency: String,
    status: StatusCode,
    body: Value,
    headers: HeaderMap,
    duration: Duration,
}

impl Response {
    pub fn new(
        dependency: impl Into<String>,
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
        duration: Duration,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            status,
            body,
            headers,
            duration,
        }
    }

    /// Build from raw bytes: JSON when parseable, otherwise the text as a
    /// JSON string; an empty body is `null`
    pub fn from_bytes(
        dependency: impl Into<String>,
        status: StatusCode,
        headers: HeaderMap,
        bytes: &[u8],
        duration: Duration,
    ) -> Self {
        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
        };

        Self::new(dependency, status, headers, body, duration)
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn is_forbidden(&self) -> bool {
        self.status == StatusCode::FORBIDDEN
    }

    pub fn is_unprocessable(&self) -> bool {
        self.status == StatusCode::UNPROCESSABLE_ENTITY
    }

    /// Walk nested object keys; `None` as soon as a level is not an object
    /// or lacks the key
    pub fn dig(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.body, |value, key| value.as_object()?.get(*key))
    }

    /// `dig` for string leaves
    pub fn dig_str(&self, path: &[&str]) -> Option<&str> {
        self.dig(path).and_then(Value::as_str)
    }

    /// Deserialize the body into a typed value
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }

    /// Turn 4xx/5xx responses into typed errors
    pub fn error_for_status(self) -> Result<Self> {
        let status = self.status.as_u16();
        if self.status.is_client_error() {
            Err(CommsError::ClientError {
                dependency: self.dependency,
                status,
                body: self.body,
            })
        } else if self.status.is_server_error() {
            Err(CommsError::ServerError {
                dependency: self.dependency,
                status,
                body: self.body,
            })
        } else {
            Ok(self)
        }
    }
}
