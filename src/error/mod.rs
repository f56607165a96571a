use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for inter-service communication
pub type Result<T> = std::result::Result<T, CommsError>;

/// Communication layer error types
#[derive(Error, Debug)]
pub enum CommsError {
    #[error("Circuit open for dependency: {0}")]
    CircuitOpen(String),

    #[error("Request to {dependency} timed out: {message}")]
    RequestTimeout { dependency: String, message: String },

    #[error("Dependency {dependency} unavailable: {message}")]
    ServiceUnavailable { dependency: String, message: String },

    #[error("Client error from {dependency}: HTTP {status}")]
    ClientError {
        dependency: String,
        status: u16,
        body: serde_json::Value,
    },

    #[error("Server error from {dependency}: HTTP {status}")]
    ServerError {
        dependency: String,
        status: u16,
        body: serde_json::Value,
    },

    #[error("Unknown dependency: {0}")]
    ServiceNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Circuit store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Circuit store did not answer within {0:?}")]
    StoreTimeout(std::time::Duration),

    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommsError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            CommsError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            CommsError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CommsError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CommsError::ClientError { .. } => StatusCode::BAD_GATEWAY,
            CommsError::ServerError { .. } => StatusCode::BAD_GATEWAY,
            CommsError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            CommsError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CommsError::Http(_) => StatusCode::BAD_REQUEST,
            CommsError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CommsError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CommsError::StoreTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            CommsError::Broker(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CommsError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CommsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Transport-level failures that another attempt may fix
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CommsError::RequestTimeout { .. } | CommsError::ServiceUnavailable { .. }
        )
    }
}

impl IntoResponse for CommsError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
