use http::Method;
use serde_json::Value;
use std::time::Duration;

/// Outbound call to a named dependency
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub(crate) dependency: String,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) body: Option<Value>,
    pub(crate) params: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retries: Option<u32>,
    pub(crate) internal: bool,
}

impl RpcRequest {
    pub fn new(dependency: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            dependency: dependency.into(),
            method,
            path: path.into(),
            body: None,
            params: Vec::new(),
            headers: Vec::new(),
            timeout: None,
            retries: None,
            internal: false,
        }
    }

    pub fn get(dependency: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(dependency, Method::GET, path)
    }

    pub fn post(dependency: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(dependency, Method::POST, path)
    }

    pub fn put(dependency: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(dependency, Method::PUT, path)
    }

    pub fn patch(dependency: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(dependency, Method::PATCH, path)
    }

    pub fn delete(dependency: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(dependency, Method::DELETE, path)
    }

    /// JSON request body
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Query string parameter
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Extra header, applied after the propagated ones
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Per-attempt timeout overriding the client default
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry budget overriding the client default
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Resolve the path under the dependency's internal prefix
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}
