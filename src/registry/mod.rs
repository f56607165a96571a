//! Service registry
//!
//! Maps symbolic dependency names (e.g. `payment_service`) to base URLs.
//! Each entry carries an environment variable override and a default URL;
//! the override is resolved once when the registry is built, after which
//! the registry is immutable and shared behind an `Arc`.

use crate::error::{CommsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use url::Url;

/// Static definition of a dependency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyConfig {
    /// Environment variable that overrides the base URL
    pub env_var: String,
    /// Base URL used when the environment variable is unset
    pub default_url: String,
    /// Path probed by health checks
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Prefix for service-to-service endpoints
    #[serde(default = "default_internal_prefix")]
    pub internal_prefix: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_internal_prefix() -> String {
    "/internal".to_string()
}

impl DependencyConfig {
    pub fn new(env_var: &str, default_url: &str) -> Self {
        Self {
            env_var: env_var.to_string(),
            default_url: default_url.to_string(),
            health_path: default_health_path(),
            internal_prefix: default_internal_prefix(),
        }
    }
}

/// A dependency with its base URL resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub base_url: String,
    pub health_path: String,
    pub internal_prefix: String,
}

impl Dependency {
    /// Join a path onto the base URL
    pub fn url_for(&self, path: &str) -> String {
        join_path(&self.base_url, path)
    }

    /// Prefix a path with the internal endpoint prefix
    pub fn internal_path(&self, path: &str) -> String {
        join_path(&self.internal_prefix, path)
    }
}

fn join_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}

/// Immutable map of known dependencies
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    dependencies: BTreeMap<String, Dependency>,
}

impl ServiceRegistry {
    /// Dependencies every service of the platform knows about
    pub fn builtin() -> BTreeMap<String, DependencyConfig> {
        [
            ("user_service", "USER_SERVICE_URL", "http://localhost:3001"),
            ("doctor_service", "DOCTOR_SERVICE_URL", "http://localhost:3002"),
            (
                "appointment_service",
                "APPOINTMENT_SERVICE_URL",
                "http://localhost:3003",
            ),
            ("payment_service", "PAYMENT_SERVICE_URL", "http://localhost:3004"),
            (
                "notification_service",
                "NOTIFICATION_SERVICE_URL",
                "http://localhost:3005",
            ),
            ("payment_gateway", "PAYMENT_GATEWAY_URL", "http://localhost:3100"),
        ]
        .into_iter()
        .map(|(name, env_var, url)| (name.to_string(), DependencyConfig::new(env_var, url)))
        .collect()
    }

    /// Build from the built-in map plus configured additions, resolving
    /// overrides from the process environment
    pub fn from_config(extra: &BTreeMap<String, DependencyConfig>) -> Result<Self> {
        let mut definitions = Self::builtin();
        definitions.extend(extra.clone());
        Self::with_resolver(definitions, |var| std::env::var(var).ok())
    }

    /// Build with an explicit override resolver
    pub fn with_resolver<F>(definitions: BTreeMap<String, DependencyConfig>, resolve: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut dependencies = BTreeMap::new();

        for (name, definition) in definitions {
            let (base_url, source) = match resolve(&definition.env_var) {
                Some(url) if !url.trim().is_empty() => (url.trim().to_string(), "environment"),
                _ => (definition.default_url.clone(), "default"),
            };

            let parsed = Url::parse(&base_url).map_err(|e| {
                CommsError::Config(format!("Invalid URL for dependency {}: {}", name, e))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(CommsError::Config(format!(
                    "Dependency {} must use http or https, got {}",
                    name,
                    parsed.scheme()
                )));
            }

            debug!(dependency = %name, url = %base_url, source, "Resolved dependency");

            dependencies.insert(
                name.clone(),
                Dependency {
                    name,
                    base_url,
                    health_path: definition.health_path,
                    internal_prefix: definition.internal_prefix,
                },
            );
        }

        info!(count = dependencies.len(), "Service registry loaded");

        Ok(Self { dependencies })
    }

    /// Look up a dependency by name
    pub fn get(&self, name: &str) -> Result<&Dependency> {
        self.dependencies
            .get(name)
            .ok_or_else(|| CommsError::ServiceNotFound(name.to_string()))
    }

    /// Base URL for a dependency
    pub fn base_url(&self, name: &str) -> Result<&str> {
        self.get(name).map(|d| d.base_url.as_str())
    }

    /// Full URL for a path on a dependency
    pub fn url_for(&self, name: &str, path: &str) -> Result<String> {
        self.get(name).map(|d| d.url_for(path))
    }

    /// Whether a dependency is known
    pub fn contains(&self, name: &str) -> bool {
        self.dependencies.contains_key(name)
    }

    /// Names of all known dependencies, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.keys().map(String::as_str)
    }

    /// All known dependencies, sorted by name
    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_builtin_defaults() {
        let registry = ServiceRegistry::with_resolver(ServiceRegistry::builtin(), no_env).unwrap();
        assert_eq!(
            registry.base_url("payment_service").unwrap(),
            "http://localhost:3004"
        );
        assert!(registry.contains("payment_gateway"));
        assert_eq!(registry.names().count(), 6);
    }

    #[test]
    fn test_environment_override() {
        let registry = ServiceRegistry::with_resolver(ServiceRegistry::builtin(), |var| {
            (var == "USER_SERVICE_URL").then(|| "http://users.internal:8080".to_string())
        })
        .unwrap();

        assert_eq!(
            registry.base_url("user_service").unwrap(),
            "http://users.internal:8080"
        );
        assert_eq!(
            registry.base_url("doctor_service").unwrap(),
            "http://localhost:3002"
        );
    }

    #[test]
    fn test_blank_override_falls_back_to_default() {
        let registry =
            ServiceRegistry::with_resolver(ServiceRegistry::builtin(), |_| Some("  ".to_string()))
                .unwrap();
        assert_eq!(
            registry.base_url("user_service").unwrap(),
            "http://localhost:3001"
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let registry = ServiceRegistry::with_resolver(ServiceRegistry::builtin(), no_env).unwrap();
        let err = registry.get("billing_service").unwrap_err();
        assert!(matches!(err, CommsError::ServiceNotFound(name) if name == "billing_service"));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            "broken".to_string(),
            DependencyConfig::new("BROKEN_URL", "not a url"),
        );
        assert!(ServiceRegistry::with_resolver(definitions, no_env).is_err());

        let mut definitions = BTreeMap::new();
        definitions.insert(
            "ftp".to_string(),
            DependencyConfig::new("FTP_URL", "ftp://files.local"),
        );
        assert!(ServiceRegistry::with_resolver(definitions, no_env).is_err());
    }

    #[test]
    fn test_url_joining() {
        let registry = ServiceRegistry::with_resolver(ServiceRegistry::builtin(), |var| {
            (var == "PAYMENT_SERVICE_URL").then(|| "http://payments:3004/".to_string())
        })
        .unwrap();

        assert_eq!(
            registry.url_for("payment_service", "/api/payments").unwrap(),
            "http://payments:3004/api/payments"
        );

        let dependency = registry.get("payment_service").unwrap();
        assert_eq!(dependency.internal_path("refunds"), "/internal/refunds");
        assert_eq!(dependency.internal_path("/refunds"), "/internal/refunds");
        assert_eq!(dependency.url_for(""), "http://payments:3004");
    }
}
