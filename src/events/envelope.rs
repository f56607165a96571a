use crate::context::RequestContext;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope format version
pub const EVENT_VERSION: &str = "1.0";

/// Event types exchanged between services
pub mod event_types {
    pub const APPOINTMENT_CREATED: &str = "appointment.created";
    pub const APPOINTMENT_COMPLETED: &str = "appointment.completed";
    pub const APPOINTMENT_CANCELLED: &str = "appointment.cancelled";
    pub const PAYMENT_REFUNDED: &str = "payment.refunded";
}

/// Keys never written to logs, matched case-insensitively at any depth
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "password_confirmation",
    "token",
    "access_token",
    "refresh_token",
    "api_key",
    "secret",
    "card_number",
    "cvv",
    "ssn",
    "authorization",
];

/// Wire format of every event on the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Dot-namespaced type, also used as routing key
    pub event_type: String,

    #[serde(default)]
    pub payload: Value,

    /// Emitting service
    #[serde(default)]
    pub service: String,

    /// ISO 8601 emission time
    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub request_id: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    EVENT_VERSION.to_string()
}

impl EventEnvelope {
    /// Wrap a payload, stamping time and the ambient request id
    pub fn new(event_type: impl Into<String>, service: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            service: service.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            request_id: RequestContext::current_request_id(),
            version: EVENT_VERSION.to_string(),
        }
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Top-level payload field
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.as_object()?.get(key)
    }

    /// Top-level payload field rendered as a string; numbers are accepted
    pub fn field_str(&self, key: &str) -> Option<String> {
        match self.field(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Copy of `payload` with sensitive keys removed, for logging
pub fn sanitize_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_sensitive(key))
                .map(|(key, value)| (key.clone(), sanitize_payload(value)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_payload).collect()),
        other => other.clone(),
    }
}

fn is_sensitive(key: &str) -> bool {
    SENSITIVE_KEYS
        .iter()
        .any(|sensitive| sensitive.eq_ignore_ascii_case(key))
}
