use super::envelope::{sanitize_payload, EventEnvelope};
use super::transport::{AmqpTransport, EventTransport};
use crate::config::CommsConfig;
use crate::metrics;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Best-effort event publisher.
///
/// Publishing never fails the caller: broker and serialization problems are
/// logged with their full error chain and reported as `false`. Publish only
/// after the state change the event describes has been committed.
#[derive(Clone)]
pub struct EventPublisher {
    service: String,
    transport: Option<Arc<dyn EventTransport>>,
}

impl EventPublisher {
    pub fn new(service: impl Into<String>, transport: Arc<dyn EventTransport>) -> Self {
        Self {
            service: service.into(),
            transport: Some(transport),
        }
    }

    /// Publisher that drops every event, for tests and broker-less tiers
    pub fn disabled(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            transport: None,
        }
    }

    /// AMQP publisher, or a disabled one when publishing is switched off
    pub fn from_config(config: &CommsConfig) -> Self {
        let service = config.service.name.clone();

        if !config.events.publishing_enabled() {
            info!(service = %service, "Event publishing disabled");
            return Self::disabled(service);
        }

        let transport = AmqpTransport::new(&config.events.amqp_url, &config.events.exchange);
        Self::new(service, Arc::new(transport))
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Publish `payload` as `event_type`; returns whether the broker took it
    pub async fn publish<T: Serialize + ?Sized>(&self, event_type: &str, payload: &T) -> bool {
        let Some(transport) = &self.transport else {
            debug!(event_type, "Publishing disabled, event dropped");
            metrics::record_event_published(event_type, "disabled");
            return false;
        };

        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                error!(event_type, error = %e, "Failed to serialize event payload");
                metrics::record_event_published(event_type, "failed");
                return false;
            }
        };

        let envelope = EventEnvelope::new(event_type, self.service.as_str(), payload);
        debug!(
            event_type,
            payload = %sanitize_payload(&envelope.payload),
            "Publishing event"
        );

        let body = match envelope.to_vec() {
            Ok(body) => body,
            Err(e) => {
                error!(event_type, error = %e, "Failed to encode event envelope");
                metrics::record_event_published(event_type, "failed");
                return false;
            }
        };

        match transport.publish(event_type, &body).await {
            Ok(()) => {
                info!(
                    event_type,
                    service = %self.service,
                    request_id = ?envelope.request_id,
                    "Event published"
                );
                metrics::record_event_published(event_type, "published");
                true
            }
            Err(e) => {
                let report = anyhow::Error::from(e);
                error!(event_type, error = ?report, "Failed to publish event");
                metrics::record_event_published(event_type, "failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CommsError, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Captured {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl EventTransport for Captured {
        async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((routing_key.to_string(), body.to_vec()));
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl EventTransport for Broken {
        async fn publish(&self, _routing_key: &str, _body: &[u8]) -> Result<()> {
            Err(CommsError::Internal("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_publish_wraps_payload() {
        let transport = Arc::new(Captured::default());
        let publisher = EventPublisher::new("appointment_service", transport.clone());

        assert!(
            publisher
                .publish("appointment.cancelled", &json!({"appointment_id": 9}))
                .await
        );

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "appointment.cancelled");

        let envelope = EventEnvelope::from_slice(&sent[0].1).unwrap();
        assert_eq!(envelope.service, "appointment_service");
        assert_eq!(envelope.payload, json!({"appointment_id": 9}));
    }

    #[tokio::test]
    async fn test_wire_payload_keeps_business_fields() {
        let transport = Arc::new(Captured::default());
        let publisher = EventPublisher::new("user_service", transport.clone());

        publisher
            .publish("user.password_reset", &json!({"user_id": 1, "token": "t-1"}))
            .await;

        let sent = transport.sent.lock().unwrap();
        let envelope = EventEnvelope::from_slice(&sent[0].1).unwrap();
        assert_eq!(envelope.payload["token"], "t-1");
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        let publisher = EventPublisher::new("appointment_service", Arc::new(Broken));
        assert!(!publisher.publish("appointment.created", &json!({})).await);
    }

    #[tokio::test]
    async fn test_disabled_publisher() {
        let publisher = EventPublisher::disabled("appointment_service");
        assert!(!publisher.is_enabled());
        assert!(!publisher.publish("appointment.created", &json!({})).await);
    }

    #[tokio::test]
    async fn test_from_config_respects_flag() {
        let mut config = CommsConfig::default_config("payment_service");
        config.events.publish_enabled = false;
        if std::env::var(crate::config::EVENTS_ENABLED_ENV).is_err() {
            assert!(!EventPublisher::from_config(&config).is_enabled());
        }
    }
}
