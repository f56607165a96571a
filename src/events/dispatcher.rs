use super::envelope::EventEnvelope;
use crate::context::RequestContext;
use crate::metrics;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handler for one event type. Deliveries are at-least-once, so handlers
/// must tolerate seeing the same event more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()>;
}

/// How a delivery is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// `nack` with requeue
    Requeue,
    /// `nack` without requeue, routed to the dead-letter queue
    DeadLetter,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Requeue => "requeue",
            Disposition::DeadLetter => "dead_letter",
        }
    }
}

/// Routes decoded events to their handlers by event type
#[derive(Clone)]
pub struct EventDispatcher {
    handlers: BTreeMap<String, Arc<dyn EventHandler>>,
    dead_letter: bool,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            dead_letter: true,
        }
    }

    /// Register `handler` for `event_type`, replacing any previous one
    pub fn with_handler(
        mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.handlers.insert(event_type.into(), handler);
        self
    }

    /// Whether malformed redeliveries go to the dead-letter queue
    pub fn with_dead_letter(mut self, enabled: bool) -> Self {
        self.dead_letter = enabled;
        self
    }

    /// Subscribed event types, used as queue bindings
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    /// Decode and handle one delivery.
    ///
    /// Malformed bodies are requeued, or dead-lettered once already
    /// redelivered. Unknown event types are acknowledged. Handler errors and
    /// panics are requeued.
    pub async fn dispatch(&self, body: &[u8], redelivered: bool) -> Disposition {
        let envelope = match EventEnvelope::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                let disposition = if redelivered && self.dead_letter {
                    Disposition::DeadLetter
                } else {
                    Disposition::Requeue
                };
                error!(
                    error = %e,
                    redelivered,
                    disposition = disposition.as_str(),
                    body_len = body.len(),
                    "Failed to parse event"
                );
                metrics::record_event_consumed("malformed", disposition.as_str());
                return disposition;
            }
        };

        let event_type = envelope.event_type.as_str();
        let Some(handler) = self.handlers.get(event_type) else {
            info!(event_type, "No handler for event type, acknowledging");
            metrics::record_event_consumed(event_type, Disposition::Ack.as_str());
            return Disposition::Ack;
        };

        let context = match &envelope.request_id {
            Some(request_id) => RequestContext::new().with_request_id(request_id.clone()),
            None => RequestContext::new(),
        };

        let outcome = context
            .scope(AssertUnwindSafe(handler.handle(&envelope)).catch_unwind())
            .await;

        let disposition = match outcome {
            Ok(Ok(())) => {
                debug!(event_type, redelivered, "Event handled");
                Disposition::Ack
            }
            Ok(Err(e)) => {
                error!(event_type, redelivered, error = ?e, "Event handler failed, requeueing");
                Disposition::Requeue
            }
            Err(panic) => {
                error!(
                    event_type,
                    redelivered,
                    panic = %panic_message(panic.as_ref()),
                    "Event handler panicked, requeueing"
                );
                Disposition::Requeue
            }
        };

        metrics::record_event_consumed(event_type, disposition.as_str());
        disposition
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Records receipt of an event; subscribers use it for events they only track
pub struct AuditLogHandler;

#[async_trait]
impl EventHandler for AuditLogHandler {
    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        if event.service.is_empty() {
            warn!(event_type = %event.event_type, "Event without emitting service");
        }

        info!(
            event_type = %event.event_type,
            service = %event.service,
            timestamp = %event.timestamp,
            request_id = ?event.request_id,
            "Event received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: &EventEnvelope) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: &EventEnvelope) -> anyhow::Result<()> {
            anyhow::bail!("database unavailable")
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        async fn handle(&self, _event: &EventEnvelope) -> anyhow::Result<()> {
            panic!("handler bug")
        }
    }

    struct SeesRequestId(std::sync::Mutex<Option<String>>);

    #[async_trait]
    impl EventHandler for SeesRequestId {
        async fn handle(&self, _event: &EventEnvelope) -> anyhow::Result<()> {
            *self.0.lock().unwrap() = RequestContext::current_request_id();
            Ok(())
        }
    }

    fn body(event_type: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event_type": event_type,
            "payload": {"appointment_id": 1},
            "service": "appointment_service",
            "timestamp": "2024-03-01T10:00:00.000Z",
            "request_id": "req-42",
            "version": "1.0"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        let dispatcher = EventDispatcher::new().with_handler("appointment.created", handler.clone());

        assert_eq!(
            dispatcher.dispatch(&body("appointment.created"), false).await,
            Disposition::Ack
        );
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_acknowledged() {
        let dispatcher = EventDispatcher::new();
        assert_eq!(
            dispatcher.dispatch(&body("doctor.onboarded"), false).await,
            Disposition::Ack
        );
    }

    #[tokio::test]
    async fn test_malformed_requeued_then_dead_lettered() {
        let dispatcher = EventDispatcher::new();
        assert_eq!(
            dispatcher.dispatch(b"not valid json", false).await,
            Disposition::Requeue
        );
        assert_eq!(
            dispatcher.dispatch(b"not valid json", true).await,
            Disposition::DeadLetter
        );

        let without_dlq = EventDispatcher::new().with_dead_letter(false);
        assert_eq!(
            without_dlq.dispatch(b"not valid json", true).await,
            Disposition::Requeue
        );
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_requeued() {
        let dispatcher = EventDispatcher::new()
            .with_handler("appointment.created", Arc::new(Failing))
            .with_handler("appointment.completed", Arc::new(Panicking));

        assert_eq!(
            dispatcher.dispatch(&body("appointment.created"), true).await,
            Disposition::Requeue
        );
        assert_eq!(
            dispatcher.dispatch(&body("appointment.completed"), false).await,
            Disposition::Requeue
        );
    }

    #[tokio::test]
    async fn test_handler_runs_with_event_request_id() {
        let handler = Arc::new(SeesRequestId(std::sync::Mutex::new(None)));
        let dispatcher = EventDispatcher::new().with_handler("appointment.created", handler.clone());

        dispatcher.dispatch(&body("appointment.created"), false).await;
        assert_eq!(handler.0.lock().unwrap().as_deref(), Some("req-42"));
    }

    #[tokio::test]
    async fn test_event_types_sorted() {
        let dispatcher = EventDispatcher::new()
            .with_handler("appointment.completed", Arc::new(AuditLogHandler))
            .with_handler("appointment.cancelled", Arc::new(AuditLogHandler));

        let types: Vec<&str> = dispatcher.event_types().collect();
        assert_eq!(types, vec!["appointment.cancelled", "appointment.completed"]);
        assert!(dispatcher.handles("appointment.completed"));
        assert!(!dispatcher.handles("appointment.created"));
    }
}
