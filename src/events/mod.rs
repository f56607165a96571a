//! Event choreography over a durable topic exchange
//!
//! Publishing is fire-and-forget: [`EventPublisher::publish`] never fails the
//! caller. Consumption is at-least-once: [`EventConsumer`] binds one durable
//! queue per service, hands deliveries to an [`EventDispatcher`] and settles
//! them with the broker according to the returned [`Disposition`].

pub mod consumer;
pub mod dispatcher;
pub mod envelope;
pub mod publisher;
pub mod transport;

pub use consumer::{dead_letter_exchange, dead_letter_queue, ConsumerHandle, EventConsumer};
pub use dispatcher::{AuditLogHandler, Disposition, EventDispatcher, EventHandler};
pub use envelope::{event_types, sanitize_payload, EventEnvelope, EVENT_VERSION};
pub use publisher::EventPublisher;
pub use transport::{AmqpTransport, EventTransport};
