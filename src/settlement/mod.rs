//! Payment settlement driven by appointment events

pub mod handler;
pub mod payment;
pub mod provider;

pub use handler::AppointmentCancelledHandler;
pub use payment::{InMemoryPaymentRepository, Payment, PaymentRepository, PaymentStatus};
pub use provider::{RefundProvider, RefundReceipt, RpcRefundProvider, PAYMENT_GATEWAY};

use crate::events::{event_types, AuditLogHandler, EventDispatcher, EventPublisher};
use std::sync::Arc;

/// Dispatcher for the payments service's event queue
pub fn dispatcher(
    payments: Arc<dyn PaymentRepository>,
    provider: Arc<dyn RefundProvider>,
    publisher: EventPublisher,
) -> EventDispatcher {
    let cancelled = AppointmentCancelledHandler::new(payments, provider, publisher);

    EventDispatcher::new()
        .with_handler(event_types::APPOINTMENT_CANCELLED, Arc::new(cancelled))
        .with_handler(event_types::APPOINTMENT_CREATED, Arc::new(AuditLogHandler))
        .with_handler(event_types::APPOINTMENT_COMPLETED, Arc::new(AuditLogHandler))
}
