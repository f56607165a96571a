use super::payment::{Payment, PaymentRepository, PaymentStatus};
use super::provider::RefundProvider;
use crate::events::{event_types, EventEnvelope, EventHandler, EventPublisher};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_REFUND_REASON: &str = "appointment_cancelled";

/// Refunds captured payments of cancelled appointments.
///
/// Only a `completed` payment is refunded, so replays of the same
/// cancellation find the payment `refunded` and do nothing.
pub struct AppointmentCancelledHandler {
    payments: Arc<dyn PaymentRepository>,
    provider: Arc<dyn RefundProvider>,
    publisher: EventPublisher,
}

impl AppointmentCancelledHandler {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        provider: Arc<dyn RefundProvider>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            payments,
            provider,
            publisher,
        }
    }

    async fn settle(
        &self,
        payment: &Payment,
        reason: &str,
        cancelled_by: Option<&str>,
    ) -> anyhow::Result<()> {
        if !payment.is_refundable() {
            info!(
                payment_id = %payment.id,
                status = %payment.status,
                "Payment not refundable, skipping"
            );
            return Ok(());
        }

        let receipt = self
            .provider
            .refund(payment, reason)
            .await
            .with_context(|| format!("refund of payment {} failed", payment.id))?;

        let transitioned = self
            .payments
            .transition_status(&payment.id, PaymentStatus::Completed, PaymentStatus::Refunded)
            .await
            .with_context(|| format!("failed to mark payment {} refunded", payment.id))?;

        if !transitioned {
            warn!(
                payment_id = %payment.id,
                "Payment changed state during refund, not marking refunded"
            );
            return Ok(());
        }

        info!(
            payment_id = %payment.id,
            appointment_id = %payment.appointment_id,
            amount = %payment.amount,
            refund_reference = %receipt.reference,
            "Payment refunded"
        );

        self.publisher
            .publish(
                event_types::PAYMENT_REFUNDED,
                &json!({
                    "payment_id": payment.id,
                    "appointment_id": payment.appointment_id,
                    "amount": payment.amount,
                    "refund_reference": receipt.reference,
                    "cancelled_by": cancelled_by,
                }),
            )
            .await;

        Ok(())
    }
}

#[async_trait]
impl EventHandler for AppointmentCancelledHandler {
    async fn handle(&self, event: &EventEnvelope) -> anyhow::Result<()> {
        let Some(appointment_id) = event.field_str("appointment_id") else {
            warn!(
                event_type = %event.event_type,
                service = %event.service,
                "Cancellation without appointment_id, skipping"
            );
            return Ok(());
        };

        let cancelled_by = event.field_str("cancelled_by");
        let reason = event
            .field_str("reason")
            .unwrap_or_else(|| DEFAULT_REFUND_REASON.to_string());

        let payments = self
            .payments
            .find_by_appointment(&appointment_id)
            .await
            .with_context(|| format!("failed to load payments for appointment {}", appointment_id))?;

        if payments.is_empty() {
            info!(appointment_id = %appointment_id, "No payment for cancelled appointment");
            return Ok(());
        }

        for payment in &payments {
            self.settle(payment, &reason, cancelled_by.as_deref()).await?;
        }

        Ok(())
    }
}
