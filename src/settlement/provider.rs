use super::payment::Payment;
use crate::client::{RpcRequest, ServiceClient};
use crate::error::{CommsError, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

/// Dependency name of the payment provider gateway
pub const PAYMENT_GATEWAY: &str = "payment_gateway";

/// Provider acknowledgement of a refund
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub reference: String,
}

/// Remote system that moves the money back
#[async_trait]
pub trait RefundProvider: Send + Sync {
    async fn refund(&self, payment: &Payment, reason: &str) -> Result<RefundReceipt>;
}

/// Refunds through the payment gateway's internal API
#[derive(Clone)]
pub struct RpcRefundProvider {
    client: ServiceClient,
    dependency: String,
}

impl RpcRefundProvider {
    pub fn new(client: ServiceClient) -> Self {
        Self {
            client,
            dependency: PAYMENT_GATEWAY.to_string(),
        }
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = dependency.into();
        self
    }
}

#[async_trait]
impl RefundProvider for RpcRefundProvider {
    async fn refund(&self, payment: &Payment, reason: &str) -> Result<RefundReceipt> {
        let request = RpcRequest::post(&self.dependency, "/refunds")
            .internal()
            .header("idempotency-key", format!("refund-{}", payment.id))
            .json(json!({
                "payment_id": payment.id,
                "provider_reference": payment.provider_reference,
                "amount": payment.amount.to_string(),
                "reason": reason,
            }));

        let response = self.client.call(request).await?.error_for_status()?;

        let reference = response
            .dig_str(&["refund", "id"])
            .or_else(|| response.dig_str(&["refund_reference"]))
            .or_else(|| response.dig_str(&["id"]))
            .ok_or_else(|| {
                CommsError::Internal(format!(
                    "Refund response for payment {} carries no reference",
                    payment.id
                ))
            })?
            .to_string();

        info!(payment_id = %payment.id, refund_reference = %reference, "Refund accepted by provider");

        Ok(RefundReceipt { reference })
    }
}
