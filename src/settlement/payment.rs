use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Payment lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment as seen by the settlement handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub appointment_id: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
    #[serde(default)]
    pub provider_reference: Option<String>,
}

impl Payment {
    pub fn new(
        id: impl Into<String>,
        appointment_id: impl Into<String>,
        amount: Decimal,
        status: PaymentStatus,
    ) -> Self {
        Self {
            id: id.into(),
            appointment_id: appointment_id.into(),
            amount,
            status,
            provider_reference: None,
        }
    }

    pub fn with_provider_reference(mut self, reference: impl Into<String>) -> Self {
        self.provider_reference = Some(reference.into());
        self
    }

    /// Only captured payments are refunded on cancellation
    pub fn is_refundable(&self) -> bool {
        self.status == PaymentStatus::Completed
    }
}

/// Payment persistence owned by the payments service
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn find_by_appointment(&self, appointment_id: &str) -> Result<Vec<Payment>>;

    /// Move `payment_id` from `from` to `to`; `false` when the payment is
    /// unknown or no longer in `from`
    async fn transition_status(
        &self,
        payment_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool>;
}

/// Process-local repository
#[derive(Debug, Default)]
pub struct InMemoryPaymentRepository {
    payments: DashMap<String, Payment>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, payment: Payment) {
        self.payments.insert(payment.id.clone(), payment);
    }

    pub fn get(&self, payment_id: &str) -> Option<Payment> {
        self.payments.get(payment_id).map(|p| p.value().clone())
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn find_by_appointment(&self, appointment_id: &str) -> Result<Vec<Payment>> {
        let mut found: Vec<Payment> = self
            .payments
            .iter()
            .filter(|entry| entry.appointment_id == appointment_id)
            .map(|entry| entry.value().clone())
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn transition_status(
        &self,
        payment_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
    ) -> Result<bool> {
        match self.payments.get_mut(payment_id) {
            Some(mut payment) if payment.status == from => {
                payment.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_serde() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::PartiallyRefunded).unwrap(),
            "\"partially_refunded\""
        );
        let status: PaymentStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(status, PaymentStatus::Completed);
        assert_eq!(PaymentStatus::Refunded.to_string(), "refunded");
    }

    #[test]
    fn test_amount_serialized_as_string() {
        let payment = Payment::new(
            "pay_1",
            "42",
            Decimal::from_str("200.00").unwrap(),
            PaymentStatus::Completed,
        );
        let json = serde_json::to_value(&payment).unwrap();
        assert_eq!(json["amount"], "200.00");
        assert!(payment.is_refundable());
    }

    #[tokio::test]
    async fn test_find_by_appointment() {
        let repo = InMemoryPaymentRepository::new();
        repo.insert(Payment::new("pay_2", "42", Decimal::ONE, PaymentStatus::Failed));
        repo.insert(Payment::new("pay_1", "42", Decimal::ONE, PaymentStatus::Completed));
        repo.insert(Payment::new("pay_3", "43", Decimal::ONE, PaymentStatus::Completed));

        let found = repo.find_by_appointment("42").await.unwrap();
        let ids: Vec<&str> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["pay_1", "pay_2"]);
        assert!(repo.find_by_appointment("99").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let repo = InMemoryPaymentRepository::new();
        repo.insert(Payment::new("pay_1", "42", Decimal::ONE, PaymentStatus::Completed));

        assert!(repo
            .transition_status("pay_1", PaymentStatus::Completed, PaymentStatus::Refunded)
            .await
            .unwrap());
        assert!(!repo
            .transition_status("pay_1", PaymentStatus::Completed, PaymentStatus::Refunded)
            .await
            .unwrap());
        assert!(!repo
            .transition_status("missing", PaymentStatus::Completed, PaymentStatus::Refunded)
            .await
            .unwrap());
        assert_eq!(repo.get("pay_1").unwrap().status, PaymentStatus::Refunded);
    }
}
