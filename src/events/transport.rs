use crate::error::{CommsError, Result};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::debug;

/// AMQP persistent delivery mode
const PERSISTENT: u8 = 2;

/// Sink for serialized event envelopes
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Deliver `body` under `routing_key`
    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<()>;
}

/// Declare the shared durable topic exchange
pub(crate) async fn declare_exchange(channel: &Channel, exchange: &str) -> lapin::Result<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
}

/// Publishes over a short-lived AMQP connection opened per message
pub struct AmqpTransport {
    url: String,
    exchange: String,
}

impl AmqpTransport {
    pub fn new(url: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange: exchange.into(),
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    async fn publish_on(&self, connection: &Connection, routing_key: &str, body: &[u8]) -> Result<()> {
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        declare_exchange(&channel, &self.exchange).await?;

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        let confirmation = channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(CommsError::Internal(format!(
                "Broker rejected event {} on exchange {}",
                routing_key, self.exchange
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl EventTransport for AmqpTransport {
    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<()> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default()).await?;
        let result = self.publish_on(&connection, routing_key, body).await;

        if let Err(e) = connection.close(200, "OK").await {
            debug!(error = %e, "Failed to close publisher connection");
        }

        result
    }
}
