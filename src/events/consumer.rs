use super::dispatcher::{Disposition, EventDispatcher};
use super::transport::declare_exchange;
use crate::config::EventsConfig;
use crate::error::{CommsError, Result};
use backoff::{backoff::Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEAD_LETTER_EXCHANGE_ARG: &str = "x-dead-letter-exchange";

/// Fanout exchange receiving rejected deliveries
pub fn dead_letter_exchange(exchange: &str) -> String {
    format!("{}.dlx", exchange)
}

/// Queue collecting dead-lettered deliveries
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}.dead", queue)
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

/// Why a broker session ended without an error
enum SessionEnd {
    Shutdown,
    StreamClosed,
}

/// Long-lived subscriber for one service queue
pub struct EventConsumer {
    config: EventsConfig,
    service: String,
    queue: String,
    dispatcher: Arc<EventDispatcher>,
}

/// Handle to a running consumer; dropping it also stops the consumer
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl ConsumerHandle {
    /// Stop consuming and wait for the background task to finish
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| CommsError::Internal(format!("Event consumer task failed: {}", e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl EventConsumer {
    pub fn new(service: impl Into<String>, config: EventsConfig, dispatcher: EventDispatcher) -> Self {
        let service = service.into();
        let queue = config.queue_name(&service);
        let dispatcher = Arc::new(dispatcher.with_dead_letter(config.dead_letter));

        Self {
            config,
            service,
            queue,
            dispatcher,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Run the consumer on a background task
    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        ConsumerHandle { shutdown, task }
    }

    /// Consume until shutdown, reconnecting with backoff when the broker
    /// session drops. Gives up after `max_reconnect_attempts` consecutive
    /// sessions that never received a delivery.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut backoff = self.reconnect_backoff();
        let mut attempts: u32 = 0;

        loop {
            let mut consumed = false;

            match self.session(&mut shutdown, &mut consumed).await {
                Ok(SessionEnd::Shutdown) => {
                    info!(queue = %self.queue, "Event consumer stopped");
                    return Ok(());
                }
                Ok(SessionEnd::StreamClosed) => {
                    warn!(queue = %self.queue, "Broker closed the consumer stream");
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "Event consumer session failed");
                }
            }

            if consumed {
                attempts = 0;
                backoff.reset();
            }

            attempts += 1;
            if attempts > self.config.max_reconnect_attempts {
                error!(
                    queue = %self.queue,
                    attempts = attempts - 1,
                    "Event consumer giving up"
                );
                return Err(CommsError::Internal(format!(
                    "Event consumer for {} gave up after {} reconnect attempts",
                    self.queue,
                    attempts - 1
                )));
            }

            let wait = backoff
                .next_backoff()
                .unwrap_or_else(|| Duration::from_millis(self.config.reconnect_max_backoff_ms));
            warn!(
                queue = %self.queue,
                attempt = attempts,
                wait_ms = wait.as_millis() as u64,
                "Reconnecting event consumer"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!(queue = %self.queue, "Event consumer stopped while reconnecting");
                    return Ok(());
                }
            }
        }
    }

    async fn session(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        consumed: &mut bool,
    ) -> Result<SessionEnd> {
        if *shutdown.borrow() {
            return Ok(SessionEnd::Shutdown);
        }

        let connection =
            Connection::connect(&self.config.amqp_url, ConnectionProperties::default()).await?;

        close_after(
            self.consume(&connection, shutdown, consumed),
            connection.close(200, "OK"),
        )
        .await
    }

    async fn consume(
        &self,
        connection: &Connection,
        shutdown: &mut watch::Receiver<bool>,
        consumed: &mut bool,
    ) -> Result<SessionEnd> {
        let channel = connection.create_channel().await?;

        self.declare_topology(&channel).await?;
        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await?;

        let consumer_tag = format!("{}-{}", self.service, uuid::Uuid::new_v4());
        let mut deliveries = channel
            .basic_consume(
                &self.queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %self.queue,
            exchange = %self.config.exchange,
            bindings = ?self.dispatcher.event_types().collect::<Vec<_>>(),
            prefetch = self.config.prefetch,
            "Event consumer started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                delivery = deliveries.next() => match delivery {
                    Some(Ok(delivery)) => {
                        *consumed = true;
                        self.settle(delivery).await?;
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(SessionEnd::StreamClosed),
                }
            }
        }
    }

    async fn settle(&self, delivery: Delivery) -> Result<()> {
        let disposition = self
            .dispatcher
            .dispatch(&delivery.data, delivery.redelivered)
            .await;

        match disposition {
            Disposition::Ack => delivery.ack(BasicAckOptions::default()).await?,
            Disposition::Requeue => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..Default::default()
                    })
                    .await?
            }
            Disposition::DeadLetter => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    })
                    .await?
            }
        }

        Ok(())
    }

    async fn declare_topology(&self, channel: &Channel) -> Result<()> {
        declare_exchange(channel, &self.config.exchange).await?;

        let mut arguments = FieldTable::default();
        if self.config.dead_letter {
            let dlx = dead_letter_exchange(&self.config.exchange);
            let dlq = dead_letter_queue(&self.queue);

            channel
                .exchange_declare(
                    &dlx,
                    ExchangeKind::Fanout,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await?;
            channel
                .queue_declare(&dlq, durable_queue(), FieldTable::default())
                .await?;
            channel
                .queue_bind(&dlq, &dlx, "", QueueBindOptions::default(), FieldTable::default())
                .await?;

            arguments.insert(
                DEAD_LETTER_EXCHANGE_ARG.into(),
                AMQPValue::LongString(dlx.into()),
            );
        }

        channel
            .queue_declare(&self.queue, durable_queue(), arguments)
            .await?;

        for event_type in self.dispatcher.event_types() {
            channel
                .queue_bind(
                    &self.queue,
                    &self.config.exchange,
                    event_type,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        Ok(())
    }

    fn reconnect_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.reconnect_initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.config.reconnect_max_backoff_ms))
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run a session, then close its connection whatever the session returned
async fn close_after<T, E: std::fmt::Display>(
    session: impl Future<Output = Result<T>>,
    close: impl Future<Output = std::result::Result<(), E>>,
) -> Result<T> {
    let outcome = session.await;
    if let Err(e) = close.await {
        debug!(error = %e, "Consumer connection already closed");
    }
    outcome
}
