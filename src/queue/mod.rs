//! AMQP queue manager via lapin.
//!
//! Owns one broker connection with a consumer channel and a publish
//! channel. Declares a durable topic exchange and a durable queue bound
//! to it with `#`, so everything this worker publishes comes back to the
//! worker pool.

mod delivery;

pub use delivery::{Acknowledge, Delivery};

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ConfirmSelectOptions,
    ExchangeDeclareOptions, ExchangeDeleteOptions, QueueBindOptions, QueueDeclareOptions,
    QueueDeleteOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use opentelemetry::KeyValue;
use std::pin::Pin;
use tracing::{debug, info};

/// Routing key matching every message on the exchange.
pub const WILDCARD_ROUTING_KEY: &str = "#";

/// Deliveries from one consumer subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// Sends one message to the exchange.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, routing_key: &str, content_type: &str, body: &[u8]) -> Result<()>;
}

/// Broker handle. One consumer channel, one publish channel.
pub struct QueueManager {
    connection: Connection,
    consumer: Channel,
    producer: Channel,
    exchange_name: String,
    queue_name: String,
}

impl QueueManager {
    /// Connect to the broker and declare exchange, queue and binding.
    pub async fn connect(address: &str, exchange_name: &str, queue_name: &str) -> Result<Self> {
        let connection = Connection::connect(address, ConnectionProperties::default())
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to broker: {e}")))?;

        let consumer = connection
            .create_channel()
            .await
            .map_err(|e| Error::Connection(format!("failed to open consumer channel: {e}")))?;
        let producer = connection
            .create_channel()
            .await
            .map_err(|e| Error::Connection(format!("failed to open publish channel: {e}")))?;

        producer
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| Error::Topology(format!("failed to enable publisher confirms: {e}")))?;

        consumer
            .exchange_declare(
                exchange_name,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                Error::Topology(format!("failed to declare exchange {exchange_name}: {e}"))
            })?;

        consumer
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Topology(format!("failed to declare queue {queue_name}: {e}")))?;

        consumer
            .queue_bind(
                queue_name,
                exchange_name,
                WILDCARD_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                Error::Topology(format!(
                    "failed to bind queue {queue_name} to {exchange_name}: {e}"
                ))
            })?;

        info!(
            exchange = exchange_name,
            queue = queue_name,
            "connected to broker, topology declared"
        );

        Ok(Self {
            connection,
            consumer,
            producer,
            exchange_name: exchange_name.to_string(),
            queue_name: queue_name.to_string(),
        })
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Limit unacknowledged deliveries held by this consumer.
    pub async fn set_prefetch(&self, count: u16) -> Result<()> {
        self.consumer
            .basic_qos(count, BasicQosOptions::default())
            .await
            .map_err(|e| Error::Topology(format!("failed to set prefetch to {count}: {e}")))
    }

    /// Start consuming. The returned stream is unbounded and cannot be
    /// restarted; it ends when the channel or connection closes.
    pub async fn consume(&self) -> Result<DeliveryStream> {
        let tag = format!("crawler-worker-{}", uuid::Uuid::new_v4());
        let consumer = self
            .consumer
            .basic_consume(
                &self.queue_name,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                Error::Topology(format!("failed to consume from {}: {e}", self.queue_name))
            })?;

        record_operation(&self.queue_name, "consume");
        debug!(queue = %self.queue_name, consumer_tag = %tag, "consumer started");

        let queue = self.queue_name.clone();
        Ok(Box::pin(consumer.map(move |next| {
            let delivery = next.map_err(|e| {
                Error::Connection(format!("delivery stream from {queue} failed: {e}"))
            })?;
            record_operation(&queue, "deliver");
            Ok(Delivery::from(delivery))
        })))
    }

    /// Acknowledge one delivery.
    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        delivery.ack().await?;
        record_operation(&self.queue_name, "ack");
        Ok(())
    }

    /// Reject one delivery, optionally handing it back to the queue.
    pub async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        delivery.reject(requeue).await?;
        record_operation(&self.queue_name, "reject");
        Ok(())
    }

    /// Delete the queue and the exchange. Used to tear down test topology.
    pub async fn delete_topology(&self) -> Result<u32> {
        let purged = self
            .consumer
            .queue_delete(&self.queue_name, QueueDeleteOptions::default())
            .await
            .map_err(|e| {
                Error::Topology(format!("failed to delete queue {}: {e}", self.queue_name))
            })?;
        self.consumer
            .exchange_delete(&self.exchange_name, ExchangeDeleteOptions::default())
            .await
            .map_err(|e| {
                Error::Topology(format!(
                    "failed to delete exchange {}: {e}",
                    self.exchange_name
                ))
            })?;
        Ok(purged)
    }

    /// Close both channels and then the connection. Call once.
    pub async fn close(&self) -> Result<()> {
        for channel in [&self.consumer, &self.producer] {
            channel
                .close(200, "closing")
                .await
                .map_err(|e| Error::Connection(format!("failed to close channel: {e}")))?;
        }
        self.connection
            .close(200, "closing")
            .await
            .map_err(|e| Error::Connection(format!("failed to close connection: {e}")))?;
        info!(queue = %self.queue_name, "broker connection closed");
        Ok(())
    }
}

#[async_trait]
impl Publisher for QueueManager {
    async fn publish(&self, routing_key: &str, content_type: &str, body: &[u8]) -> Result<()> {
        let properties = BasicProperties::default()
            .with_content_type(content_type.into())
            .with_delivery_mode(2);

        let confirm = self
            .producer
            .basic_publish(
                &self.exchange_name,
                routing_key,
                BasicPublishOptions::default(),
                body,
                properties,
            )
            .await
            .map_err(|e| Error::Publish(format!("failed to publish to {}: {e}", self.exchange_name)))?
            .await
            .map_err(|e| Error::Publish(format!("failed to confirm publish: {e}")))?;

        if confirm.is_nack() {
            return Err(Error::Publish(format!(
                "broker refused message on {}",
                self.exchange_name
            )));
        }

        record_operation(&self.queue_name, "publish");
        Ok(())
    }
}

fn record_operation(queue: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}
