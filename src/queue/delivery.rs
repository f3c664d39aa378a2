//! One broker delivery and the handle that settles it.

use crate::error::{Error, Result};
use async_trait::async_trait;
use lapin::acker::Acker;
use lapin::options::{BasicAckOptions, BasicRejectOptions};
use std::fmt;
use std::sync::Arc;

/// Finalizes one delivery's broker-visible state.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn reject(&self, requeue: bool) -> Result<()>;
}

#[async_trait]
impl Acknowledge for Acker {
    async fn ack(&self) -> Result<()> {
        Acker::ack(self, BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::Acknowledge(format!("ack failed: {e}")))
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        Acker::reject(self, BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|e| Error::Acknowledge(format!("reject failed: {e}")))
    }
}

/// A message received from the broker.
pub struct Delivery {
    pub body: Vec<u8>,
    pub routing_key: String,
    pub delivery_tag: u64,
    /// Set by the broker when this message was handed out before.
    pub redelivered: bool,
    handle: Arc<dyn Acknowledge>,
}

impl Delivery {
    /// Build a delivery around any acknowledgement handle.
    pub fn new(
        body: impl Into<Vec<u8>>,
        routing_key: impl Into<String>,
        delivery_tag: u64,
        handle: Arc<dyn Acknowledge>,
    ) -> Self {
        Self {
            body: body.into(),
            routing_key: routing_key.into(),
            delivery_tag,
            redelivered: false,
            handle,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.handle.ack().await
    }

    pub async fn reject(&self, requeue: bool) -> Result<()> {
        self.handle.reject(requeue).await
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Self {
            body: delivery.data,
            routing_key: delivery.routing_key.as_str().to_string(),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            handle: Arc::new(delivery.acker),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("body", &String::from_utf8_lossy(&self.body))
            .field("routing_key", &self.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}
