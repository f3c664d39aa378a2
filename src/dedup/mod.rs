//! TTL-bounded "seen" set backed by Redis.
//!
//! Every key is written as `<prefix><key>` with a per-key expiry. Expiry
//! is left entirely to the store; this type never sweeps.

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::{debug, info};

/// Distributed record of URLs already claimed by some worker.
#[async_trait]
pub trait SeenSet: Send + Sync {
    /// True iff `key` is present and unexpired.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Claim `key`. Returns true only if this call inserted it.
    async fn add(&self, key: &str) -> Result<bool>;
}

/// Redis-backed [`SeenSet`] with a single process-wide TTL.
pub struct TtlHashSet {
    connection: MultiplexedConnection,
    prefix: String,
    ttl: Duration,
}

impl TtlHashSet {
    /// Open a connection to the store.
    ///
    /// `address` may be `host:port` or a full `redis://` URI.
    pub async fn connect(prefix: &str, address: &str, ttl: Duration) -> Result<Self> {
        if ttl.as_millis() == 0 {
            return Err(Error::Config("dedup TTL must be at least 1ms".to_string()));
        }

        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("redis://{address}")
        };

        let client = redis::Client::open(uri)
            .map_err(|e| Error::Connection(format!("invalid store address: {e}")))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to store: {e}")))?;

        info!(prefix, ttl_ms = ttl.as_millis() as u64, "connected to dedup store");

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            ttl,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Delete `key`. Returns whether it was present.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(self.key(key)).await?;
        record_operation("remove");
        Ok(removed > 0)
    }

    /// Remaining lifetime of `key`, or `None` if it is absent.
    pub async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.connection.clone();
        let millis: i64 = conn.pttl(self.key(key)).await?;
        record_operation("ttl");
        // -2: no such key. -1 would mean no expiry, which add() never writes.
        Ok(match millis {
            m if m >= 0 => Some(Duration::from_millis(m as u64)),
            -1 => Some(Duration::MAX),
            _ => None,
        })
    }

    /// Round-trip to the store.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Delete every key under this set's prefix. Returns how many went.
    ///
    /// Uses `KEYS`, so keep it to maintenance and test teardown.
    pub async fn purge(&self) -> Result<usize> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn.keys(format!("{}*", self.prefix)).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: i64 = conn.del(&keys).await?;
        record_operation("purge");
        info!(prefix = %self.prefix, removed, "purged dedup keys");
        Ok(removed as usize)
    }

    /// Release the store connection.
    pub fn close(self) -> Result<()> {
        debug!(prefix = %self.prefix, "dedup store connection closed");
        drop(self.connection);
        Ok(())
    }
}

#[async_trait]
impl SeenSet for TtlHashSet {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let present: bool = conn.exists(self.key(key)).await?;
        record_operation("exists");
        Ok(present)
    }

    async fn add(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        // SET NX PX is the store's atomic insert-if-absent; no local check.
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        record_operation("add");
        Ok(reply.is_some())
    }
}

fn record_operation(operation: &'static str) {
    metrics::dedup_operations().add(1, &[KeyValue::new("operation", operation)]);
}
