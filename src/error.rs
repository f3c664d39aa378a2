//! Error types for crawler-worker.
//!
//! Broker and store failures are surfaced to the caller uninterpreted;
//! nothing in this crate retries internally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Broker or store unreachable, or its address is malformed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Exchange/queue declare, bind or qos rejected by the broker.
    #[error("topology error: {0}")]
    Topology(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("acknowledge error: {0}")]
    Acknowledge(String),

    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("fetch {url} failed (status {status:?}, retryable: {retryable})")]
    Fetch {
        url: String,
        status: Option<u16>,
        retryable: bool,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the broker should get another chance at the message that
    /// produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Fetch { retryable, .. } => *retryable,
            Error::Config(_) => false,
            _ => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
