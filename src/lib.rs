//! # crawler-worker
//!
//! One node of a distributed crawl frontier. Consumes URLs from an AMQP
//! queue, skips anything already claimed in a TTL-bounded Redis set,
//! republishes newly discovered links to the same queue, and acknowledges
//! each delivery only after its URL has been claimed.

pub mod config;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod item;
pub mod queue;
pub mod scope;
pub mod telemetry;
pub mod workflow;
