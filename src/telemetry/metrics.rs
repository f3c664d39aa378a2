//! Metric instrument factories for crawler-worker.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("crawler-worker")
}

/// Counter: deliveries turned into work items.
pub fn deliveries_read() -> Counter<u64> {
    meter()
        .u64_counter("crawler.deliveries.read")
        .with_description("Number of broker deliveries converted to work items")
        .build()
}

/// Counter: discovered URLs handed to the publish stage.
/// Labels: `result` ("published" | "duplicate" | "error").
pub fn urls_published() -> Counter<u64> {
    meter()
        .u64_counter("crawler.urls.published")
        .with_description("Discovered URLs by publish decision")
        .build()
}

/// Counter: work items settled by the acknowledge or crawl stages.
/// Labels: `result` ("acked" | "already_claimed" | "rejected" | "error").
pub fn items_settled() -> Counter<u64> {
    meter()
        .u64_counter("crawler.items.settled")
        .with_description("Work items acknowledged or rejected")
        .build()
}

/// Counter: broker operations.
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("crawler.queue.operations")
        .with_description("Number of broker operations")
        .build()
}

/// Counter: dedup store operations.
/// Labels: `operation`.
pub fn dedup_operations() -> Counter<u64> {
    meter()
        .u64_counter("crawler.dedup.operations")
        .with_description("Number of dedup store operations")
        .build()
}

/// Histogram: stage operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("crawler.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
