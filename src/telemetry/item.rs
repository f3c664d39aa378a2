//! Work item span helpers.

use tracing::Span;

/// Start a span covering one work item in one stage.
///
/// The `crawl.outcome` field is declared empty and filled by
/// [`record_outcome`].
pub fn start_item_span(stage: &'static str, url: &str, delivery_tag: u64) -> Span {
    tracing::info_span!(
        "crawl.item",
        "crawl.stage" = stage,
        "crawl.url" = url,
        "amqp.delivery_tag" = delivery_tag,
        "crawl.outcome" = tracing::field::Empty,
    )
}

/// Record how the item left the stage.
pub fn record_outcome(span: &Span, outcome: &'static str) {
    span.record("crawl.outcome", outcome);
}
