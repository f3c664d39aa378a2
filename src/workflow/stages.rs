//! The pipeline stages. Each one drains a single input channel and stops
//! when that channel closes or, for the read stage, when the delivery
//! stream ends.

use crate::dedup::SeenSet;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::item::WorkItem;
use crate::queue::{Delivery, Publisher, WILDCARD_ROUTING_KEY};
use crate::scope::CrawlScope;
use crate::telemetry::item::{record_outcome, start_item_span};
use crate::telemetry::metrics;
use futures::{Stream, StreamExt};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, warn};
use url::Url;

/// Content type of a message whose body is a bare URL.
pub const URL_CONTENT_TYPE: &str = "text/plain";

/// Turn broker deliveries into work items.
///
/// No dedup check happens here. Returns an error only if the delivery
/// stream itself fails; returns `Ok` when the stream ends or the
/// downstream stage has gone away.
pub async fn read_from_queue<D>(
    mut deliveries: D,
    scope: CrawlScope,
    items: mpsc::Sender<WorkItem>,
) -> Result<()>
where
    D: Stream<Item = Result<Delivery>> + Unpin,
{
    while let Some(delivery) = deliveries.next().await {
        let item = WorkItem::new(delivery?, &scope);
        metrics::deliveries_read().add(1, &[]);
        debug!(
            delivery_tag = item.delivery_tag(),
            redelivered = item.redelivered(),
            url = %item.dedup_key(),
            "read work item"
        );
        if items.send(item).await.is_err() {
            // Unsettled deliveries go back to the queue when the channel closes.
            warn!("work item receiver dropped, stopping read stage");
            break;
        }
    }
    info!("read stage finished");
    Ok(())
}

/// Fetch each item's page and forward it with its discovered URLs.
///
/// Items without a URL pass through with the links found in their body.
/// A failed fetch rejects the delivery, requeued only if the failure looks
/// transient; a broker dead-letter exchange on the queue catches the rest.
pub async fn crawl_items(
    mut items: mpsc::Receiver<WorkItem>,
    fetcher: Arc<dyn Fetcher>,
    scope: CrawlScope,
    crawled: mpsc::Sender<WorkItem>,
) {
    while let Some(item) = items.recv().await {
        let Some(url) = item.source_url.clone() else {
            if crawled.send(item).await.is_err() {
                break;
            }
            continue;
        };

        let span = start_item_span("crawl", url.as_str(), item.delivery_tag());
        let next = async {
            let started = Instant::now();
            let fetched = fetcher.fetch(&url).await;
            metrics::operation_duration_ms().record(
                started.elapsed().as_secs_f64() * 1000.0,
                &[KeyValue::new("operation", "fetch")],
            );

            match fetched {
                Ok(body) => {
                    let item = item.with_content(&body, &scope);
                    debug!(discovered = item.discovered_urls.len(), "fetched page");
                    Some(item)
                }
                Err(e) => {
                    let requeue = e.is_retryable();
                    warn!(error = %e, requeue, "fetch failed, rejecting delivery");
                    settle(item.reject(requeue).await, "rejected");
                    None
                }
            }
        }
        .instrument(span.clone())
        .await;

        match next {
            Some(item) => {
                record_outcome(&span, "fetched");
                if crawled.send(item).await.is_err() {
                    break;
                }
            }
            None => record_outcome(&span, "rejected"),
        }
    }
    debug!("crawl stage finished");
}

/// Fan a crawled item out: its discovered URLs to the publish stage, then
/// the item itself to the acknowledge stage.
///
/// The two downstream stages run independently, so an item may be acked
/// before all of its URLs are published. A crash in that window loses
/// those links until another page leads to them again.
pub async fn extract_urls(
    mut items: mpsc::Receiver<WorkItem>,
    urls: mpsc::Sender<String>,
    acks: mpsc::Sender<WorkItem>,
) {
    while let Some(item) = items.recv().await {
        for url in &item.discovered_urls {
            if urls.send(url.clone()).await.is_err() {
                warn!("publish stage gone, stopping extract stage");
                return;
            }
        }
        if acks.send(item).await.is_err() {
            warn!("acknowledge stage gone, stopping extract stage");
            return;
        }
    }
    debug!("extract stage finished");
}

/// Publish every URL not already in the dedup set.
///
/// A URL found in the set is dropped silently. Errors from the store or
/// the broker drop that URL only; it will be found again when another
/// page links to it.
pub async fn publish_urls(
    seen: Arc<dyn SeenSet>,
    publisher: Arc<dyn Publisher>,
    mut urls: mpsc::Receiver<String>,
) {
    while let Some(url) = urls.recv().await {
        let result = match seen.exists(&url).await {
            Ok(true) => {
                debug!(%url, "already seen, not publishing");
                "duplicate"
            }
            Ok(false) => match publisher
                .publish(WILDCARD_ROUTING_KEY, URL_CONTENT_TYPE, url.as_bytes())
                .await
            {
                Ok(()) => {
                    debug!(%url, "published");
                    "published"
                }
                Err(e) => {
                    error!(%url, error = %e, "failed to publish URL");
                    "error"
                }
            },
            Err(e) => {
                error!(%url, error = %e, "dedup lookup failed, dropping URL");
                "error"
            }
        };
        metrics::urls_published().add(1, &[KeyValue::new("result", result)]);
    }
    debug!("publish stage finished");
}

/// Claim each finished item's URL in the dedup set, then acknowledge its
/// delivery. The ack is never sent before the claim has succeeded.
///
/// If the claim fails the delivery is rejected with requeue so the broker
/// hands it out again. If the ack fails after a claim, the claim stays.
pub async fn acknowledge_items(mut items: mpsc::Receiver<WorkItem>, seen: Arc<dyn SeenSet>) {
    while let Some(item) = items.recv().await {
        let key = item.dedup_key();
        let age_ms = item.age().num_milliseconds().max(0);
        let span = start_item_span("acknowledge", &key, item.delivery_tag());

        let outcome = async {
            let started = Instant::now();
            let claimed = seen.add(&key).await;
            metrics::operation_duration_ms().record(
                started.elapsed().as_secs_f64() * 1000.0,
                &[KeyValue::new("operation", "claim")],
            );

            match claimed {
                Ok(newly) => {
                    if !newly {
                        debug!("already claimed, acknowledging redelivery");
                    }
                    let label = if newly { "acked" } else { "already_claimed" };
                    settle(item.ack().await, label)
                }
                Err(e) => {
                    error!(error = %e, "claim failed, requeueing delivery");
                    settle(item.reject(true).await, "rejected")
                }
            }
        }
        .instrument(span.clone())
        .await;

        record_outcome(&span, outcome);
        metrics::operation_duration_ms().record(
            age_ms as f64,
            &[KeyValue::new("operation", "pipeline")],
        );
    }
    debug!("acknowledge stage finished");
}

/// Publish each seed URL that is not already in the dedup set.
///
/// Unlike the pipeline stages this stops at the first error, since it
/// runs once at startup.
pub async fn seed_urls(
    seen: &dyn SeenSet,
    publisher: &dyn Publisher,
    urls: &[Url],
) -> Result<usize> {
    let mut published = 0;
    for url in urls {
        let url = url.as_str();
        if seen.exists(url).await? {
            info!(%url, "seed already seen, skipping");
            continue;
        }
        publisher
            .publish(WILDCARD_ROUTING_KEY, URL_CONTENT_TYPE, url.as_bytes())
            .await?;
        info!(%url, "seeded");
        published += 1;
    }
    Ok(published)
}

fn settle(result: Result<()>, label: &'static str) -> &'static str {
    match result {
        Ok(()) => {
            metrics::items_settled().add(1, &[KeyValue::new("result", label)]);
            label
        }
        Err(e) => {
            error!(error = %e, "failed to settle delivery");
            metrics::items_settled().add(1, &[KeyValue::new("result", "error")]);
            "error"
        }
    }
}
