//! Crawl pipeline: read, crawl, extract, publish, acknowledge.
//!
//! Each stage is its own task. Stages share nothing but bounded
//! channels, so a slow stage backs up everything upstream of it, down to
//! the broker consumer.

pub mod stages;

pub use stages::{
    URL_CONTENT_TYPE, acknowledge_items, crawl_items, extract_urls, publish_urls, read_from_queue,
    seed_urls,
};

use crate::dedup::SeenSet;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::queue::{Delivery, Publisher};
use crate::scope::CrawlScope;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info};

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Capacity of every inter-stage channel.
    pub channel_capacity: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
        }
    }
}

/// Wires the stages together around injected collaborators.
pub struct Workflow {
    seen: Arc<dyn SeenSet>,
    publisher: Arc<dyn Publisher>,
    fetcher: Arc<dyn Fetcher>,
    scope: CrawlScope,
    config: WorkflowConfig,
    shutdown: Arc<Notify>,
}

impl Clone for Workflow {
    fn clone(&self) -> Self {
        Self {
            seen: Arc::clone(&self.seen),
            publisher: Arc::clone(&self.publisher),
            fetcher: Arc::clone(&self.fetcher),
            scope: self.scope.clone(),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Workflow {
    pub fn new(
        seen: Arc<dyn SeenSet>,
        publisher: Arc<dyn Publisher>,
        fetcher: Arc<dyn Fetcher>,
        scope: CrawlScope,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            seen,
            publisher,
            fetcher,
            scope,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Stop reading new deliveries. Items already read run to completion.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run every stage until the delivery stream ends or shutdown is
    /// signalled, then wait for in-flight items to drain.
    ///
    /// Returns the read stage's error if the delivery stream broke.
    pub async fn run<D>(&self, deliveries: D) -> Result<()>
    where
        D: Stream<Item = Result<Delivery>> + Send + 'static,
    {
        let capacity = self.config.channel_capacity.max(1);
        let (items_tx, items_rx) = mpsc::channel(capacity);
        let (crawled_tx, crawled_rx) = mpsc::channel(capacity);
        let (urls_tx, urls_rx) = mpsc::channel(capacity);
        let (acks_tx, acks_rx) = mpsc::channel(capacity);

        let shutdown = Arc::clone(&self.shutdown);
        let deliveries = Box::pin(deliveries.take_until(async move { shutdown.notified().await }));

        let mut tasks: JoinSet<(&'static str, Result<()>)> = JoinSet::new();

        let scope = self.scope.clone();
        tasks.spawn(async move {
            ("read", read_from_queue(deliveries, scope, items_tx).await)
        });

        let fetcher = Arc::clone(&self.fetcher);
        let scope = self.scope.clone();
        tasks.spawn(async move {
            crawl_items(items_rx, fetcher, scope, crawled_tx).await;
            ("crawl", Ok(()))
        });

        tasks.spawn(async move {
            extract_urls(crawled_rx, urls_tx, acks_tx).await;
            ("extract", Ok(()))
        });

        let seen = Arc::clone(&self.seen);
        let publisher = Arc::clone(&self.publisher);
        tasks.spawn(async move {
            publish_urls(seen, publisher, urls_rx).await;
            ("publish", Ok(()))
        });

        let seen = Arc::clone(&self.seen);
        tasks.spawn(async move {
            acknowledge_items(acks_rx, seen).await;
            ("acknowledge", Ok(()))
        });

        info!(capacity, host = %self.scope.host(), "workflow started");

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((stage, Err(e))) => {
                    error!(stage, error = %e, "stage failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "stage task panicked");
                    first_error.get_or_insert(Error::Other(format!("stage task failed: {e}")));
                }
            }
        }

        info!("workflow stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
