//! Work items: one broker delivery in typed form.
//!
//! An item is built once by the read stage and then only moved. Each
//! item is settled exactly once, by [`WorkItem::ack`] or
//! [`WorkItem::reject`], both of which consume it.

use crate::error::Result;
use crate::queue::Delivery;
use crate::scope::CrawlScope;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

/// Prefix of dedup keys derived from content rather than a URL.
pub const CONTENT_KEY_PREFIX: &str = "sha256:";

#[derive(Debug)]
pub struct WorkItem {
    /// Payload of the delivery, untouched.
    pub body: Vec<u8>,
    /// The URL this delivery stands for. `None` when the body is not a URL.
    pub source_url: Option<Url>,
    /// Host this worker is restricted to.
    pub host: String,
    /// In-scope URLs found so far, in document order.
    pub discovered_urls: Vec<String>,
    pub received_at: DateTime<Utc>,
    delivery: Delivery,
}

impl WorkItem {
    /// Wrap a delivery. Never fails: a body that is neither a URL nor
    /// HTML gives an item with no source URL and no discovered URLs.
    pub fn new(delivery: Delivery, scope: &CrawlScope) -> Self {
        let body = delivery.body.clone();
        let source_url = std::str::from_utf8(&body)
            .ok()
            .and_then(|s| Url::parse(s.trim()).ok());
        // A URL body names a page still to be fetched; anything else is
        // content and is scanned for links here.
        let discovered_urls = match (&source_url, scope.base_url()) {
            (None, Some(base)) => scope.extract_urls(&base, &body),
            _ => Vec::new(),
        };

        Self {
            body,
            source_url,
            host: scope.host().to_string(),
            discovered_urls,
            received_at: Utc::now(),
            delivery,
        }
    }

    /// Replace the discovered URLs with those found in fetched `content`.
    pub fn with_content(self, content: &[u8], scope: &CrawlScope) -> Self {
        let discovered_urls = match self.source_url.clone().or_else(|| scope.base_url()) {
            Some(base) => scope.extract_urls(&base, content),
            None => Vec::new(),
        };
        Self {
            discovered_urls,
            ..self
        }
    }

    /// Key under which this item is claimed in the dedup set.
    ///
    /// The parsed URL when there is one. Content bodies are keyed by their
    /// SHA-256 so the key stays bounded whatever the payload size.
    pub fn dedup_key(&self) -> String {
        match &self.source_url {
            Some(url) => url.to_string(),
            None => {
                let mut hasher = Sha256::new();
                hasher.update(&self.body);
                format!("{CONTENT_KEY_PREFIX}{}", hex::encode(hasher.finalize()))
            }
        }
    }

    /// Time since the delivery was read.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.received_at
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery.delivery_tag
    }

    pub fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    /// Acknowledge the originating delivery.
    pub async fn ack(self) -> Result<()> {
        self.delivery.ack().await
    }

    /// Reject the originating delivery.
    pub async fn reject(self, requeue: bool) -> Result<()> {
        self.delivery.reject(requeue).await
    }
}
