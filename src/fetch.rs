//! Page fetching.
//!
//! The workflow only sees the [`Fetcher`] trait; [`HttpFetcher`] is the
//! reqwest implementation used by the binary.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use url::Url;

pub const USER_AGENT: &str = concat!("crawler-worker/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url` and return the body of an HTML response.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| Error::Fetch {
                url: url.to_string(),
                status: e.status().map(|s| s.as_u16()),
                retryable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                status: Some(status.as_u16()),
                retryable: is_retryable(status),
            });
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/html"));
        if !is_html {
            // Nothing to extract from non-HTML resources.
            return Ok(Vec::new());
        }

        let body = response.bytes().await.map_err(|_| Error::Fetch {
            url: url.to_string(),
            status: Some(status.as_u16()),
            retryable: true,
        })?;
        Ok(body.to_vec())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
