//! Which URLs this worker may follow.
//!
//! A [`CrawlScope`] pins the worker to a single host and excludes any
//! path under a blacklisted prefix. Link extraction resolves every
//! reference in a page against the page's own URL before filtering.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Attributes that reference other resources on a page.
const LINK_SELECTORS: &[(&str, &str)] = &[
    ("a[href]", "href"),
    ("link[href]", "href"),
    ("img[src]", "src"),
    ("script[src]", "src"),
];

#[derive(Debug, Clone)]
pub struct CrawlScope {
    host: String,
    blacklist: Vec<String>,
}

impl CrawlScope {
    pub fn new(host: impl Into<String>, blacklist: Vec<String>) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            blacklist,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Root of the crawl host. Relative links in content that arrived
    /// without a page URL resolve against this.
    pub fn base_url(&self) -> Option<Url> {
        Url::parse(&format!("https://{}/", self.host)).ok()
    }

    /// Whether `url` is on the crawl host and not under a blacklisted path.
    pub fn allows(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        if url.host_str().map(str::to_ascii_lowercase).as_deref() != Some(self.host.as_str()) {
            return false;
        }
        let path = url.path();
        !self.blacklist.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Extract every in-scope link from `content`, resolved against `base`.
    ///
    /// Order follows the document; repeats are dropped. Content that is
    /// not HTML simply yields nothing.
    pub fn extract_urls(&self, base: &Url, content: &[u8]) -> Vec<String> {
        let html = String::from_utf8_lossy(content);
        let document = Html::parse_document(&html);

        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for (selector, attr) in LINK_SELECTORS {
            let Ok(selector) = Selector::parse(selector) else {
                continue;
            };
            for element in document.select(&selector) {
                let Some(reference) = element.value().attr(attr) else {
                    continue;
                };
                let Some(url) = self.resolve(base, reference) else {
                    continue;
                };
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }

        urls
    }

    fn resolve(&self, base: &Url, reference: &str) -> Option<String> {
        let reference = reference.trim();
        if reference.is_empty() || reference.starts_with('#') {
            return None;
        }
        let mut url = base.join(reference).ok()?;
        url.set_fragment(None);
        self.allows(&url).then(|| url.to_string())
    }
}
