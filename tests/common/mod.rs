//! In-memory stand-ins for the broker, the dedup store and the web.
//!
//! Every fake writes to one shared [`Journal`] so tests can assert on the
//! order in which claims, acks and publishes happened.

#![allow(dead_code)]

use async_trait::async_trait;
use crawler_worker::dedup::SeenSet;
use crawler_worker::error::{Error, Result};
use crawler_worker::fetch::Fetcher;
use crawler_worker::queue::{Acknowledge, Delivery, Publisher};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Claim(String),
    Ack(u64),
    Reject { tag: u64, requeue: bool },
    Publish(Vec<u8>),
}

#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    pub fn published(&self) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Publish(body) => Some(body),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Dedup set
// ---------------------------------------------------------------------------

pub struct MemorySeenSet {
    keys: Mutex<HashSet<String>>,
    journal: Journal,
    failing: AtomicBool,
}

impl MemorySeenSet {
    pub fn new(journal: Journal) -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
            journal,
            failing: AtomicBool::new(false),
        }
    }

    pub fn preload(&self, key: &str) {
        self.keys.lock().unwrap().insert(key.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.lock().unwrap().contains(key)
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Store(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "store unreachable",
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl SeenSet for MemorySeenSet {
    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.contains(key))
    }

    async fn add(&self, key: &str) -> Result<bool> {
        self.check()?;
        let inserted = self.keys.lock().unwrap().insert(key.to_string());
        self.journal.push(Event::Claim(key.to_string()));
        Ok(inserted)
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

pub struct RecordingPublisher {
    journal: Journal,
    pub routing_keys: Mutex<Vec<(String, String)>>,
    refused: Mutex<HashSet<Vec<u8>>>,
}

impl RecordingPublisher {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            routing_keys: Mutex::new(Vec::new()),
            refused: Mutex::new(HashSet::new()),
        }
    }

    /// Fail every publish of exactly this body.
    pub fn refuse(&self, body: &str) {
        self.refused.lock().unwrap().insert(body.as_bytes().to_vec());
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, routing_key: &str, content_type: &str, body: &[u8]) -> Result<()> {
        if self.refused.lock().unwrap().contains(body) {
            return Err(Error::Publish("channel closed".to_string()));
        }
        self.routing_keys
            .lock()
            .unwrap()
            .push((routing_key.to_string(), content_type.to_string()));
        self.journal.push(Event::Publish(body.to_vec()));
        Ok(())
    }
}

struct RecordingAcker {
    tag: u64,
    journal: Journal,
    fail_ack: bool,
}

#[async_trait]
impl Acknowledge for RecordingAcker {
    async fn ack(&self) -> Result<()> {
        if self.fail_ack {
            return Err(Error::Acknowledge("channel closed".to_string()));
        }
        self.journal.push(Event::Ack(self.tag));
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<()> {
        self.journal.push(Event::Reject {
            tag: self.tag,
            requeue,
        });
        Ok(())
    }
}

/// A delivery whose settlement is written to `journal`.
pub fn delivery(body: &str, tag: u64, journal: &Journal) -> Delivery {
    recorded_delivery(body, tag, journal, false)
}

/// A delivery whose ack always fails, as after the channel has closed.
pub fn unackable_delivery(body: &str, tag: u64, journal: &Journal) -> Delivery {
    recorded_delivery(body, tag, journal, true)
}

fn recorded_delivery(body: &str, tag: u64, journal: &Journal, fail_ack: bool) -> Delivery {
    Delivery::new(
        body.as_bytes().to_vec(),
        "#",
        tag,
        Arc::new(RecordingAcker {
            tag,
            journal: journal.clone(),
            fail_ack,
        }),
    )
}

// ---------------------------------------------------------------------------
// Web
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, Vec<u8>>,
    failures: HashMap<String, bool>,
}

impl StaticFetcher {
    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.as_bytes().to_vec());
        self
    }

    pub fn failing(mut self, url: &str, retryable: bool) -> Self {
        self.failures.insert(url.to_string(), retryable);
        self
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        if let Some(&retryable) = self.failures.get(url.as_str()) {
            return Err(Error::Fetch {
                url: url.to_string(),
                status: Some(if retryable { 503 } else { 404 }),
                retryable,
            });
        }
        Ok(self.pages.get(url.as_str()).cloned().unwrap_or_default())
    }
}
