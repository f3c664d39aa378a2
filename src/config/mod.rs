//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Broker and store addresses wrapped in secrecy::SecretString since
//! they usually carry credentials.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::time::Duration;

pub const DEFAULT_EXCHANGE: &str = "govuk_crawler_exchange";
pub const DEFAULT_QUEUE: &str = "govuk_crawler_queue";
pub const DEFAULT_REDIS_ADDRESS: &str = "127.0.0.1:6379";
pub const DEFAULT_KEY_PREFIX: &str = "govuk_mirror_crawler";
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug)]
pub struct Config {
    pub amqp_address: SecretString,
    pub exchange_name: String,
    pub queue_name: String,
    pub redis_address: SecretString,
    pub key_prefix: String,
    pub ttl: Duration,
    /// Seed URLs. The host of the first one is the only host crawled.
    pub root_urls: Vec<url::Url>,
    /// Path prefixes that are never published.
    pub blacklist_paths: Vec<String>,
    pub channel_capacity: usize,
    pub prefetch_count: u16,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        let root_urls = parse_root_urls(&required_var("ROOT_URLS")?)?;

        let ttl = match optional_var("TTL_EXPIRE_TIME") {
            Some(raw) => parse_duration(&raw)?,
            None => DEFAULT_TTL,
        };

        Ok(Self {
            amqp_address: SecretString::from(required_var("AMQP_ADDRESS")?),
            exchange_name: optional_var("AMQP_EXCHANGE")
                .unwrap_or_else(|| DEFAULT_EXCHANGE.to_string()),
            queue_name: optional_var("AMQP_QUEUE").unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            redis_address: SecretString::from(
                optional_var("REDIS_ADDRESS").unwrap_or_else(|| DEFAULT_REDIS_ADDRESS.to_string()),
            ),
            key_prefix: optional_var("REDIS_KEY_PREFIX")
                .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            ttl,
            root_urls,
            blacklist_paths: optional_var("BLACKLIST_PATHS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            channel_capacity: parse_number("CHANNEL_CAPACITY", 64)?,
            prefetch_count: parse_number("PREFETCH_COUNT", 32)?,
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// The host this worker restricts itself to.
    pub fn crawl_host(&self) -> &str {
        self.root_urls
            .first()
            .and_then(|url| url.host_str())
            .unwrap_or_default()
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{name} must be a number, got {raw:?}"))),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_root_urls(raw: &str) -> Result<Vec<url::Url>> {
    let urls = split_list(raw)
        .iter()
        .map(|s| {
            let parsed = url::Url::parse(s)
                .map_err(|e| Error::Config(format!("invalid root URL {s:?}: {e}")))?;
            if parsed.host_str().is_none() {
                return Err(Error::Config(format!("root URL {s:?} has no host")));
            }
            Ok(parsed)
        })
        .collect::<Result<Vec<_>>>()?;

    if urls.is_empty() {
        return Err(Error::Config("ROOT_URLS contains no URLs".to_string()));
    }
    Ok(urls)
}

/// Parse a duration like `500ms`, `30s`, `15m`, `12h`, `7d`. A bare number
/// is seconds. Zero is rejected: entries must expire.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(raw.len());
    let (digits, unit) = raw.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration {raw:?}")))?;

    let scale = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| Error::Config(format!("duration {raw:?} out of range")))
    };

    let duration = match unit.trim() {
        "ms" => Duration::from_millis(value),
        "" | "s" => Duration::from_secs(value),
        "m" => scale(60)?,
        "h" => scale(60 * 60)?,
        "d" => scale(60 * 60 * 24)?,
        other => {
            return Err(Error::Config(format!(
                "unknown duration unit {other:?} in {raw:?}"
            )));
        }
    };

    if duration.is_zero() {
        return Err(Error::Config(format!("duration {raw:?} must be non-zero")));
    }
    Ok(duration)
}
