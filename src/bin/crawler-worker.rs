//! crawler-worker CLI: run the pipeline, seed URLs, or clear the dedup set.

use crawler_worker::config::Config;
use crawler_worker::config::secrets::{ExposeSecret, redact_secret};
use crawler_worker::dedup::TtlHashSet;
use crawler_worker::fetch::HttpFetcher;
use crawler_worker::queue::QueueManager;
use crawler_worker::scope::CrawlScope;
use crawler_worker::telemetry::{TelemetryConfig, init_telemetry};
use crawler_worker::workflow::{Workflow, WorkflowConfig, seed_urls};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "crawler-worker", about = "Crawl-frontier worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the root URLs and run the crawl pipeline until Ctrl-C
    Run {
        /// Per-request fetch timeout in seconds
        #[arg(long, default_value_t = 30)]
        fetch_timeout: u64,
    },
    /// Publish URLs that have not been seen yet
    Seed {
        /// URLs to publish
        #[arg(required = true)]
        urls: Vec<url::Url>,
    },
    /// Delete every dedup key under the configured prefix
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "crawler-worker".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Run { fetch_timeout } => cmd_run(&config, fetch_timeout).await,
        Command::Seed { urls } => cmd_seed(&config, &urls).await,
        Command::Purge => cmd_purge(&config).await,
    }
}

async fn connect_dedup(config: &Config) -> anyhow::Result<TtlHashSet> {
    info!(address = %redact_secret(&config.redis_address), "connecting to dedup store");
    let seen = TtlHashSet::connect(
        &config.key_prefix,
        config.redis_address.expose_secret(),
        config.ttl,
    )
    .await?;
    Ok(seen)
}

async fn connect_queue(config: &Config) -> anyhow::Result<QueueManager> {
    info!(address = %redact_secret(&config.amqp_address), "connecting to broker");
    let queue = QueueManager::connect(
        config.amqp_address.expose_secret(),
        &config.exchange_name,
        &config.queue_name,
    )
    .await?;
    Ok(queue)
}

async fn cmd_run(config: &Config, fetch_timeout: u64) -> anyhow::Result<()> {
    let seen = Arc::new(connect_dedup(config).await?);
    let queue = Arc::new(connect_queue(config).await?);
    queue.set_prefetch(config.prefetch_count).await?;

    let seeded = seed_urls(seen.as_ref(), queue.as_ref(), &config.root_urls).await?;
    info!(seeded, "root URLs seeded");

    let deliveries = queue.consume().await?;
    let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(fetch_timeout))?);
    let scope = CrawlScope::new(config.crawl_host(), config.blacklist_paths.clone());

    let workflow = Workflow::new(
        seen.clone(),
        queue.clone(),
        fetcher,
        scope,
        WorkflowConfig {
            channel_capacity: config.channel_capacity,
        },
    );

    let ctrl = workflow.clone();
    let signal = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown requested");
        ctrl.shutdown();
    });

    let result = workflow.run(deliveries).await;
    signal.abort();
    let _ = signal.await;
    drop(workflow);

    if let Err(e) = queue.close().await {
        warn!(error = %e, "error closing broker connection");
    }
    match Arc::try_unwrap(seen) {
        Ok(seen) => seen.close()?,
        Err(_) => warn!("dedup store still shared at shutdown, dropping connection"),
    }

    result?;
    Ok(())
}

async fn cmd_seed(config: &Config, urls: &[url::Url]) -> anyhow::Result<()> {
    let seen = connect_dedup(config).await?;
    let queue = connect_queue(config).await?;

    let published = seed_urls(&seen, &queue, urls).await?;
    println!("Published {published} of {} URL(s)", urls.len());

    queue.close().await?;
    seen.close()?;
    Ok(())
}

async fn cmd_purge(config: &Config) -> anyhow::Result<()> {
    let seen = connect_dedup(config).await?;
    let removed = seen.purge().await?;
    println!("Removed {removed} key(s) with prefix '{}'", seen.prefix());
    seen.close()?;
    Ok(())
}
