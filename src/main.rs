use anyhow::{Context, Result, bail};
use clap::Parser;
use grid_workqueue::api;
use grid_workqueue::config::QueueConfig;
use grid_workqueue::queue::driver::QueueDriver;
use grid_workqueue::queue::engine::WorkQueue;
use grid_workqueue::services::{
    CatalogLocator, InMemoryAccounting, InMemoryTracker, Services, SiteCapacity, StaticResources,
};
use grid_workqueue::spec::resolver::FileSpecResolver;
use grid_workqueue::sync::http::HttpParent;
use grid_workqueue::sync::parent::ParentQueue;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "workqueue-node", about = "Run one node of a hierarchical work queue")]
struct Args {
    /// Address the HTTP API listens on.
    #[arg(long, env = "WORKQUEUE_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// URL other queues use to reach this node. Defaults to http://<bind>.
    #[arg(long, env = "WORKQUEUE_URL")]
    url: Option<String>,

    /// Parent queue to pull work from. Without one this node is a global queue.
    #[arg(long, env = "WORKQUEUE_PARENT")]
    parent: Option<String>,

    /// JSON catalog of datasets, blocks and their locations.
    #[arg(long, env = "WORKQUEUE_CATALOG")]
    catalog: Option<String>,

    /// Free job slots per site, e.g. `--site T1_A=100`.
    #[arg(long = "site", value_parser = parse_site)]
    sites: Vec<(String, u64)>,

    /// Teams this queue serves. Empty means work of any team.
    #[arg(long = "team")]
    teams: Vec<String>,

    /// Start in drain mode: finish local work, acquire nothing new.
    #[arg(long)]
    drain: bool,

    /// Seconds an inbox entry may stay Negotiating before it fails.
    #[arg(long, default_value_t = 24 * 60 * 60)]
    retry_secs: u64,

    #[arg(long, default_value_t = 5000)]
    poll_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    cleanup_ms: u64,
}

fn parse_site(raw: &str) -> Result<(String, u64)> {
    let Some((site, slots)) = raw.split_once('=') else {
        bail!("expected SITE=SLOTS, got '{}'", raw);
    };
    let slots = slots
        .parse()
        .with_context(|| format!("invalid slot count in '{}'", raw))?;
    Ok((site.to_string(), slots))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = QueueConfig {
        queue_url: args.url.unwrap_or_else(|| format!("http://{}", args.bind)),
        retry_window: Duration::from_secs(args.retry_secs),
        poll_interval: Duration::from_millis(args.poll_ms),
        cleanup_interval: Duration::from_millis(args.cleanup_ms),
        teams: args.teams,
        drain_mode: args.drain,
        ..Default::default()
    };

    // 1. Collaborators:
    let locator = match &args.catalog {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read catalog {}", path))?;
            CatalogLocator::from_json(&raw)?
        }
        None => {
            tracing::warn!("No catalog given, data-driven requests will not split");
            CatalogLocator::new()
        }
    };
    let capacity: SiteCapacity = args.sites.into_iter().collect();
    tracing::info!("Site capacity: {:?}", capacity);

    let mut services = Services::new(
        Arc::new(FileSpecResolver::new(config.spec_cache_capacity)),
        Arc::new(locator),
        Arc::new(StaticResources::new(capacity)),
    );

    // 2. Parent link:
    let parent: Option<Arc<dyn ParentQueue>> = match &args.parent {
        Some(url) => {
            services = services
                .with_tracker(Arc::new(InMemoryTracker::new()))
                .with_accounting(Arc::new(InMemoryAccounting::new()));
            let http = HttpParent::new(url, config.http_timeout, config.http_attempts);
            tracing::info!("Parent queue: {}", url);
            Some(Arc::new(http) as Arc<dyn ParentQueue>)
        }
        None => None,
    };

    // 3. Queue and background loops:
    let queue = WorkQueue::new(config, services, parent);
    QueueDriver::new(queue.clone()).start().await;

    // 4. HTTP server:
    let app = api::router(queue);
    tracing::info!("HTTP server listening on {}", args.bind);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
