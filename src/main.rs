//! Process entry point for the ingest agent core.
//!
//! Wires the config surface, rate limiter, stats tracker, engines, and the
//! handler registry together and brings the agent up. The concrete pub/sub
//! bus client and credential provider are out of scope for the core (§1):
//! this binary constructs everything the core needs, including a fully
//! populated [`HandlerRegistry`], then waits for a shutdown signal so a
//! deployment layer's `TaskSource`/`ResponsePublisher` implementation can be
//! linked in alongside it via `ingest_core::dispatch::run_forever`.

use std::collections::BTreeMap;
use std::sync::Arc;

use clap::Parser;
use ingest_core::cli::Args;
use ingest_core::config::AgentConfig;
use ingest_core::copy::{BundleCopyEngine, CopyEngine, SinkClient};
use ingest_core::delete::DeleteEngine;
use ingest_core::dispatch::{DefaultTaskHandler, HandlerRegistry, TaskHandler};
use ingest_core::identity::AgentIdentity;
use ingest_core::listing::ListEngine;
use ingest_core::rate::RateLimiter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const PRODUCT_USER_AGENT: &str = concat!("ingest-agent/", env!("CARGO_PKG_VERSION"));
const INTERNAL_USER_AGENT: &str = concat!("ingest-agent-internal/", env!("CARGO_PKG_VERSION"));

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags.
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let logical_cpus = std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1);
    let config = AgentConfig::from_args(&args, logical_cpus);
    let identity = AgentIdentity::current(None, None);
    info!(?identity, copy_concurrency = config.copy_concurrency, delete_concurrency = config.concurrent_delete_max, "ingest agent starting");

    let rate_limiter = Arc::new(RateLimiter::new(config.bandwidth_limit_bytes_per_sec));
    let stats = ingest_core::stats::spawn(None, None);
    let (_throughput_tracker, throughput) = ingest_core::rate::ThroughputTracker::spawn(None);

    let sink_base_url = std::env::var("SINK_BASE_URL").unwrap_or_else(|_| "https://sink.internal".to_string());
    let user_agent = config.user_agent(PRODUCT_USER_AGENT, INTERNAL_USER_AGENT);
    let sink = Arc::new(SinkClient::new(reqwest::Client::new(), sink_base_url, user_agent));

    let copy_engine = Arc::new(CopyEngine::new(sink.clone(), rate_limiter.clone(), config.copy_engine_config(), stats.clone(), throughput));
    let bundle_copy_engine = Arc::new(BundleCopyEngine::new(copy_engine.clone(), config.copy_concurrency));
    let delete_engine = Arc::new(DeleteEngine::new(sink.clone(), config.concurrent_delete_max));
    let list_engine = Arc::new(ListEngine::new(sink, config.list_engine_config()));

    let handler = Arc::new(DefaultTaskHandler::new(copy_engine, bundle_copy_engine, delete_engine, list_engine, env!("CARGO_PKG_VERSION")));
    let mut handlers: BTreeMap<u32, Arc<dyn TaskHandler>> = BTreeMap::new();
    handlers.insert(1, handler);
    let _registry = Arc::new(HandlerRegistry::new(handlers)?);
    let _ = &_throughput_tracker;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
        shutdown.cancel();
    });

    info!("ingest agent ready; waiting for shutdown (no bus transport wired into this binary)");
    cancel.cancelled().await;
    info!("ingest agent stopped");
    Ok(())
}
