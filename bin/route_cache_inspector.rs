//! # Route Cache Inspector
//!
//! Prints the configured caching strategies and, optionally, the latest cached routes stored
//! for each of them.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin route_cache_inspector -- --config Config.toml
//! cargo run --features redis --bin route_cache_inspector -- --lookup --block 19000000
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use route_cache_sdk::{
    block_number_cache::BlockNumberCache,
    cache_key::CacheKey,
    metrics,
    remote_cache::{CacheBackend, InMemoryBackend, KeyValueCache, RemoteCacheStore},
    routes::CachedRoutes,
    settings::{CacheBackendKind, Settings},
    strategy::{StrategyRegistry, UNBOUNDED_BUCKET},
    telemetry::MetricsSink,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "route_cache_inspector",
    about = "Inspect route caching strategies and cached entries"
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "Config.toml")]
    config: PathBuf,

    /// Also fetch the latest cached entry of every strategy
    #[arg(long)]
    lookup: bool,

    /// Block used to judge freshness; defaults to the head from `block_number.rpc_url`
    #[arg(long)]
    block: Option<u64>,

    /// Serve Prometheus metrics on this address while running
    #[cfg(feature = "observability")]
    #[arg(long)]
    metrics_addr: Option<std::net::SocketAddr>,
}

/// With `observability` the tracing subscriber also receives `log` records; otherwise
/// env_logger handles them.
fn init_logging(settings: &Settings) {
    #[cfg(feature = "observability")]
    {
        let level = settings
            .log
            .level
            .parse::<tracing::Level>()
            .unwrap_or(tracing::Level::INFO);
        let subscriber = tracing_subscriber::fmt().with_max_level(level);
        let result = if settings.log.json {
            subscriber.json().try_init()
        } else {
            subscriber.try_init()
        };
        match result {
            Ok(()) => return,
            Err(e) => {
                eprintln!("tracing subscriber not installed, falling back to env_logger: {}", e)
            }
        }
    }

    let env = env_logger::Env::default().default_filter_or(settings.log.level.as_str());
    let _ = env_logger::Builder::from_env(env).try_init();
}

#[cfg(feature = "observability")]
fn init_metrics(cli: &Cli) -> Result<()> {
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        log::info!("Prometheus exporter listening on {}", addr);
    }
    Ok(())
}

async fn build_backend(settings: &Settings) -> Result<Arc<dyn CacheBackend>> {
    match settings.cache.backend {
        CacheBackendKind::Memory => {
            log::warn!("cache.backend = \"memory\": the store starts empty in this process");
            Ok(Arc::new(InMemoryBackend::new()))
        }
        #[cfg(feature = "redis")]
        CacheBackendKind::Redis => {
            use route_cache_sdk::remote_cache::redis_backend::RedisBackend;

            let backend = RedisBackend::new(settings.cache.redis_backend_config()).await?;
            backend.health_check().await?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "redis"))]
        CacheBackendKind::Redis => {
            anyhow::bail!("cache.backend = \"redis\" requires the `redis` feature")
        }
    }
}

async fn resolve_block(cli: &Cli, settings: &Settings) -> Option<u64> {
    if cli.block.is_some() {
        return cli.block;
    }
    let rpc_url = settings.block_number.rpc_url.as_deref()?;
    let interval = settings.block_number.update_interval();
    let cache = match BlockNumberCache::from_rpc_url(rpc_url, interval) {
        Ok(cache) => cache,
        Err(e) => {
            log::warn!("{:#}", e);
            return None;
        }
    };
    match cache.get_current_block().await {
        Ok(block) => Some(block),
        Err(e) => {
            log::warn!("Could not resolve current block: {:#}", e);
            None
        }
    }
}

fn print_strategies(registry: &StrategyRegistry) {
    let mut strategies: Vec<_> = registry.iter().collect();
    strategies.sort_by(|a, b| a.0.cmp(b.0));

    for (key, strategy) in strategies {
        let tapcompare = if strategy.will_tapcompare() { "  tapcompare" } else { "" };
        println!("{}  [{}]{}", strategy, key, tapcompare);
        for (lower, upper) in strategy.bucket_pairs() {
            if upper == UNBOUNDED_BUCKET {
                println!("    ({}, ∞)  not cached", lower);
                continue;
            }
            let mode = strategy
                .bucket(upper)
                .map(|b| b.cache_mode.to_string())
                .unwrap_or_default();
            println!("    ({}, {}]  {}", lower, upper, mode);
        }
    }
}

fn print_entry(key: &CacheKey, entry: Option<&CachedRoutes>, block: Option<u64>) {
    let Some(routes) = entry else {
        println!("{}  (no entry)", key);
        return;
    };
    let freshness = match block {
        Some(block) if routes.is_fresh(block) => "fresh",
        Some(_) => "stale",
        None => "unknown",
    };
    println!(
        "{}  block {}  blocks_to_live {}  routes {}  protocols {:?}  {}",
        key,
        routes.block_number,
        routes.blocks_to_live,
        routes.routes.len(),
        routes.protocols_covered,
        freshness
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::from_path(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    init_logging(&settings);
    #[cfg(feature = "observability")]
    init_metrics(&cli)?;
    metrics::describe_metrics();

    let registry = settings.build_strategies()?;
    println!("{} caching strategies", registry.len());
    print_strategies(&registry);

    if !cli.lookup {
        return Ok(());
    }

    let backend = build_backend(&settings).await?;
    let store: RemoteCacheStore<CacheKey, CachedRoutes> = RemoteCacheStore::new(
        backend,
        settings.cache.remote_cache_config("cached_routes"),
        Arc::new(MetricsSink),
    );
    let block = resolve_block(&cli, &settings).await;

    let keys: HashSet<CacheKey> = registry.iter().map(|(key, _)| key.clone()).collect();
    let entries = store.batch_get(&keys).await;

    let mut keys: Vec<_> = keys.into_iter().collect();
    keys.sort();
    println!();
    for key in &keys {
        print_entry(key, entries.get(key).and_then(Option::as_ref), block);
    }

    Ok(())
}
