//! Integration tests for the cached quote path
//!
//! Tests cover:
//! - Miss → live computation → write-back → cache hit
//! - Block-based freshness independent of the store TTL
//! - Uncacheable amounts
//! - Batch reads over configured strategies
//!
//! Redis-backed variants live behind the `redis` feature and are ignored by default.

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use itertools::Itertools;
use route_cache_sdk::block_number_cache::{BlockNumberCache, BlockNumberSource};
use route_cache_sdk::cache_key::CacheKey;
use route_cache_sdk::metrics::{QUOTE_SOURCE, ROUTE_CACHE_GET, ROUTE_CACHE_STALE};
use route_cache_sdk::pools::{FeeAmount, V3Pool};
use route_cache_sdk::quote::{QuoteRequest, QuoteService, QuoteSource, RouteComputer};
use route_cache_sdk::remote_cache::{
    CacheBackend, InMemoryBackend, KeyValueCache, RemoteCacheConfig, RemoteCacheStore,
};
use route_cache_sdk::route_caching_provider::RouteCachingProvider;
use route_cache_sdk::routes::{CachedRoute, CachedRoutes, Protocol, RoutePool, SwapRoute};
use route_cache_sdk::settings::Settings;
use route_cache_sdk::strategy::{
    CacheMode, CachedRoutesBucket, CachedRoutesStrategy, StrategyRegistry,
};
use route_cache_sdk::telemetry::RecordingSink;
use route_cache_sdk::tokens::{CurrencyAmount, Token, TradeType};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BLOCKS_TO_LIVE: u64 = 10;

fn usdc() -> Token {
    let address = Address::from_str("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48").unwrap();
    Token::new(1, address, 6, Some("USDC"))
}

fn weth() -> Token {
    let address = Address::from_str("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2").unwrap();
    Token::new(1, address, 18, Some("WETH"))
}

const USDC_WETH_PARTITION: &str =
    "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48-0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2-ExactIn-1";

fn usdc_weth_key() -> CacheKey {
    CacheKey::for_tokens(&usdc(), &weth(), TradeType::ExactIn)
}

/// Chain head that tests can move.
struct ManualHead(AtomicU64);

#[async_trait]
impl BlockNumberSource for ManualHead {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// Routing engine stand-in: one direct V3 route, computed at the requested block.
struct CountingComputer {
    calls: AtomicUsize,
}

#[async_trait]
impl RouteComputer for CountingComputer {
    async fn compute_routes(
        &self,
        request: &QuoteRequest,
        block_number: u64,
    ) -> Result<CachedRoutes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pool = V3Pool {
            address: Address::from_str("0x88e6A0c2dDD26FEEb64F039a2c41296fcB3f5640").unwrap(),
            token0: usdc(),
            token1: weth(),
            fee: FeeAmount::Low,
            sqrt_price_x96: U256::from(1_795_414_796_864_312_374_393_862_470_305_939u128),
            liquidity: U256::from(19_433_813_283_640_223_870u128),
            tick: 198_000,
        };
        Ok(CachedRoutes {
            routes: vec![CachedRoute {
                route: SwapRoute {
                    protocol: Protocol::V3,
                    path: vec![usdc(), weth()],
                    pools: vec![RoutePool::V3(pool)],
                },
                percent: 100,
            }],
            chain_id: 1,
            token_in: usdc(),
            token_out: weth(),
            protocols_covered: [Protocol::V3].into_iter().collect(),
            block_number,
            trade_type: TradeType::ExactIn,
            original_amount: request.amount.raw.to_string(),
            blocks_to_live: BLOCKS_TO_LIVE,
        })
    }
}

struct Harness {
    service: QuoteService,
    backend: Arc<InMemoryBackend>,
    head: Arc<ManualHead>,
    computer: Arc<CountingComputer>,
    sink: RecordingSink,
}

fn harness(start_block: u64) -> Harness {
    let strategy = CachedRoutesStrategy::new(
        "USDC/WETH",
        TradeType::ExactIn,
        1,
        vec![
            CachedRoutesBucket::new(Decimal::new(100, 0), CacheMode::Livemode),
            CachedRoutesBucket::new(Decimal::new(1000, 0), CacheMode::Tapcompare),
        ],
    )
    .unwrap();
    harness_with(StrategyRegistry::new([(usdc_weth_key(), strategy)]), start_block)
}

fn harness_with(registry: StrategyRegistry, start_block: u64) -> Harness {
    let registry = Arc::new(registry);
    let sink = RecordingSink::new();
    let backend = Arc::new(InMemoryBackend::new());
    let store: RemoteCacheStore<CacheKey, CachedRoutes> = RemoteCacheStore::new(
        backend.clone(),
        RemoteCacheConfig::default(),
        Arc::new(sink.clone()),
    );
    let caching = Arc::new(RouteCachingProvider::new(
        registry,
        Arc::new(store),
        Arc::new(sink.clone()),
    ));

    let head = Arc::new(ManualHead(AtomicU64::new(start_block)));
    // Zero interval: every quote sees the head the test set
    let blocks = Arc::new(BlockNumberCache::new(head.clone(), Duration::ZERO));
    let computer = Arc::new(CountingComputer {
        calls: AtomicUsize::new(0),
    });

    Harness {
        service: QuoteService::new(caching, computer.clone(), blocks, Arc::new(sink.clone())),
        backend,
        head,
        computer,
        sink,
    }
}

fn request(human_amount: i64) -> QuoteRequest {
    QuoteRequest::for_tokens(
        &usdc(),
        &weth(),
        TradeType::ExactIn,
        CurrencyAmount::from_human(usdc(), Decimal::new(human_amount, 0)).unwrap(),
        vec![Protocol::V3],
    )
}

/// A miss computes live and writes back; the identical second request is a cache hit
#[tokio::test]
async fn test_second_identical_request_is_served_from_cache() {
    let h = harness(19_000_000);

    let first = h.service.quote(&request(50)).await.unwrap();
    assert_eq!(first.source, QuoteSource::Live);
    assert_eq!(first.cache_mode, CacheMode::Livemode, "50 USDC falls in the 100 bucket");
    assert_eq!(h.computer.calls.load(Ordering::SeqCst), 1);

    let stored = h.backend.latest(USDC_WETH_PARTITION).await.unwrap().expect("write-back");
    assert_eq!(stored.block_number, 19_000_000);

    let second = h.service.quote(&request(50)).await.unwrap();
    assert_eq!(second.source, QuoteSource::Cache);
    assert_eq!(second.routes, first.routes);
    assert_eq!(h.computer.calls.load(Ordering::SeqCst), 1, "no live computation on a hit");

    assert_eq!(h.sink.counter_total(QUOTE_SOURCE, &[("source", "cache")]), 1);
    assert_eq!(h.sink.counter_total(QUOTE_SOURCE, &[("source", "live")]), 1);
}

/// Entries are served up to block + blocks_to_live and recomputed after
#[tokio::test]
async fn test_freshness_window_is_inclusive() {
    let h = harness(100);
    h.service.quote(&request(50)).await.unwrap();

    h.head.0.store(100 + BLOCKS_TO_LIVE, Ordering::SeqCst);
    let at_boundary = h.service.quote(&request(50)).await.unwrap();
    assert_eq!(at_boundary.source, QuoteSource::Cache);

    h.head.0.store(100 + BLOCKS_TO_LIVE + 1, Ordering::SeqCst);
    let past_boundary = h.service.quote(&request(50)).await.unwrap();
    assert_eq!(past_boundary.source, QuoteSource::Live);
    assert_eq!(past_boundary.routes.block_number, 111);
    assert_eq!(h.sink.counter_total(ROUTE_CACHE_STALE, &[]), 1);

    // the recomputed entry replaced the stale one
    let again = h.service.quote(&request(50)).await.unwrap();
    assert_eq!(again.source, QuoteSource::Cache);
    assert_eq!(h.computer.calls.load(Ordering::SeqCst), 2);
}

/// The shipped configuration caches requests keyed by token addresses
#[tokio::test]
async fn test_shipped_config_caches_token_keyed_requests() {
    let config_path = concat!(env!("CARGO_MANIFEST_DIR"), "/Config.toml");
    let settings = Settings::from_path(config_path).unwrap();
    let h = harness_with(settings.build_strategies().unwrap(), 19_000_000);

    let first = h.service.quote(&request(50)).await.unwrap();
    assert_eq!(first.cache_mode, CacheMode::Livemode);
    assert_eq!(first.routes.cache_key(), usdc_weth_key());

    let second = h.service.quote(&request(50)).await.unwrap();
    assert_eq!(second.source, QuoteSource::Cache);
    assert!(h.backend.latest(USDC_WETH_PARTITION).await.unwrap().is_some());
}

/// Amounts above every bucket are never cached
#[tokio::test]
async fn test_amount_above_largest_bucket_is_not_cached() {
    let h = harness(500);

    let first = h.service.quote(&request(1001)).await.unwrap();
    let second = h.service.quote(&request(1001)).await.unwrap();

    assert_eq!(first.cache_mode, CacheMode::Disabled);
    assert_eq!(second.source, QuoteSource::Live);
    assert!(h.backend.is_empty());
    assert_eq!(h.sink.counter_total(ROUTE_CACHE_GET, &[]), 0);
}

/// Entries written for one bucket are shared by every amount of the same key
#[tokio::test]
async fn test_cached_entry_is_per_key_not_per_amount() {
    let h = harness(500);
    h.service.quote(&request(80)).await.unwrap();

    let other_amount = h.service.quote(&request(20)).await.unwrap();
    assert_eq!(other_amount.source, QuoteSource::Cache);
}

/// batch_get resolves every configured strategy key, hits and misses alike
#[tokio::test]
async fn test_batch_get_over_strategy_keys() {
    let sink = RecordingSink::new();
    let backend = Arc::new(InMemoryBackend::new());
    let store: RemoteCacheStore<CacheKey, CachedRoutes> =
        RemoteCacheStore::new(backend, RemoteCacheConfig::default(), Arc::new(sink.clone()));

    let computer = CountingComputer {
        calls: AtomicUsize::new(0),
    };
    let routes = computer.compute_routes(&request(50), 42).await.unwrap();
    assert!(store.set(&usdc_weth_key(), &routes).await);

    let keys: HashSet<CacheKey> = [
        usdc_weth_key(),
        CacheKey::for_tokens(&usdc(), &weth(), TradeType::ExactOut),
        CacheKey::new(usdc().cache_id(), weth().cache_id(), TradeType::ExactIn, 42161),
    ]
    .into_iter()
    .collect();
    let entries = store.batch_get(&keys).await;

    let hits: Vec<String> = entries
        .iter()
        .filter(|(_, v)| v.is_some())
        .map(|(k, _)| k.to_string())
        .sorted()
        .collect();
    assert_eq!(entries.len(), 3);
    assert_eq!(hits, vec![USDC_WETH_PARTITION.to_string()]);
}

#[cfg(feature = "redis")]
mod redis_backed {
    use super::*;
    use route_cache_sdk::remote_cache::redis_backend::{RedisBackend, RedisBackendConfig};

    /// Same round trip as the in-memory store, against a live Redis
    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_redis_store_round_trip() {
        let config = RedisBackendConfig {
            key_prefix: format!("route_cache_it_{}", chrono::Utc::now().timestamp_millis()),
            ..RedisBackendConfig::default()
        };
        let backend = Arc::new(RedisBackend::new(config).await.unwrap());
        let store: RemoteCacheStore<CacheKey, CachedRoutes> = RemoteCacheStore::new(
            backend,
            RemoteCacheConfig::default(),
            Arc::new(RecordingSink::new()),
        );

        let computer = CountingComputer {
            calls: AtomicUsize::new(0),
        };
        let routes = computer.compute_routes(&request(50), 7).await.unwrap();
        assert!(store.set(&usdc_weth_key(), &routes).await);
        assert_eq!(store.get(&usdc_weth_key()).await, Some(routes));
        assert!(store.has(&usdc_weth_key()).await);
    }
}
