//! # Route Caching Provider
//!
//! The routing engine's view of the route cache. Combines the configured
//! [`StrategyRegistry`] (which amounts are cacheable, and in which mode) with a
//! [`KeyValueCache`] of [`CachedRoutes`] and applies block-based freshness on read.
//!
//! `CacheMode` values other than `Disabled` are not interpreted here; they are returned to the
//! caller, which decides whether a cached route is served (`Livemode`) or only compared.

use log::{debug, info};
use std::sync::Arc;

use crate::cache_key::CacheKey;
use crate::metrics::ROUTE_CACHE_STALE;
use crate::remote_cache::KeyValueCache;
use crate::routes::{CachedRoutes, Protocol};
use crate::strategy::{CacheMode, StrategyRegistry};
use crate::telemetry::TelemetrySink;
use crate::tokens::CurrencyAmount;

pub struct RouteCachingProvider {
    strategies: Arc<StrategyRegistry>,
    cache: Arc<dyn KeyValueCache<CacheKey, CachedRoutes>>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RouteCachingProvider {
    pub fn new(
        strategies: Arc<StrategyRegistry>,
        cache: Arc<dyn KeyValueCache<CacheKey, CachedRoutes>>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            strategies,
            cache,
            telemetry,
        }
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    /// Mode of the bucket `amount` falls into; `Disabled` when the key has no strategy or the
    /// amount is above every bucket.
    pub fn get_cache_mode(&self, key: &CacheKey, amount: &CurrencyAmount) -> CacheMode {
        match self.strategies.caching_bucket(key, amount) {
            Some(bucket) => bucket.cache_mode,
            None => CacheMode::Disabled,
        }
    }

    pub fn will_tapcompare(&self, key: &CacheKey) -> bool {
        self.strategies
            .strategy_for(key)
            .map(|strategy| strategy.will_tapcompare())
            .unwrap_or(false)
    }

    /// Cached routes for `key` that are still fresh at `current_block` and cover every
    /// requested protocol.
    pub async fn get_cached_route(
        &self,
        key: &CacheKey,
        amount: &CurrencyAmount,
        protocols: &[Protocol],
        current_block: u64,
    ) -> Option<CachedRoutes> {
        let mode = self.get_cache_mode(key, amount);
        if mode == CacheMode::Disabled {
            debug!("Caching disabled for {} at amount {}", key, amount);
            return None;
        }

        let cached = self.cache.get(key).await?;

        if !cached.is_fresh(current_block) {
            debug!(
                "Cached routes for {} expired at block {} (current {})",
                key,
                cached.expires_at_block(),
                current_block
            );
            self.telemetry.count(ROUTE_CACHE_STALE, 1, &[("cache", "cached_routes")]);
            return None;
        }

        if !cached.covers(protocols) {
            debug!(
                "Cached routes for {} cover {:?}, request needs {:?}",
                key, cached.protocols_covered, protocols
            );
            return None;
        }

        debug!(
            "Serving {} cached routes for {} from block {} ({})",
            cached.routes.len(),
            key,
            cached.block_number,
            mode
        );
        Some(cached)
    }

    /// Stores freshly computed routes under `key` at `routes.block_number`. Returns `false`
    /// without writing when `amount` is not cacheable.
    pub async fn set_cached_route(
        &self,
        key: &CacheKey,
        routes: &CachedRoutes,
        amount: &CurrencyAmount,
    ) -> bool {
        let Some(bucket) = self.strategies.caching_bucket(key, amount) else {
            debug!("No caching bucket for {} at amount {}, not caching", key, amount);
            return false;
        };
        if bucket.cache_mode == CacheMode::Disabled {
            debug!("Bucket {} of {} is disabled, not caching", bucket.bucket, key);
            return false;
        }

        let stored = self.cache.set(key, routes).await;
        if stored {
            info!(
                "Cached {} routes for {} at block {} (bucket {}, {})",
                routes.routes.len(),
                key,
                routes.block_number,
                bucket.bucket,
                bucket.cache_mode
            );
        }
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_cache::{InMemoryBackend, RemoteCacheConfig, RemoteCacheStore};
    use crate::routes::fixtures::{cached_routes, usdc};
    use crate::strategy::{CachedRoutesBucket, CachedRoutesStrategy};
    use crate::telemetry::RecordingSink;
    use crate::tokens::TradeType;
    use rust_decimal::Decimal;

    fn key() -> CacheKey {
        CacheKey::new("USDC", "WETH", TradeType::ExactIn, 1)
    }

    fn registry() -> StrategyRegistry {
        let strategy = CachedRoutesStrategy::new(
            "USDC/WETH",
            TradeType::ExactIn,
            1,
            vec![
                CachedRoutesBucket::new(Decimal::new(100, 0), CacheMode::Livemode),
                CachedRoutesBucket::new(Decimal::new(1000, 0), CacheMode::Tapcompare),
                CachedRoutesBucket::new(Decimal::new(5000, 0), CacheMode::Disabled),
            ],
        )
        .unwrap();
        StrategyRegistry::new([(key(), strategy)])
    }

    fn usdc_amount(human: i64) -> CurrencyAmount {
        CurrencyAmount::from_human(usdc(), Decimal::new(human, 0)).unwrap()
    }

    fn provider(sink: &RecordingSink) -> RouteCachingProvider {
        let store: RemoteCacheStore<CacheKey, CachedRoutes> = RemoteCacheStore::new(
            Arc::new(InMemoryBackend::new()),
            RemoteCacheConfig::default(),
            Arc::new(sink.clone()),
        );
        RouteCachingProvider::new(Arc::new(registry()), Arc::new(store), Arc::new(sink.clone()))
    }

    #[test]
    fn test_cache_mode_follows_bucket() {
        let provider = provider(&RecordingSink::new());
        let other = CacheKey::new("DAI", "WETH", TradeType::ExactIn, 1);

        assert_eq!(provider.get_cache_mode(&key(), &usdc_amount(50)), CacheMode::Livemode);
        assert_eq!(provider.get_cache_mode(&key(), &usdc_amount(500)), CacheMode::Tapcompare);
        assert_eq!(provider.get_cache_mode(&key(), &usdc_amount(2000)), CacheMode::Disabled);
        assert_eq!(provider.get_cache_mode(&key(), &usdc_amount(9000)), CacheMode::Disabled);
        assert_eq!(provider.get_cache_mode(&other, &usdc_amount(50)), CacheMode::Disabled);
        assert!(provider.will_tapcompare(&key()));
        assert!(!provider.will_tapcompare(&other));
    }

    #[tokio::test]
    async fn test_set_then_get_within_freshness_window() {
        let provider = provider(&RecordingSink::new());
        let routes = cached_routes(100, 10);

        assert!(provider.set_cached_route(&key(), &routes, &usdc_amount(50)).await);

        let cached = provider
            .get_cached_route(&key(), &usdc_amount(50), &[Protocol::V3], 110)
            .await;
        assert_eq!(cached, Some(routes));
    }

    #[tokio::test]
    async fn test_stale_entry_is_a_miss() {
        let sink = RecordingSink::new();
        let provider = provider(&sink);
        provider.set_cached_route(&key(), &cached_routes(100, 10), &usdc_amount(50)).await;

        assert!(provider
            .get_cached_route(&key(), &usdc_amount(50), &[], 111)
            .await
            .is_none());
        assert_eq!(sink.counter_total(ROUTE_CACHE_STALE, &[]), 1);
    }

    #[tokio::test]
    async fn test_uncovered_protocol_is_a_miss() {
        let provider = provider(&RecordingSink::new());
        provider.set_cached_route(&key(), &cached_routes(100, 10), &usdc_amount(50)).await;

        assert!(provider
            .get_cached_route(&key(), &usdc_amount(50), &[Protocol::V3, Protocol::Mixed], 100)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_uncacheable_amounts_are_not_written() {
        let sink = RecordingSink::new();
        let provider = provider(&sink);

        let routes = cached_routes(100, 10);
        assert!(!provider.set_cached_route(&key(), &routes, &usdc_amount(9000)).await);
        assert!(!provider.set_cached_route(&key(), &routes, &usdc_amount(2000)).await);
        assert!(provider
            .get_cached_route(&key(), &usdc_amount(50), &[], 100)
            .await
            .is_none());
        assert_eq!(sink.counter_total(crate::metrics::ROUTE_CACHE_SET, &[]), 0);
    }

    #[tokio::test]
    async fn test_disabled_amount_skips_the_store() {
        let sink = RecordingSink::new();
        let provider = provider(&sink);
        provider.set_cached_route(&key(), &cached_routes(100, 10), &usdc_amount(50)).await;

        assert!(provider
            .get_cached_route(&key(), &usdc_amount(2000), &[], 100)
            .await
            .is_none());
        assert_eq!(sink.counter_total(crate::metrics::ROUTE_CACHE_GET, &[]), 0);
    }
}
