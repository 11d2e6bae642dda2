//! # Quote Service
//!
//! Request path of a quote: resolve the cache mode for the request amount, try the route cache,
//! fall through to the external routing engine on a miss, and write fresh results back.
//!
//! | Mode         | Served from          | Write-back |
//! |--------------|----------------------|------------|
//! | `Livemode`   | cache, live on miss  | yes        |
//! | `Darkmode`   | live                 | yes        |
//! | `Tapcompare` | live, compared with the cached entry | yes |
//! | `Disabled`   | live                 | no         |

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::block_number_cache::BlockNumberCache;
use crate::cache_key::CacheKey;
use crate::metrics::QUOTE_SOURCE;
use crate::route_caching_provider::RouteCachingProvider;
use crate::routes::{CachedRoutes, Protocol};
use crate::strategy::CacheMode;
use crate::telemetry::TelemetrySink;
use crate::tokens::{CurrencyAmount, Token, TradeType};

/// Boundary to the external routing engine.
#[async_trait]
pub trait RouteComputer: Send + Sync {
    /// Computes routes for `request` against state at `block_number`.
    async fn compute_routes(
        &self,
        request: &QuoteRequest,
        block_number: u64,
    ) -> Result<CachedRoutes>;
}

#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub key: CacheKey,
    /// Input amount for `ExactIn`, output amount for `ExactOut`.
    pub amount: CurrencyAmount,
    /// Protocols the routes may use; empty means any.
    pub protocols: Vec<Protocol>,
}

impl QuoteRequest {
    pub fn new(key: CacheKey, amount: CurrencyAmount, protocols: Vec<Protocol>) -> Self {
        Self { key, amount, protocols }
    }

    /// Request keyed by token addresses.
    pub fn for_tokens(
        token_in: &Token,
        token_out: &Token,
        trade_type: TradeType,
        amount: CurrencyAmount,
        protocols: Vec<Protocol>,
    ) -> Self {
        Self::new(CacheKey::for_tokens(token_in, token_out, trade_type), amount, protocols)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteSource {
    Cache,
    Live,
}

impl QuoteSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteSource::Cache => "cache",
            QuoteSource::Live => "live",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Quote {
    pub routes: CachedRoutes,
    pub source: QuoteSource,
    pub cache_mode: CacheMode,
    /// Chain head the request was evaluated at.
    pub block_number: u64,
}

pub struct QuoteService {
    caching: Arc<RouteCachingProvider>,
    computer: Arc<dyn RouteComputer>,
    blocks: Arc<BlockNumberCache>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl QuoteService {
    pub fn new(
        caching: Arc<RouteCachingProvider>,
        computer: Arc<dyn RouteComputer>,
        blocks: Arc<BlockNumberCache>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            caching,
            computer,
            blocks,
            telemetry,
        }
    }

    pub async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let block_number = self
            .blocks
            .get_current_block()
            .await
            .context("Failed to resolve current block for quote")?;
        let cache_mode = self.caching.get_cache_mode(&request.key, &request.amount);

        let cached = match cache_mode {
            CacheMode::Livemode | CacheMode::Tapcompare => {
                self.caching
                    .get_cached_route(
                        &request.key,
                        &request.amount,
                        &request.protocols,
                        block_number,
                    )
                    .await
            }
            CacheMode::Darkmode | CacheMode::Disabled => None,
        };

        if cache_mode == CacheMode::Livemode {
            if let Some(routes) = cached {
                debug!(
                    "Quote for {} served from cache (block {})",
                    request.key, routes.block_number
                );
                return Ok(self.finish(routes, QuoteSource::Cache, cache_mode, block_number));
            }
        }

        let routes = self
            .computer
            .compute_routes(request, block_number)
            .await
            .with_context(|| format!("Route computation failed for {}", request.key))?;

        if let Some(cached) = cached.as_ref() {
            compare_routes(&request.key, cached, &routes);
        }

        if cache_mode != CacheMode::Disabled {
            self.write_back(request, &routes).await;
        }

        Ok(self.finish(routes, QuoteSource::Live, cache_mode, block_number))
    }

    /// Stores live routes unless they describe a different key than the request.
    async fn write_back(&self, request: &QuoteRequest, routes: &CachedRoutes) {
        let derived = routes.cache_key();
        if derived != request.key {
            warn!(
                "Skipping write-back for {}: routes were computed for {}",
                request.key, derived
            );
            return;
        }
        if !self
            .caching
            .set_cached_route(&request.key, routes, &request.amount)
            .await
        {
            warn!(
                "Failed to write back routes for {} at block {}",
                request.key, routes.block_number
            );
        }
    }

    fn finish(
        &self,
        routes: CachedRoutes,
        source: QuoteSource,
        cache_mode: CacheMode,
        block_number: u64,
    ) -> Quote {
        self.telemetry.count(
            QUOTE_SOURCE,
            1,
            &[("source", source.as_str()), ("mode", &cache_mode.to_string())],
        );
        Quote {
            routes,
            source,
            cache_mode,
            block_number,
        }
    }
}

/// Logs whether the live routes use the same paths as the cached ones.
fn compare_routes(key: &CacheKey, cached: &CachedRoutes, live: &CachedRoutes) {
    let ids = |routes: &CachedRoutes| -> BTreeSet<(String, u8)> {
        routes.routes.iter().map(|r| (r.route_id(), r.percent)).collect()
    };
    if ids(cached) == ids(live) {
        info!("Tapcompare {}: cached routes from block {} match live", key, cached.block_number);
    } else {
        warn!(
            "Tapcompare {}: cached routes from block {} differ from live routes at block {}",
            key, cached.block_number, live.block_number
        );
    }
}
