//! # Route Cache SDK
//!
//! Route-caching and traffic-migration layer of a DEX quote API. Route finding itself is done
//! by an external routing engine; this crate decides when a previously computed route can be
//! reused, stores routes in a remote key/value store, and migrates pool-data lookups between
//! two provider implementations.
//!
//! ## Overview
//!
//! - **Cache keys**: canonical `(tokenIn, tokenOut, tradeType, chainId)` identity
//! - **Bucketed strategies**: trade amounts are mapped onto configured size buckets, each
//!   carrying a cache mode
//! - **Marshalling**: cached routes are flattened into a JSON-friendly wire form
//! - **Remote cache store**: block-ordered, TTL-bounded storage that degrades to a miss on
//!   any error
//! - **Traffic switching**: canary routing between a current and a target pool provider with
//!   background shadow comparison against a source of truth
//!
//! ## Request flow
//!
//! A [`QuoteService`] resolves the current block, asks the [`RouteCachingProvider`] for a
//! fresh cached route, and falls through to the [`quote::RouteComputer`] on a miss, writing
//! the live result back.

// Domain model
/// Tokens, trade types and currency amounts
pub mod tokens;
/// Pool types and CREATE2 address derivation
pub mod pools;
/// Cached route model and block freshness
pub mod routes;
/// Cache identity of a routing request
pub mod cache_key;

// Caching
/// Bucketed caching strategies
pub mod strategy;
/// Wire format of cached routes
pub mod marshaller;
/// Block-anchored remote key/value store
pub mod remote_cache;
/// Strategy-aware route cache used by the quote path
pub mod route_caching_provider;
/// Quote orchestration
pub mod quote;

// Pool data
/// Pool provider capability
pub mod pool_provider;
/// Canary traffic switch between pool providers
pub mod traffic_switch;

// Infrastructure
/// Chain head cache
pub mod block_number_cache;
/// Metric names and recorder helpers
pub mod metrics;
/// Injected telemetry sinks
pub mod telemetry;
/// Configuration
pub mod settings;

pub use cache_key::CacheKey;
pub use quote::{Quote, QuoteRequest, QuoteService, QuoteSource};
pub use remote_cache::{KeyValueCache, RemoteCacheStore};
pub use route_caching_provider::RouteCachingProvider;
pub use settings::Settings;
pub use strategy::{CacheMode, CachedRoutesStrategy, StrategyRegistry};
pub use traffic_switch::TrafficSwitchV3PoolProvider;
