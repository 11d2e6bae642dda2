use anyhow::{bail, Context};
use config::{Config, ConfigError, File};
use log::warn;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::cache_key::CacheKey;
use crate::remote_cache::RemoteCacheConfig;
use crate::strategy::{CacheMode, CachedRoutesBucket, CachedRoutesStrategy, StrategyRegistry};
use crate::tokens::{ChainId, TradeType};
use crate::traffic_switch::RolloutPercentage;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackendKind,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Store-level expiry; block freshness is enforced separately.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,
    /// Key prefix (table name) of the cached routes.
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_batch_chunk_size")]
    pub batch_chunk_size: usize,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_ttl_seconds() -> u64 {
    60
}
fn default_table() -> String {
    "route_cache".to_string()
}
fn default_batch_chunk_size() -> usize {
    100
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            redis_url: default_redis_url(),
            ttl_seconds: default_ttl_seconds(),
            table: default_table(),
            batch_chunk_size: default_batch_chunk_size(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    pub fn remote_cache_config(&self, cache_name: &'static str) -> RemoteCacheConfig {
        RemoteCacheConfig {
            cache_name,
            ttl: self.ttl(),
        }
    }

    #[cfg(feature = "redis")]
    pub fn redis_backend_config(&self) -> crate::remote_cache::redis_backend::RedisBackendConfig {
        crate::remote_cache::redis_backend::RedisBackendConfig {
            url: self.redis_url.clone(),
            key_prefix: self.table.clone(),
            batch_chunk_size: self.batch_chunk_size,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrafficSwitchSettings {
    /// Share of pool lookups routed to the target provider (0-100).
    #[serde(default)]
    pub switch_percent: f64,
    /// Share of pool lookups replayed against the source of truth (0-100).
    #[serde(default)]
    pub sample_percent: f64,
    #[serde(default = "default_shadow_timeout_ms")]
    pub shadow_timeout_ms: u64,
}

fn default_shadow_timeout_ms() -> u64 {
    3000
}

impl Default for TrafficSwitchSettings {
    fn default() -> Self {
        Self {
            switch_percent: 0.0,
            sample_percent: 0.0,
            shadow_timeout_ms: default_shadow_timeout_ms(),
        }
    }
}

impl TrafficSwitchSettings {
    pub fn should_switch(&self) -> RolloutPercentage {
        RolloutPercentage::new(self.switch_percent)
    }

    pub fn should_sample(&self) -> RolloutPercentage {
        RolloutPercentage::new(self.sample_percent)
    }

    pub fn shadow_timeout(&self) -> Duration {
        Duration::from_millis(self.shadow_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlockNumberSettings {
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
}

fn default_update_interval_ms() -> u64 {
    1000
}

impl Default for BlockNumberSettings {
    fn default() -> Self {
        Self {
            rpc_url: None,
            update_interval_ms: default_update_interval_ms(),
        }
    }
}

impl BlockNumberSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// JSON log lines (requires the `observability` feature).
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BucketConfig {
    /// Upper bound in human units, e.g. `100` or `"0.5"`.
    pub bucket: Decimal,
    pub cache_mode: CacheMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    /// Display name, e.g. "USDC/WETH".
    pub pair: String,
    /// Token address; checksummed or lowercase.
    pub token_in: String,
    pub token_out: String,
    pub trade_type: TradeType,
    pub chain_id: ChainId,
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
}

impl StrategyConfig {
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.token_in.clone(), self.token_out.clone(), self.trade_type, self.chain_id)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub traffic_switch: TrafficSwitchSettings,
    #[serde(default)]
    pub block_number: BlockNumberSettings,
    #[serde(default)]
    pub log: LogSettings,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_path("Config.toml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides(|name| env::var(name).ok());
        Ok(settings)
    }

    /// Applies `ROUTE_CACHE_*` / `TRAFFIC_*` overrides; unparsable values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = var("ROUTE_CACHE_REDIS_URL") {
            self.cache.redis_url = url;
        }
        if let Some(raw) = var("ROUTE_CACHE_TTL_SECONDS") {
            match raw.parse() {
                Ok(ttl) => self.cache.ttl_seconds = ttl,
                Err(e) => warn!("Ignoring ROUTE_CACHE_TTL_SECONDS={}: {}", raw, e),
            }
        }
        if let Some(raw) = var("TRAFFIC_SWITCH_PERCENT") {
            match raw.parse() {
                Ok(percent) => self.traffic_switch.switch_percent = percent,
                Err(e) => warn!("Ignoring TRAFFIC_SWITCH_PERCENT={}: {}", raw, e),
            }
        }
        if let Some(raw) = var("TRAFFIC_SAMPLE_PERCENT") {
            match raw.parse() {
                Ok(percent) => self.traffic_switch.sample_percent = percent,
                Err(e) => warn!("Ignoring TRAFFIC_SAMPLE_PERCENT={}: {}", raw, e),
            }
        }
    }

    /// Validates the configured strategies and indexes them by cache key.
    pub fn build_strategies(&self) -> anyhow::Result<StrategyRegistry> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(self.strategies.len());

        for config in &self.strategies {
            let key = config.cache_key();
            if !seen.insert(key.clone()) {
                bail!("Strategy for {} is configured more than once", key);
            }

            let buckets = config
                .buckets
                .iter()
                .map(|b| CachedRoutesBucket::new(b.bucket, b.cache_mode))
                .collect();
            let strategy = CachedRoutesStrategy::new(
                config.pair.clone(),
                config.trade_type,
                config.chain_id,
                buckets,
            )
            .with_context(|| format!("Invalid caching strategy for {}", config.pair))?;
            entries.push((key, strategy));
        }

        Ok(StrategyRegistry::new(entries))
    }
}
