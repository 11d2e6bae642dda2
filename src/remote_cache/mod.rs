//! # Remote Cache Store
//!
//! Durable, block-anchored key/value storage for one payload type (cached routes, pool
//! snapshots, ...), fronted by the [`KeyValueCache`] capability.
//!
//! ## Record layout
//!
//! Every write produces `{partition key, block number, payload, expires_at}` where the
//! partition key is the logical cache key, the payload is the marshalled value encoded as
//! UTF-8 JSON bytes, and `expires_at = now + ttl`. The store TTL is only a safety net;
//! block-based freshness is decided by the caller.
//!
//! ## Failure semantics
//!
//! A cache must never be the reason a request fails. Reads that hit transport errors or
//! undecodable payloads are logged and reported as misses; writes return `false`. Values
//! whose payload would not decode are refused before they reach the backend.

pub mod backend;
pub mod memory;
pub mod pair_cache;
#[cfg(feature = "redis")]
pub mod redis_backend;

use async_trait::async_trait;
use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::marshaller::{self, MarshalError, MarshalledCachedRoutes};
use crate::metrics::{
    ROUTE_CACHE_BATCH_UNPROCESSED_KEYS, ROUTE_CACHE_GET, ROUTE_CACHE_LATENCY_MS, ROUTE_CACHE_SET,
};
use crate::routes::CachedRoutes;
use crate::telemetry::TelemetrySink;

pub use backend::{BatchLatest, CacheBackend, StoredRecord};
pub use memory::InMemoryBackend;

/// Default store-level TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Block a value was observed at, if known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAnchor {
    At(u64),
    /// No known block: the value cannot be placed in the store.
    Unanchored,
}

/// A value that can be stored in a [`RemoteCacheStore`].
pub trait Cacheable: Sized + Send + Sync {
    type Marshalled: Serialize + DeserializeOwned + Send;

    fn anchor(&self) -> BlockAnchor;

    fn marshal(&self) -> Self::Marshalled;

    fn unmarshal(marshalled: Self::Marshalled) -> Result<Self, MarshalError>;
}

impl Cacheable for CachedRoutes {
    type Marshalled = MarshalledCachedRoutes;

    fn anchor(&self) -> BlockAnchor {
        BlockAnchor::At(self.block_number)
    }

    fn marshal(&self) -> Self::Marshalled {
        marshaller::marshal(self)
    }

    fn unmarshal(marshalled: Self::Marshalled) -> Result<Self, MarshalError> {
        marshaller::unmarshal(marshalled)
    }
}

/// Uniform key/value cache capability.
#[async_trait]
pub trait KeyValueCache<K, V>: Send + Sync
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V>;

    async fn set(&self, key: &K, value: &V) -> bool;

    async fn has(&self, key: &K) -> bool {
        self.get(key).await.is_some()
    }

    /// Every requested key is present in the result; unresolved keys map to `None`.
    async fn batch_get(&self, keys: &HashSet<K>) -> HashMap<K, Option<V>>;
}

#[derive(Debug, Clone)]
pub struct RemoteCacheConfig {
    /// Name used in logs and metric labels (e.g. "cached_routes").
    pub cache_name: &'static str,
    pub ttl: Duration,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            cache_name: "cached_routes",
            ttl: DEFAULT_TTL,
        }
    }
}

/// Block-anchored cache store over a [`CacheBackend`].
pub struct RemoteCacheStore<K, V> {
    backend: Arc<dyn CacheBackend>,
    config: RemoteCacheConfig,
    telemetry: Arc<dyn TelemetrySink>,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> RemoteCacheStore<K, V>
where
    K: Display + Eq + Hash + Clone + Send + Sync + 'static,
    V: Cacheable + 'static,
{
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        config: RemoteCacheConfig,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            backend,
            config,
            telemetry,
            _marker: PhantomData,
        }
    }

    pub fn config(&self) -> &RemoteCacheConfig {
        &self.config
    }

    pub fn encode(value: &V) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_string(&value.marshal()).map(String::into_bytes)
    }

    pub fn decode(payload: &[u8]) -> anyhow::Result<V> {
        let text = std::str::from_utf8(payload)?;
        let marshalled: V::Marshalled = serde_json::from_str(text)?;
        Ok(V::unmarshal(marshalled)?)
    }

    fn record_get(&self, result: &'static str) {
        self.telemetry.count(
            ROUTE_CACHE_GET,
            1,
            &[("cache", self.config.cache_name), ("result", result)],
        );
    }

    fn record_set(&self, result: &'static str) {
        self.telemetry.count(
            ROUTE_CACHE_SET,
            1,
            &[("cache", self.config.cache_name), ("result", result)],
        );
    }

    fn record_latency(&self, operation: &'static str, start: Instant) {
        self.telemetry.latency(
            ROUTE_CACHE_LATENCY_MS,
            start.elapsed(),
            &[("cache", self.config.cache_name), ("operation", operation)],
        );
    }

    fn decode_record(&self, partition: &str, record: &StoredRecord) -> Option<V> {
        match Self::decode(&record.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "[{}] Undecodable payload for {} at block {}, treating as miss: {:#}",
                    self.config.cache_name, partition, record.block_number, e
                );
                None
            }
        }
    }
}

#[async_trait]
impl<K, V> KeyValueCache<K, V> for RemoteCacheStore<K, V>
where
    K: Display + Eq + Hash + Clone + Send + Sync + 'static,
    V: Cacheable + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        let start = Instant::now();
        let partition = key.to_string();
        let result = self.backend.latest(&partition).await;
        self.record_latency("get", start);

        match result {
            Ok(Some(record)) => match self.decode_record(&partition, &record) {
                Some(value) => {
                    debug!(
                        "[{}] Cache hit for {} at block {}",
                        self.config.cache_name, partition, record.block_number
                    );
                    self.record_get("hit");
                    Some(value)
                }
                None => {
                    self.record_get("error");
                    None
                }
            },
            Ok(None) => {
                debug!("[{}] Cache miss for {}", self.config.cache_name, partition);
                self.record_get("miss");
                None
            }
            Err(e) => {
                error!(
                    "[{}] get failed on {} backend for {}, treating as miss: {:#}",
                    self.config.cache_name,
                    self.backend.name(),
                    partition,
                    e
                );
                self.record_get("error");
                None
            }
        }
    }

    async fn set(&self, key: &K, value: &V) -> bool {
        let partition = key.to_string();

        let block_number = match value.anchor() {
            BlockAnchor::At(block) => block,
            BlockAnchor::Unanchored => {
                warn!(
                    "[{}] Refusing to cache {}: value has no block number",
                    self.config.cache_name, partition
                );
                self.record_set("rejected");
                return false;
            }
        };

        let payload = match Self::encode(value) {
            Ok(payload) => payload,
            Err(e) => {
                error!("[{}] Failed to encode {}: {}", self.config.cache_name, partition, e);
                self.record_set("error");
                return false;
            }
        };

        // A payload the read path cannot decode would shadow older readable blocks
        if let Err(e) = Self::decode(&payload) {
            warn!(
                "[{}] Refusing to cache {} at block {}: value would not read back: {:#}",
                self.config.cache_name, partition, block_number, e
            );
            self.record_set("rejected");
            return false;
        }

        let ttl_secs = i64::try_from(self.config.ttl.as_secs()).unwrap_or(i64::MAX);
        let record = StoredRecord {
            partition_key: partition.clone(),
            block_number,
            payload,
            expires_at: chrono::Utc::now().timestamp().saturating_add(ttl_secs),
        };

        let start = Instant::now();
        let result = self.backend.put(record).await;
        self.record_latency("set", start);

        match result {
            Ok(()) => {
                debug!(
                    "[{}] Cached {} at block {}",
                    self.config.cache_name, partition, block_number
                );
                self.record_set("ok");
                true
            }
            Err(e) => {
                warn!(
                    "[{}] set failed on {} backend for {}: {:#}",
                    self.config.cache_name,
                    self.backend.name(),
                    partition,
                    e
                );
                self.record_set("error");
                false
            }
        }
    }

    async fn batch_get(&self, keys: &HashSet<K>) -> HashMap<K, Option<V>> {
        let by_partition: HashMap<String, &K> = keys.iter().map(|k| (k.to_string(), k)).collect();
        let partitions: Vec<String> = by_partition.keys().cloned().collect();
        let mut out: HashMap<K, Option<V>> = keys.iter().map(|k| (k.clone(), None)).collect();

        let start = Instant::now();
        let result = self.backend.batch_latest(&partitions).await;
        self.record_latency("batch_get", start);

        let batch = match result {
            Ok(batch) => batch,
            Err(e) => {
                error!(
                    "[{}] batch_get of {} keys failed on {} backend, treating as misses: {:#}",
                    self.config.cache_name,
                    partitions.len(),
                    self.backend.name(),
                    e
                );
                self.record_get("error");
                return out;
            }
        };

        if !batch.unprocessed.is_empty() {
            warn!(
                "[{}] Store left {} of {} keys unprocessed",
                self.config.cache_name,
                batch.unprocessed.len(),
                partitions.len()
            );
            self.telemetry.count(
                ROUTE_CACHE_BATCH_UNPROCESSED_KEYS,
                batch.unprocessed.len() as u64,
                &[("cache", self.config.cache_name)],
            );
        }

        for (partition, record) in &batch.records {
            let Some(key) = by_partition.get(partition) else {
                continue;
            };
            if let Some(value) = self.decode_record(partition, record) {
                out.insert((*key).clone(), Some(value));
            }
        }

        let hits = out.values().filter(|v| v.is_some()).count();
        debug!("[{}] batch_get resolved {}/{} keys", self.config.cache_name, hits, keys.len());
        out
    }
}
