//! Storage backend abstraction for the remote cache store.
//!
//! A record is addressed by a partition key (the logical cache key) and an ordering key (the
//! block number it was written at). Several blocks may coexist for the same partition; reads
//! always want the highest one.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// One stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub partition_key: String,
    pub block_number: u64,
    /// UTF-8 JSON of the marshalled value.
    pub payload: Vec<u8>,
    /// Unix timestamp (seconds) after which the store may drop the record.
    pub expires_at: i64,
}

impl StoredRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Result of a batch read. Keys listed in `unprocessed` were not looked at by the store
/// (throttling, partial failure); they are neither hits nor confirmed misses.
#[derive(Debug, Default)]
pub struct BatchLatest {
    pub records: HashMap<String, StoredRecord>,
    pub unprocessed: Vec<String>,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Writes `record`, replacing any record with the same partition and block.
    async fn put(&self, record: StoredRecord) -> Result<()>;

    /// Most recent unexpired record of `partition_key`, by block number.
    async fn latest(&self, partition_key: &str) -> Result<Option<StoredRecord>>;

    /// Most recent unexpired record of each partition.
    async fn batch_latest(&self, partition_keys: &[String]) -> Result<BatchLatest>;
}
