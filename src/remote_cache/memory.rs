// In-memory cache backend - same contract as the Redis backend, used for local runs and tests

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;

use super::backend::{BatchLatest, CacheBackend, StoredRecord};

/// Partition → (block → record). Expired records are pruned whenever their partition is read
/// or written; partitions left empty are removed.
pub struct InMemoryBackend {
    partitions: DashMap<String, BTreeMap<u64, StoredRecord>>,
    /// Maximum keys answered per batch call; the rest are reported unprocessed.
    max_batch_size: usize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
            max_batch_size: usize::MAX,
        }
    }

    /// Limits how many keys a batch read answers, mimicking a throttled store.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of partitions currently held, including ones with only expired records.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Drops expired records of `partition_key` and the partition itself once empty.
    fn latest_unexpired(&self, partition_key: &str, now: i64) -> Option<StoredRecord> {
        let latest = {
            let mut blocks = self.partitions.get_mut(partition_key)?;
            blocks.retain(|_, record| !record.is_expired(now));
            blocks.values().next_back().cloned()
        };
        if latest.is_none() {
            self.partitions.remove_if(partition_key, |_, blocks| blocks.is_empty());
        }
        latest
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, record: StoredRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut blocks = self.partitions.entry(record.partition_key.clone()).or_default();
        blocks.retain(|_, existing| !existing.is_expired(now));
        blocks.insert(record.block_number, record);
        Ok(())
    }

    async fn latest(&self, partition_key: &str) -> Result<Option<StoredRecord>> {
        Ok(self.latest_unexpired(partition_key, chrono::Utc::now().timestamp()))
    }

    async fn batch_latest(&self, partition_keys: &[String]) -> Result<BatchLatest> {
        let now = chrono::Utc::now().timestamp();
        let mut out = BatchLatest::default();

        for (idx, key) in partition_keys.iter().enumerate() {
            if idx >= self.max_batch_size {
                out.unprocessed.push(key.clone());
                continue;
            }
            if let Some(record) = self.latest_unexpired(key, now) {
                out.records.insert(key.clone(), record);
            }
        }

        Ok(out)
    }
}
