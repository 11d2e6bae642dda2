// Redis cache backend - block-ordered snapshots per partition
//
// Layout per partition:
//   {prefix}:{partition}:{block}   HASH  payload, expires_at       (EXPIRE ttl)
//   {prefix}:{partition}:blocks    ZSET  member=block score=block  (EXPIRE ttl, trimmed)

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use redis::Client;

use super::backend::{BatchLatest, CacheBackend, StoredRecord};

/// Snapshots kept in a partition index; older blocks are trimmed on write.
const MAX_BLOCKS_PER_PARTITION: isize = 16;
/// Index entries inspected per partition, by `latest` and `batch_latest` alike, when the
/// newest payloads already expired.
const READ_DEPTH: isize = 4;

#[derive(Debug, Clone)]
pub struct RedisBackendConfig {
    pub url: String,
    pub key_prefix: String,
    pub batch_chunk_size: usize,
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "route_cache".to_string(),
            batch_chunk_size: 100,
        }
    }
}

pub struct RedisBackend {
    conn: ConnectionManager,
    config: RedisBackendConfig,
}

impl RedisBackend {
    pub async fn new(config: RedisBackendConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())
            .context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Redis cache backend connected to {} (prefix {})", config.url, config.key_prefix);

        Ok(Self { conn, config })
    }

    fn record_key(&self, partition_key: &str, block_number: u64) -> String {
        format!("{}:{}:{}", self.config.key_prefix, partition_key, block_number)
    }

    fn index_key(&self, partition_key: &str) -> String {
        format!("{}:{}:blocks", self.config.key_prefix, partition_key)
    }

    /// Newest-first block numbers recorded for a partition.
    async fn candidate_blocks(&self, partition_key: &str) -> Result<Vec<u64>> {
        let mut conn = self.conn.clone();
        let blocks: Vec<u64> = redis::cmd("ZREVRANGE")
            .arg(self.index_key(partition_key))
            .arg(0)
            .arg(READ_DEPTH - 1)
            .query_async(&mut conn)
            .await
            .context("Failed to read partition index")?;
        Ok(blocks)
    }

    async fn read_record(
        &self,
        partition_key: &str,
        block_number: u64,
    ) -> Result<Option<StoredRecord>> {
        let mut conn = self.conn.clone();
        let (payload, expires_at): (Option<Vec<u8>>, Option<i64>) = redis::cmd("HMGET")
            .arg(self.record_key(partition_key, block_number))
            .arg("payload")
            .arg("expires_at")
            .query_async(&mut conn)
            .await
            .context("Failed to read cached record")?;

        Ok(match (payload, expires_at) {
            (Some(payload), Some(expires_at)) => Some(StoredRecord {
                partition_key: partition_key.to_string(),
                block_number,
                payload,
                expires_at,
            }),
            _ => None,
        })
    }

    /// Same lookup as [`CacheBackend::latest`] for a chunk of partitions, in two pipelines:
    /// the newest `READ_DEPTH` index entries of each, then every candidate record.
    async fn latest_in_chunk(&self, chunk: &[String]) -> Result<Vec<(String, StoredRecord)>> {
        let mut conn = self.conn.clone();

        let mut index_pipe = redis::pipe();
        for key in chunk {
            index_pipe
                .cmd("ZREVRANGE")
                .arg(self.index_key(key))
                .arg(0)
                .arg(READ_DEPTH - 1);
        }
        let heads: Vec<Vec<u64>> = index_pipe
            .query_async(&mut conn)
            .await
            .context("Failed to read partition indexes")?;

        let candidates: Vec<(&String, u64)> = chunk
            .iter()
            .zip(heads)
            .flat_map(|(key, blocks)| blocks.into_iter().map(move |block| (key, block)))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut record_pipe = redis::pipe();
        for (key, block) in &candidates {
            record_pipe
                .cmd("HMGET")
                .arg(self.record_key(key, *block))
                .arg("payload")
                .arg("expires_at");
        }
        let rows: Vec<(Option<Vec<u8>>, Option<i64>)> = record_pipe
            .query_async(&mut conn)
            .await
            .context("Failed to read cached records")?;

        // candidates are newest-first per partition; keep the first live record of each
        let now = chrono::Utc::now().timestamp();
        let mut found: Vec<(String, StoredRecord)> = Vec::new();
        for ((key, block_number), row) in candidates.into_iter().zip(rows) {
            if found.last().map_or(false, |(last, _)| last == key) {
                continue;
            }
            if let (Some(payload), Some(expires_at)) = row {
                let record = StoredRecord {
                    partition_key: key.clone(),
                    block_number,
                    payload,
                    expires_at,
                };
                if !record.is_expired(now) {
                    found.push((key.clone(), record));
                }
            }
        }
        Ok(found)
    }

    /// Test Redis connection
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;

        if pong == "PONG" {
            Ok(())
        } else {
            anyhow::bail!("Unexpected Redis response: {}", pong)
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn put(&self, record: StoredRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let ttl = (record.expires_at - now).max(1);
        let record_key = self.record_key(&record.partition_key, record.block_number);
        let index_key = self.index_key(&record.partition_key);

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&record_key)
            .arg("payload")
            .arg(record.payload.as_slice())
            .arg("expires_at")
            .arg(record.expires_at)
            .ignore()
            .cmd("EXPIRE")
            .arg(&record_key)
            .arg(ttl)
            .ignore()
            .cmd("ZADD")
            .arg(&index_key)
            .arg(record.block_number)
            .arg(record.block_number)
            .ignore()
            .cmd("ZREMRANGEBYRANK")
            .arg(&index_key)
            .arg(0)
            .arg(-(MAX_BLOCKS_PER_PARTITION + 1))
            .ignore()
            .cmd("EXPIRE")
            .arg(&index_key)
            .arg(ttl)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .context("Failed to write cached record")?;

        debug!("Cached {} at block {} (ttl {}s)", record.partition_key, record.block_number, ttl);
        Ok(())
    }

    async fn latest(&self, partition_key: &str) -> Result<Option<StoredRecord>> {
        let now = chrono::Utc::now().timestamp();
        for block in self.candidate_blocks(partition_key).await? {
            if let Some(record) = self.read_record(partition_key, block).await? {
                if !record.is_expired(now) {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    async fn batch_latest(&self, partition_keys: &[String]) -> Result<BatchLatest> {
        let mut out = BatchLatest::default();

        for chunk in partition_keys.chunks(self.config.batch_chunk_size.max(1)) {
            match self.latest_in_chunk(chunk).await {
                Ok(found) => out.records.extend(found),
                Err(e) => {
                    warn!(
                        "Redis batch chunk of {} keys failed, reporting unprocessed: {:#}",
                        chunk.len(),
                        e
                    );
                    out.unprocessed.extend(chunk.iter().cloned());
                }
            }
        }

        Ok(out)
    }
}
