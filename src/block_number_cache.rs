use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::prelude::{Http, Middleware, Provider};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Where the chain head comes from.
#[async_trait]
pub trait BlockNumberSource: Send + Sync {
    async fn block_number(&self) -> Result<u64>;
}

#[async_trait]
impl BlockNumberSource for Provider<Http> {
    async fn block_number(&self) -> Result<u64> {
        let block = self
            .get_block_number()
            .await
            .context("eth_blockNumber failed")?;
        Ok(block.as_u64())
    }
}

/// Chain head cache used to judge route freshness.
/// Refreshes at most once per `update_interval`.
pub struct BlockNumberCache {
    current_block: AtomicU64,
    /// `None` until the first successful fetch.
    last_update: Mutex<Option<Instant>>,
    update_interval: Duration,
    source: Arc<dyn BlockNumberSource>,
}

impl BlockNumberCache {
    /// Create a new BlockNumberCache
    ///
    /// # Arguments
    /// * `source` - where block numbers are fetched from
    /// * `update_interval` - Minimum time between fetches
    pub fn new(source: Arc<dyn BlockNumberSource>, update_interval: Duration) -> Self {
        Self {
            current_block: AtomicU64::new(0),
            last_update: Mutex::new(None),
            update_interval,
            source,
        }
    }

    /// Cache backed by an HTTP JSON-RPC endpoint.
    pub fn from_rpc_url(rpc_url: &str, update_interval: Duration) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("Invalid RPC url {}", rpc_url))?;
        Ok(Self::new(Arc::new(provider), update_interval))
    }

    /// Get current block number (cached, updates at most once per interval)
    ///
    /// Falls back to the last known block when the fetch fails.
    pub async fn get_current_block(&self) -> Result<u64> {
        let mut last_update = self.last_update.lock().await;

        if let Some(updated_at) = *last_update {
            if updated_at.elapsed() < self.update_interval {
                let cached = self.current_block.load(Ordering::Relaxed);
                if cached > 0 {
                    debug!(block = cached, "BlockNumberCache: using cached block");
                    return Ok(cached);
                }
            }
        }

        debug!("BlockNumberCache: fetching new block number (cache stale or empty)");
        match self.source.block_number().await {
            Ok(block) => {
                self.store(block);
                *last_update = Some(Instant::now());
                debug!(block, "BlockNumberCache: updated");
                Ok(self.get_cached())
            }
            Err(e) => self.fallback(e),
        }
    }

    /// Force update block number (bypasses cache freshness check)
    pub async fn force_update(&self) -> Result<u64> {
        debug!("BlockNumberCache: force updating block number");
        match self.source.block_number().await {
            Ok(block) => {
                self.store(block);
                *self.last_update.lock().await = Some(Instant::now());
                debug!(block, "BlockNumberCache: force updated");
                Ok(self.get_cached())
            }
            Err(e) => self.fallback(e),
        }
    }

    /// Get cached block number without triggering update
    /// Returns 0 if cache is empty
    pub fn get_cached(&self) -> u64 {
        self.current_block.load(Ordering::Relaxed)
    }

    /// Update block number from external source (e.g. a new-head subscription)
    pub fn update_from_external(&self, block_number: u64) {
        if block_number > 0 {
            self.store(block_number);
            debug!(block = block_number, "BlockNumberCache: updated from external source");
        }
    }

    /// The head never moves backwards; reorg-shortened heads keep the highest block seen.
    fn store(&self, block: u64) {
        self.current_block.fetch_max(block, Ordering::Relaxed);
    }

    fn fallback(&self, e: anyhow::Error) -> Result<u64> {
        let cached = self.get_cached();
        if cached > 0 {
            warn!(block = cached, error = %e, "BlockNumberCache: fetch failed, using cached value");
            Ok(cached)
        } else {
            Err(e.context("Failed to fetch block number and no cache available"))
        }
    }
}
