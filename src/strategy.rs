//! # Bucketed Caching Strategy
//!
//! Maps a continuous trade amount onto a small set of configured size buckets so only
//! representative amounts are ever cached. Each bucket carries a [`CacheMode`] tag that is
//! owned by the routing engine; this layer reads the tag and forwards it.
//!
//! Buckets are expressed in human units of the traded token (`100` means 100 USDC) and are
//! expanded to the amount's raw precision before comparison.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::cache_key::CacheKey;
use crate::tokens::{decimal_to_raw, ChainId, CurrencyAmount, TradeType};

/// Upper bound used by [`CachedRoutesStrategy::bucket_pairs`] for the unbounded last band.
pub const UNBOUNDED_BUCKET: Decimal = Decimal::NEGATIVE_ONE;

/// How the routing engine should treat cached routes for a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Disabled,
    Livemode,
    Darkmode,
    Tapcompare,
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheMode::Disabled => write!(f, "disabled"),
            CacheMode::Livemode => write!(f, "livemode"),
            CacheMode::Darkmode => write!(f, "darkmode"),
            CacheMode::Tapcompare => write!(f, "tapcompare"),
        }
    }
}

/// One entry of a per-pair caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRoutesBucket {
    /// Inclusive upper bound of the band, in human units of the traded token.
    pub bucket: Decimal,
    pub cache_mode: CacheMode,
}

impl CachedRoutesBucket {
    pub fn new(bucket: Decimal, cache_mode: CacheMode) -> Self {
        Self { bucket, cache_mode }
    }
}

/// Caching policy for one (pair, tradeType, chainId).
#[derive(Debug, Clone)]
pub struct CachedRoutesStrategy {
    pair: String,
    trade_type: TradeType,
    chain_id: ChainId,
    /// Sorted ascending by `bucket`, values unique.
    buckets: Vec<CachedRoutesBucket>,
    will_tapcompare: bool,
}

impl CachedRoutesStrategy {
    pub fn new(
        pair: impl Into<String>,
        trade_type: TradeType,
        chain_id: ChainId,
        mut buckets: Vec<CachedRoutesBucket>,
    ) -> Result<Self, StrategyError> {
        let pair = pair.into();

        if let Some(negative) = buckets
            .iter()
            .find(|b| b.bucket.is_sign_negative() && !b.bucket.is_zero())
        {
            return Err(StrategyError::NegativeBucket {
                pair,
                bucket: negative.bucket,
            });
        }

        // Decimal ordering is numeric, so 100 sorts after 50
        buckets.sort_by(|a, b| a.bucket.cmp(&b.bucket));

        if let Some(window) = buckets.windows(2).find(|w| w[0].bucket == w[1].bucket) {
            return Err(StrategyError::DuplicateBucket {
                pair,
                bucket: window[0].bucket,
            });
        }

        let will_tapcompare = buckets.iter().any(|b| b.cache_mode == CacheMode::Tapcompare);

        Ok(Self {
            pair,
            trade_type,
            chain_id,
            buckets,
            will_tapcompare,
        })
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn trade_type(&self) -> TradeType {
        self.trade_type
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// True iff any configured bucket runs in `Tapcompare` mode.
    pub fn will_tapcompare(&self) -> bool {
        self.will_tapcompare
    }

    /// Bucket thresholds, ascending.
    pub fn thresholds(&self) -> Vec<Decimal> {
        self.buckets.iter().map(|b| b.bucket).collect()
    }

    pub fn buckets(&self) -> &[CachedRoutesBucket] {
        &self.buckets
    }

    /// Looks up the bucket record configured for exactly `value`.
    pub fn bucket(&self, value: Decimal) -> Option<&CachedRoutesBucket> {
        self.buckets
            .binary_search_by(|b| b.bucket.cmp(&value))
            .ok()
            .and_then(|idx| self.buckets.get(idx))
    }

    /// Returns the smallest bucket that can represent `amount`, or `None` when the amount
    /// is above the largest configured bucket.
    pub fn caching_bucket(&self, amount: &CurrencyAmount) -> Option<&CachedRoutesBucket> {
        self.buckets.iter().find(|b| {
            match decimal_to_raw(b.bucket, amount.token.decimals) {
                Some(threshold) => amount.raw <= threshold,
                // threshold beyond 256 bits: every amount fits
                None => true,
            }
        })
    }

    /// Bands the buckets partition the amount axis into:
    /// `[(0, b0), (b0, b1), ..., (b_last, UNBOUNDED_BUCKET)]`.
    pub fn bucket_pairs(&self) -> Vec<(Decimal, Decimal)> {
        let Some(last) = self.buckets.last() else {
            return Vec::new();
        };

        let mut pairs = Vec::with_capacity(self.buckets.len() + 1);
        let mut lower = Decimal::ZERO;
        for bucket in &self.buckets {
            pairs.push((lower, bucket.bucket));
            lower = bucket.bucket;
        }
        pairs.push((last.bucket, UNBOUNDED_BUCKET));
        pairs
    }

    /// Human-readable identity, e.g. `USDC/WETH#ExactIn#1`.
    pub fn readable_pair_trade_type_chain_id(&self) -> String {
        format!("{}#{}#{}", self.pair.to_uppercase(), self.trade_type, self.chain_id)
    }
}

impl fmt::Display for CachedRoutesStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.readable_pair_trade_type_chain_id())
    }
}

/// Immutable set of strategies, keyed by the cache key they apply to.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<CacheKey, CachedRoutesStrategy>,
}

impl StrategyRegistry {
    pub fn new(entries: impl IntoIterator<Item = (CacheKey, CachedRoutesStrategy)>) -> Self {
        Self {
            strategies: entries.into_iter().collect(),
        }
    }

    pub fn strategy_for(&self, key: &CacheKey) -> Option<&CachedRoutesStrategy> {
        self.strategies.get(key)
    }

    /// Resolves the caching bucket for a request; `None` when no strategy is configured for
    /// the key or the amount falls above every bucket.
    pub fn caching_bucket(
        &self,
        key: &CacheKey,
        amount: &CurrencyAmount,
    ) -> Option<CachedRoutesBucket> {
        self.strategy_for(key)
            .and_then(|strategy| strategy.caching_bucket(amount))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CacheKey, &CachedRoutesStrategy)> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("Duplicate bucket {bucket} in strategy for {pair}")]
    DuplicateBucket { pair: String, bucket: Decimal },
    #[error("Negative bucket {bucket} in strategy for {pair}")]
    NegativeBucket { pair: String, bucket: Decimal },
}
