//! # V3 Pool Provider
//!
//! Capability consumed by the routing engine to load V3 pool state for a set of token pairs.
//! Several implementations can coexist (a provider backed by the chain, one backed by a
//! snapshot cache, ...); [`crate::traffic_switch`] migrates traffic between two of them.
//!
//! Pool addresses are deterministic (CREATE2), so `get_pool_address` never does IO.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, H256};
use log::debug;
use std::collections::HashSet;
use std::str::FromStr;

use crate::pools::{
    compute_v3_pool_address, FeeAmount, PoolAddress, V3Pool, UNISWAP_V3_FACTORY,
    UNISWAP_V3_POOL_INIT_CODE_HASH,
};
use crate::tokens::Token;

/// Per-call options forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Block to read pool state at; `None` means latest.
    pub block_number: Option<u64>,
}

/// One pool to look up: a token pair and a fee tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenPairWithFee {
    pub token_a: Token,
    pub token_b: Token,
    pub fee: FeeAmount,
}

impl TokenPairWithFee {
    pub fn new(token_a: Token, token_b: Token, fee: FeeAmount) -> Self {
        Self { token_a, token_b, fee }
    }
}

/// Pools returned by a provider, ordered by address so that two accessors holding the same
/// pools compare equal regardless of the order the provider produced them in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolAccessor {
    pools: Vec<V3Pool>,
}

impl PoolAccessor {
    pub fn new(mut pools: Vec<V3Pool>) -> Self {
        pools.sort_by_key(|pool| pool.address);
        pools.dedup_by_key(|pool| pool.address);
        Self { pools }
    }

    pub fn get_pool(&self, token_a: &Token, token_b: &Token, fee: FeeAmount) -> Option<&V3Pool> {
        self.pools
            .iter()
            .find(|pool| pool.fee == fee && pool.involves(token_a) && pool.involves(token_b))
    }

    pub fn get_pool_by_address(&self, address: Address) -> Option<&V3Pool> {
        self.pools
            .binary_search_by_key(&address, |pool| pool.address)
            .ok()
            .map(|idx| &self.pools[idx])
    }

    pub fn get_all_pools(&self) -> &[V3Pool] {
        &self.pools
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Addresses whose state differs between `self` and `other`, including pools present in
    /// only one of them.
    pub fn mismatched_addresses(&self, other: &PoolAccessor) -> Vec<Address> {
        let addresses: HashSet<Address> = self
            .pools
            .iter()
            .chain(other.pools.iter())
            .map(|pool| pool.address)
            .collect();

        let mut mismatched: Vec<Address> = addresses
            .into_iter()
            .filter(|address| {
                self.get_pool_by_address(*address) != other.get_pool_by_address(*address)
            })
            .collect();
        mismatched.sort();
        mismatched
    }
}

#[async_trait]
pub trait V3PoolProvider: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Loads the pools for `token_pairs`. Pairs without a deployed pool are absent from the
    /// accessor rather than an error.
    async fn get_pools(
        &self,
        token_pairs: &[TokenPairWithFee],
        config: &ProviderConfig,
    ) -> Result<PoolAccessor>;

    fn get_pool_address(&self, token_a: &Token, token_b: &Token, fee: FeeAmount) -> PoolAddress;
}

/// Provider serving pools from an in-memory snapshot, keyed by their CREATE2 address.
pub struct StaticV3PoolProvider {
    name: String,
    factory: Address,
    init_code_hash: H256,
    pools: DashMap<Address, V3Pool>,
}

impl StaticV3PoolProvider {
    pub fn new(name: impl Into<String>, factory: Address, init_code_hash: H256) -> Self {
        Self {
            name: name.into(),
            factory,
            init_code_hash,
            pools: DashMap::new(),
        }
    }

    /// Provider using the canonical Uniswap V3 factory and pool init code hash.
    pub fn uniswap_v3(name: impl Into<String>) -> Result<Self> {
        let factory =
            Address::from_str(UNISWAP_V3_FACTORY).context("Invalid Uniswap V3 factory address")?;
        let init_code_hash = H256::from_str(UNISWAP_V3_POOL_INIT_CODE_HASH)
            .context("Invalid Uniswap V3 pool init code hash")?;
        Ok(Self::new(name, factory, init_code_hash))
    }

    pub fn with_pools(self, pools: impl IntoIterator<Item = V3Pool>) -> Self {
        for pool in pools {
            self.upsert(pool);
        }
        self
    }

    /// Inserts or replaces the snapshot of a pool.
    pub fn upsert(&self, pool: V3Pool) {
        self.pools.insert(pool.address, pool);
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[async_trait]
impl V3PoolProvider for StaticV3PoolProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_pools(
        &self,
        token_pairs: &[TokenPairWithFee],
        config: &ProviderConfig,
    ) -> Result<PoolAccessor> {
        let pools: Vec<V3Pool> = token_pairs
            .iter()
            .filter_map(|pair| {
                let location = self.get_pool_address(&pair.token_a, &pair.token_b, pair.fee);
                self.pools.get(&location.address).map(|entry| entry.value().clone())
            })
            .collect();

        debug!(
            "[{}] Resolved {}/{} pools (block {:?})",
            self.name,
            pools.len(),
            token_pairs.len(),
            config.block_number
        );
        Ok(PoolAccessor::new(pools))
    }

    fn get_pool_address(&self, token_a: &Token, token_b: &Token, fee: FeeAmount) -> PoolAddress {
        compute_v3_pool_address(self.factory, self.init_code_hash, token_a, token_b, fee)
    }
}
