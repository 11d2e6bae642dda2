// Pool-pair snapshot cache - V2 reserves stored through the generic remote cache store

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{BlockAnchor, Cacheable};
use crate::marshaller::{MarshalError, MarshalledV2Pair};
use crate::pools::V2Pair;
use crate::tokens::ChainId;

/// Partition key for a pair snapshot; token order is normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairCacheKey {
    pub chain_id: ChainId,
    pub token0: Address,
    pub token1: Address,
}

impl PairCacheKey {
    pub fn new(chain_id: ChainId, token_a: Address, token_b: Address) -> Self {
        let (token0, token1) = if token_a < token_b {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        Self { chain_id, token0, token1 }
    }

    pub fn for_pair(pair: &V2Pair) -> Self {
        Self::new(pair.token0.chain_id, pair.token0.address, pair.token1.address)
    }
}

impl fmt::Display for PairCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pair:{}:{:#x}:{:#x}", self.chain_id, self.token0, self.token1)
    }
}

/// A pair's reserves, either pinned to the block they were read at or not yet anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairSnapshot {
    Anchored { pair: V2Pair, block_number: u64 },
    Unanchored(V2Pair),
}

impl PairSnapshot {
    pub fn pair(&self) -> &V2Pair {
        match self {
            PairSnapshot::Anchored { pair, .. } | PairSnapshot::Unanchored(pair) => pair,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarshalledPairSnapshot {
    pub pair: MarshalledV2Pair,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
}

impl Cacheable for PairSnapshot {
    type Marshalled = MarshalledPairSnapshot;

    fn anchor(&self) -> BlockAnchor {
        match self {
            PairSnapshot::Anchored { block_number, .. } => BlockAnchor::At(*block_number),
            PairSnapshot::Unanchored(_) => BlockAnchor::Unanchored,
        }
    }

    fn marshal(&self) -> Self::Marshalled {
        let block = match self {
            PairSnapshot::Anchored { block_number, .. } => Some(*block_number),
            PairSnapshot::Unanchored(_) => None,
        };
        MarshalledPairSnapshot {
            pair: self.pair().into(),
            block,
        }
    }

    fn unmarshal(marshalled: Self::Marshalled) -> Result<Self, MarshalError> {
        let pair = V2Pair::try_from(marshalled.pair)?;
        Ok(match marshalled.block {
            Some(block_number) => PairSnapshot::Anchored { pair, block_number },
            None => PairSnapshot::Unanchored(pair),
        })
    }
}
