//! # Cached Routes
//!
//! In-memory representation of routes produced by the external routing engine, as they are
//! persisted in the route cache. Freshness is measured in blocks: an entry computed at block
//! `N` with `blocks_to_live = T` may serve requests up to and including block `N + T`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::cache_key::CacheKey;
use crate::pools::{V2Pair, V3Pool};
use crate::tokens::{ChainId, Token, TradeType};

/// Liquidity protocol a route (or cache entry) covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    V2,
    V3,
    Mixed,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::V2 => write!(f, "V2"),
            Protocol::V3 => write!(f, "V3"),
            Protocol::Mixed => write!(f, "MIXED"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "V2" => Ok(Protocol::V2),
            "V3" => Ok(Protocol::V3),
            "MIXED" => Ok(Protocol::Mixed),
            other => Err(format!("unknown protocol {}", other)),
        }
    }
}

/// A pool a route hops through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePool {
    V2(V2Pair),
    V3(V3Pool),
}

/// A single path from the input token to the output token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRoute {
    pub protocol: Protocol,
    /// Tokens visited in order; `path.len() == pools.len() + 1`.
    pub path: Vec<Token>,
    pub pools: Vec<RoutePool>,
}

impl SwapRoute {
    pub fn input(&self) -> Option<&Token> {
        self.path.first()
    }

    pub fn output(&self) -> Option<&Token> {
        self.path.last()
    }
}

/// A route plus the share of the trade it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRoute {
    pub route: SwapRoute,
    /// Percentage of the amount routed through this path (0..=100).
    pub percent: u8,
}

impl CachedRoute {
    /// Stable identifier built from the pool addresses along the path.
    pub fn route_id(&self) -> String {
        self.route
            .pools
            .iter()
            .map(|pool| match pool {
                RoutePool::V2(p) => format!("{:#x}", p.address),
                RoutePool::V3(p) => format!("{:#x}", p.address),
            })
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Routes computed for one request at one block, as stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRoutes {
    pub routes: Vec<CachedRoute>,
    pub chain_id: ChainId,
    pub token_in: Token,
    pub token_out: Token,
    pub protocols_covered: BTreeSet<Protocol>,
    pub block_number: u64,
    pub trade_type: TradeType,
    /// Amount the routes were computed for, as a raw decimal string.
    pub original_amount: String,
    pub blocks_to_live: u64,
}

impl CachedRoutes {
    /// Last block at which this entry may still be served.
    pub fn expires_at_block(&self) -> u64 {
        self.block_number.saturating_add(self.blocks_to_live)
    }

    pub fn is_fresh(&self, current_block: u64) -> bool {
        current_block <= self.expires_at_block()
    }

    /// True when every requested protocol is covered by this entry. An empty request
    /// accepts any entry.
    pub fn covers(&self, protocols: &[Protocol]) -> bool {
        protocols.iter().all(|p| self.protocols_covered.contains(p))
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::from_cached_routes(self)
    }
}
