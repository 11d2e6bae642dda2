//! # Route Marshaller
//!
//! Flat, storage-safe representations of the cached-route object graph. Addresses are
//! `0x`-prefixed lowercase hex and every large integer (reserves, liquidity, prices) is a
//! decimal string, so the JSON form never loses precision.
//!
//! `unmarshal` is all-or-nothing: a payload with a missing or malformed field is rejected
//! instead of being turned into a partially valid route.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::pools::{FeeAmount, V2Pair, V3Pool};
use crate::routes::{CachedRoute, CachedRoutes, Protocol, RoutePool, SwapRoute};
use crate::tokens::{ChainId, Token};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarshalledToken {
    pub chain_id: ChainId,
    pub address: String,
    pub decimals: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarshalledV2Pair {
    pub address: String,
    pub token0: MarshalledToken,
    pub token1: MarshalledToken,
    pub reserve0: String,
    pub reserve1: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarshalledV3Pool {
    pub address: String,
    pub token0: MarshalledToken,
    pub token1: MarshalledToken,
    pub fee: u32,
    pub sqrt_price_x96: String,
    pub liquidity: String,
    pub tick: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MarshalledPool {
    V2Pair(MarshalledV2Pair),
    V3Pool(MarshalledV3Pool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarshalledRoute {
    pub protocol: String,
    pub path: Vec<MarshalledToken>,
    pub pools: Vec<MarshalledPool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarshalledCachedRoute {
    pub route: MarshalledRoute,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarshalledCachedRoutes {
    pub routes: Vec<MarshalledCachedRoute>,
    pub chain_id: ChainId,
    pub token_in: MarshalledToken,
    pub token_out: MarshalledToken,
    pub protocols_covered: Vec<String>,
    pub block_number: u64,
    pub trade_type: String,
    pub original_amount: String,
    pub blocks_to_live: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("Invalid address in field {field}: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("Invalid integer in field {field}: {value}")]
    InvalidInteger { field: &'static str, value: String },
    #[error("Invalid value in field {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Route path has {path} tokens for {pools} pools")]
    PathMismatch { path: usize, pools: usize },
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, MarshalError> {
    Address::from_str(value).map_err(|_| MarshalError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}

fn parse_u256(field: &'static str, value: &str) -> Result<U256, MarshalError> {
    if value.is_empty() {
        return Err(MarshalError::MissingField(field));
    }
    U256::from_dec_str(value).map_err(|_| MarshalError::InvalidInteger {
        field,
        value: value.to_string(),
    })
}

// ==================== TOKENS ====================

impl From<&Token> for MarshalledToken {
    fn from(token: &Token) -> Self {
        Self {
            chain_id: token.chain_id,
            address: format!("{:#x}", token.address),
            decimals: token.decimals,
            symbol: token.symbol.clone(),
        }
    }
}

impl TryFrom<MarshalledToken> for Token {
    type Error = MarshalError;

    fn try_from(m: MarshalledToken) -> Result<Self, Self::Error> {
        Ok(Token {
            chain_id: m.chain_id,
            address: parse_address("token.address", &m.address)?,
            decimals: m.decimals,
            symbol: m.symbol,
        })
    }
}

// ==================== POOLS ====================

impl From<&V2Pair> for MarshalledV2Pair {
    fn from(pair: &V2Pair) -> Self {
        Self {
            address: format!("{:#x}", pair.address),
            token0: (&pair.token0).into(),
            token1: (&pair.token1).into(),
            reserve0: pair.reserve0.to_string(),
            reserve1: pair.reserve1.to_string(),
        }
    }
}

impl TryFrom<MarshalledV2Pair> for V2Pair {
    type Error = MarshalError;

    fn try_from(m: MarshalledV2Pair) -> Result<Self, Self::Error> {
        Ok(V2Pair {
            address: parse_address("pair.address", &m.address)?,
            token0: m.token0.try_into()?,
            token1: m.token1.try_into()?,
            reserve0: parse_u256("pair.reserve0", &m.reserve0)?,
            reserve1: parse_u256("pair.reserve1", &m.reserve1)?,
        })
    }
}

impl From<&V3Pool> for MarshalledV3Pool {
    fn from(pool: &V3Pool) -> Self {
        Self {
            address: format!("{:#x}", pool.address),
            token0: (&pool.token0).into(),
            token1: (&pool.token1).into(),
            fee: pool.fee.as_u32(),
            sqrt_price_x96: pool.sqrt_price_x96.to_string(),
            liquidity: pool.liquidity.to_string(),
            tick: pool.tick,
        }
    }
}

impl TryFrom<MarshalledV3Pool> for V3Pool {
    type Error = MarshalError;

    fn try_from(m: MarshalledV3Pool) -> Result<Self, Self::Error> {
        Ok(V3Pool {
            address: parse_address("pool.address", &m.address)?,
            token0: m.token0.try_into()?,
            token1: m.token1.try_into()?,
            fee: FeeAmount::try_from(m.fee).map_err(|reason| MarshalError::InvalidValue {
                field: "pool.fee",
                reason,
            })?,
            sqrt_price_x96: parse_u256("pool.sqrtPriceX96", &m.sqrt_price_x96)?,
            liquidity: parse_u256("pool.liquidity", &m.liquidity)?,
            tick: m.tick,
        })
    }
}

impl From<&RoutePool> for MarshalledPool {
    fn from(pool: &RoutePool) -> Self {
        match pool {
            RoutePool::V2(pair) => MarshalledPool::V2Pair(pair.into()),
            RoutePool::V3(pool) => MarshalledPool::V3Pool(pool.into()),
        }
    }
}

impl TryFrom<MarshalledPool> for RoutePool {
    type Error = MarshalError;

    fn try_from(m: MarshalledPool) -> Result<Self, Self::Error> {
        match m {
            MarshalledPool::V2Pair(pair) => Ok(RoutePool::V2(pair.try_into()?)),
            MarshalledPool::V3Pool(pool) => Ok(RoutePool::V3(pool.try_into()?)),
        }
    }
}

// ==================== ROUTES ====================

impl From<&SwapRoute> for MarshalledRoute {
    fn from(route: &SwapRoute) -> Self {
        Self {
            protocol: route.protocol.to_string(),
            path: route.path.iter().map(MarshalledToken::from).collect(),
            pools: route.pools.iter().map(MarshalledPool::from).collect(),
        }
    }
}

impl TryFrom<MarshalledRoute> for SwapRoute {
    type Error = MarshalError;

    fn try_from(m: MarshalledRoute) -> Result<Self, Self::Error> {
        if m.pools.is_empty() {
            return Err(MarshalError::MissingField("route.pools"));
        }
        if m.path.len() != m.pools.len() + 1 {
            return Err(MarshalError::PathMismatch {
                path: m.path.len(),
                pools: m.pools.len(),
            });
        }

        Ok(SwapRoute {
            protocol: m.protocol.parse().map_err(|reason| MarshalError::InvalidValue {
                field: "route.protocol",
                reason,
            })?,
            path: m.path.into_iter().map(Token::try_from).collect::<Result<_, _>>()?,
            pools: m.pools.into_iter().map(RoutePool::try_from).collect::<Result<_, _>>()?,
        })
    }
}

impl From<&CachedRoute> for MarshalledCachedRoute {
    fn from(route: &CachedRoute) -> Self {
        Self {
            route: (&route.route).into(),
            percent: route.percent,
        }
    }
}

impl TryFrom<MarshalledCachedRoute> for CachedRoute {
    type Error = MarshalError;

    fn try_from(m: MarshalledCachedRoute) -> Result<Self, Self::Error> {
        if m.percent > 100 {
            return Err(MarshalError::InvalidValue {
                field: "route.percent",
                reason: format!("{} exceeds 100", m.percent),
            });
        }
        Ok(CachedRoute {
            route: m.route.try_into()?,
            percent: m.percent,
        })
    }
}

/// Flattens cached routes into their storage form.
pub fn marshal(routes: &CachedRoutes) -> MarshalledCachedRoutes {
    MarshalledCachedRoutes {
        routes: routes.routes.iter().map(MarshalledCachedRoute::from).collect(),
        chain_id: routes.chain_id,
        token_in: (&routes.token_in).into(),
        token_out: (&routes.token_out).into(),
        protocols_covered: routes.protocols_covered.iter().map(Protocol::to_string).collect(),
        block_number: routes.block_number,
        trade_type: routes.trade_type.to_string(),
        original_amount: routes.original_amount.clone(),
        blocks_to_live: routes.blocks_to_live,
    }
}

/// Rebuilds cached routes from their storage form.
pub fn unmarshal(m: MarshalledCachedRoutes) -> Result<CachedRoutes, MarshalError> {
    if m.routes.is_empty() {
        return Err(MarshalError::MissingField("routes"));
    }
    if m.original_amount.is_empty() {
        return Err(MarshalError::MissingField("originalAmount"));
    }

    let protocols_covered = m
        .protocols_covered
        .iter()
        .map(|p| {
            p.parse::<Protocol>().map_err(|reason| MarshalError::InvalidValue {
                field: "protocolsCovered",
                reason,
            })
        })
        .collect::<Result<_, _>>()?;

    Ok(CachedRoutes {
        routes: m.routes.into_iter().map(CachedRoute::try_from).collect::<Result<_, _>>()?,
        chain_id: m.chain_id,
        token_in: m.token_in.try_into()?,
        token_out: m.token_out.try_into()?,
        protocols_covered,
        block_number: m.block_number,
        trade_type: m.trade_type.parse().map_err(|_| MarshalError::InvalidValue {
            field: "tradeType",
            reason: format!("unknown trade type {}", m.trade_type),
        })?,
        original_amount: m.original_amount,
        blocks_to_live: m.blocks_to_live,
    })
}
