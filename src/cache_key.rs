//! Cache identity for a routing request: (tokenIn, tokenOut, tradeType, chainId).

use std::fmt;
use std::str::FromStr;

use crate::routes::CachedRoutes;
use crate::tokens::{ChainId, Token, TradeType};

/// Identity of a routing request for caching purposes.
///
/// The string form is `{tokenIn}-{tokenOut}-{tradeType}-{chainId}` and is used verbatim
/// as the storage partition key, so the field order must never change. Address-shaped token
/// ids are stored lowercase so checksummed and plain spellings share a partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub token_in: String,
    pub token_out: String,
    pub trade_type: TradeType,
    pub chain_id: ChainId,
}

impl CacheKey {
    pub fn new(
        token_in: impl Into<String>,
        token_out: impl Into<String>,
        trade_type: TradeType,
        chain_id: ChainId,
    ) -> Self {
        Self {
            token_in: normalize_token_id(token_in.into()),
            token_out: normalize_token_id(token_out.into()),
            trade_type,
            chain_id,
        }
    }

    /// Key for a pair of resolved tokens, identified by address.
    pub fn for_tokens(token_in: &Token, token_out: &Token, trade_type: TradeType) -> Self {
        Self::new(token_in.cache_id(), token_out.cache_id(), trade_type, token_in.chain_id)
    }

    /// Re-derives the key a cached route was computed for.
    pub fn from_cached_routes(routes: &CachedRoutes) -> Self {
        Self::new(
            routes.token_in.cache_id(),
            routes.token_out.cache_id(),
            routes.trade_type,
            routes.chain_id,
        )
    }
}

/// Lowercases `0x`-prefixed 20-byte hex addresses; any other id is kept as given.
fn normalize_token_id(id: String) -> String {
    let is_address = id.len() == 42
        && (id.starts_with("0x") || id.starts_with("0X"))
        && id[2..].bytes().all(|b| b.is_ascii_hexdigit());
    if is_address {
        id.to_ascii_lowercase().replacen("0X", "0x", 1)
    } else {
        id
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.token_in, self.token_out, self.trade_type, self.chain_id
        )
    }
}

impl FromStr for CacheKey {
    type Err = CacheKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // chain id and trade type never contain '-', so split from the right
        let mut parts = s.rsplitn(3, '-');
        let chain_id = parts.next().ok_or_else(|| CacheKeyError::Malformed(s.to_string()))?;
        let trade_type = parts.next().ok_or_else(|| CacheKeyError::Malformed(s.to_string()))?;
        let pair = parts.next().ok_or_else(|| CacheKeyError::Malformed(s.to_string()))?;
        let (token_in, token_out) = pair
            .split_once('-')
            .ok_or_else(|| CacheKeyError::Malformed(s.to_string()))?;

        if token_in.is_empty() || token_out.is_empty() {
            return Err(CacheKeyError::Malformed(s.to_string()));
        }

        Ok(Self::new(
            token_in,
            token_out,
            trade_type
                .parse()
                .map_err(|_| CacheKeyError::InvalidTradeType(trade_type.to_string()))?,
            chain_id
                .parse()
                .map_err(|_| CacheKeyError::InvalidChainId(chain_id.to_string()))?,
        ))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheKeyError {
    #[error("Malformed cache key: {0}")]
    Malformed(String),
    #[error("Invalid trade type in cache key: {0}")]
    InvalidTradeType(String),
    #[error("Invalid chain id in cache key: {0}")]
    InvalidChainId(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::fixtures::{cached_routes, usdc, weth};

    #[test]
    fn test_display_uses_fixed_field_order() {
        let key = CacheKey::new("USDC", "WETH", TradeType::ExactIn, 1);
        assert_eq!(key.to_string(), "USDC-WETH-ExactIn-1");
    }

    #[test]
    fn test_identical_attributes_produce_identical_keys() {
        let a = CacheKey::new("0xabc", "0xdef", TradeType::ExactOut, 42161);
        let b = CacheKey::new(String::from("0xabc"), "0xdef", TradeType::ExactOut, 42161);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_direction_matters() {
        let forward = CacheKey::new("USDC", "WETH", TradeType::ExactIn, 1);
        let backward = CacheKey::new("WETH", "USDC", TradeType::ExactIn, 1);
        assert_ne!(forward.to_string(), backward.to_string());
    }

    #[test]
    fn test_parse_round_trip() {
        let key = CacheKey::new(
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
            "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2",
            TradeType::ExactOut,
            1,
        );
        let parsed: CacheKey = key.to_string().parse().unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_checksummed_address_matches_token_key() {
        let checksummed = CacheKey::new(
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
            TradeType::ExactIn,
            1,
        );
        let from_tokens = CacheKey::for_tokens(&usdc(), &weth(), TradeType::ExactIn);
        assert_eq!(checksummed, from_tokens);
        assert_eq!(
            checksummed.to_string(),
            "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48-0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2-ExactIn-1"
        );
    }

    #[test]
    fn test_non_address_ids_are_kept_verbatim() {
        let key = CacheKey::new("USDC", "0xABC", TradeType::ExactIn, 1);
        assert_eq!(key.token_in, "USDC");
        assert_eq!(key.token_out, "0xABC");
    }

    #[test]
    fn test_key_rederives_from_cached_routes() {
        let routes = cached_routes(100, 10);
        assert_eq!(routes.cache_key(), CacheKey::for_tokens(&usdc(), &weth(), TradeType::ExactIn));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("USDC-WETH".parse::<CacheKey>().is_err());
        assert!("USDC-WETH-Sideways-1".parse::<CacheKey>().is_err());
        assert!("USDC-WETH-ExactIn-mainnet".parse::<CacheKey>().is_err());
    }
}
