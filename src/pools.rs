// src/pools.rs

use ethers::abi::{encode, Token as AbiToken};
use ethers::prelude::{Address, H256, U256};
use ethers::utils::{get_create2_address_from_hash, keccak256};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::tokens::Token;

/// Uniswap V3 factory on Ethereum mainnet (same address on most L2 deployments).
pub const UNISWAP_V3_FACTORY: &str = "0x1F98431c8aD98523631AE4a59f267346ea31F984";
/// keccak256 of the Uniswap V3 pool creation code.
pub const UNISWAP_V3_POOL_INIT_CODE_HASH: &str =
    "0xe34f199b19b2b4f47f68442619d555527d244f78a3297ea89325f843f87b8b54";

/// Uniswap V3 fee tiers, in hundredths of a basis point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FeeAmount {
    Lowest,
    Low,
    Medium,
    High,
}

impl FeeAmount {
    pub const ALL: [FeeAmount; 4] = [
        FeeAmount::Lowest,
        FeeAmount::Low,
        FeeAmount::Medium,
        FeeAmount::High,
    ];

    pub fn as_u32(self) -> u32 {
        match self {
            FeeAmount::Lowest => 100,
            FeeAmount::Low => 500,
            FeeAmount::Medium => 3000,
            FeeAmount::High => 10000,
        }
    }
}

impl From<FeeAmount> for u32 {
    fn from(fee: FeeAmount) -> Self {
        fee.as_u32()
    }
}

impl TryFrom<u32> for FeeAmount {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(FeeAmount::Lowest),
            500 => Ok(FeeAmount::Low),
            3000 => Ok(FeeAmount::Medium),
            10000 => Ok(FeeAmount::High),
            other => Err(format!("unsupported fee tier {}", other)),
        }
    }
}

impl fmt::Display for FeeAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Uniswap V2-style pair (constant product).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Pair {
    pub address: Address,
    pub token0: Token,
    pub token1: Token,
    pub reserve0: U256,
    pub reserve1: U256,
}

/// Uniswap V3 pool with concentrated liquidity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V3Pool {
    pub address: Address,
    pub token0: Token,
    pub token1: Token,
    pub fee: FeeAmount,
    pub sqrt_price_x96: U256,
    pub liquidity: U256,
    pub tick: i32,
}

impl V3Pool {
    pub fn involves(&self, token: &Token) -> bool {
        self.token0.address == token.address || self.token1.address == token.address
    }
}

/// Deterministic pool location: the pool address plus its sorted tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAddress {
    pub address: Address,
    pub token0: Token,
    pub token1: Token,
}

/// Orders two tokens the way the factory does (ascending address).
pub fn sort_tokens<'a>(token_a: &'a Token, token_b: &'a Token) -> (&'a Token, &'a Token) {
    if token_a.sorts_before(token_b) {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    }
}

/// CREATE2 address of a V3 pool: `salt = keccak256(abi.encode(token0, token1, fee))`.
pub fn compute_v3_pool_address(
    factory: Address,
    init_code_hash: H256,
    token_a: &Token,
    token_b: &Token,
    fee: FeeAmount,
) -> PoolAddress {
    let (token0, token1) = sort_tokens(token_a, token_b);
    let salt = keccak256(encode(&[
        AbiToken::Address(token0.address),
        AbiToken::Address(token1.address),
        AbiToken::Uint(U256::from(fee.as_u32())),
    ]));
    let address = get_create2_address_from_hash(factory, salt, init_code_hash);

    PoolAddress {
        address,
        token0: token0.clone(),
        token1: token1.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> Token {
        Token::new(
            1,
            "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".parse().unwrap(),
            6,
            Some("USDC"),
        )
    }

    fn weth() -> Token {
        Token::new(
            1,
            "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".parse().unwrap(),
            18,
            Some("WETH"),
        )
    }

    #[test]
    fn test_usdc_weth_005_pool_address() {
        let pool = compute_v3_pool_address(
            UNISWAP_V3_FACTORY.parse().unwrap(),
            UNISWAP_V3_POOL_INIT_CODE_HASH.parse().unwrap(),
            &weth(),
            &usdc(),
            FeeAmount::Low,
        );
        let expected: Address = "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640".parse().unwrap();
        assert_eq!(pool.address, expected);
        assert_eq!(pool.token0, usdc());
        assert_eq!(pool.token1, weth());
    }

    #[test]
    fn test_pool_address_is_order_independent() {
        let factory: Address = UNISWAP_V3_FACTORY.parse().unwrap();
        let hash: H256 = UNISWAP_V3_POOL_INIT_CODE_HASH.parse().unwrap();
        let a = compute_v3_pool_address(factory, hash, &usdc(), &weth(), FeeAmount::Medium);
        let b = compute_v3_pool_address(factory, hash, &weth(), &usdc(), FeeAmount::Medium);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fee_amount_conversions() {
        for fee in FeeAmount::ALL {
            assert_eq!(FeeAmount::try_from(fee.as_u32()).unwrap(), fee);
        }
        assert!(FeeAmount::try_from(2500).is_err());
    }
}
