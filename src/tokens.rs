//! # Tokens and Amounts
//!
//! Minimal token and currency-amount model shared by the cache key, the bucketed
//! caching strategy and the route marshaller. Token resolution (symbol lookup,
//! decimals discovery) happens upstream; this module only carries the resolved values.

use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// EVM chain identifier (1 = Ethereum mainnet, 42161 = Arbitrum One, ...).
pub type ChainId = u64;

/// Largest power of ten that still fits in a `U256`.
const MAX_U256_EXP10: u32 = 77;

/// Direction of a quote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TradeType {
    /// The input amount is fixed, the output amount is quoted.
    ExactIn,
    /// The output amount is fixed, the input amount is quoted.
    ExactOut,
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeType::ExactIn => write!(f, "ExactIn"),
            TradeType::ExactOut => write!(f, "ExactOut"),
        }
    }
}

impl FromStr for TradeType {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ExactIn" | "exactIn" | "EXACT_INPUT" => Ok(TradeType::ExactIn),
            "ExactOut" | "exactOut" | "EXACT_OUTPUT" => Ok(TradeType::ExactOut),
            other => Err(AmountError::UnknownTradeType(other.to_string())),
        }
    }
}

/// An ERC-20 token on a specific chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub chain_id: ChainId,
    pub address: Address,
    pub decimals: u8,
    pub symbol: Option<String>,
}

impl Token {
    pub fn new(chain_id: ChainId, address: Address, decimals: u8, symbol: Option<&str>) -> Self {
        Self {
            chain_id,
            address,
            decimals,
            symbol: symbol.map(str::to_string),
        }
    }

    /// Canonical identifier used in cache keys: the lowercase `0x`-prefixed address.
    pub fn cache_id(&self) -> String {
        format!("{:#x}", self.address)
    }

    /// Uniswap-style token ordering (by address).
    pub fn sorts_before(&self, other: &Token) -> bool {
        self.address < other.address
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(symbol) => write!(f, "{}", symbol),
            None => write!(f, "{:#x}", self.address),
        }
    }
}

/// An amount of a token in its smallest unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyAmount {
    pub token: Token,
    pub raw: U256,
}

impl CurrencyAmount {
    pub fn from_raw(token: Token, raw: U256) -> Self {
        Self { token, raw }
    }

    /// Builds an amount from a human-readable value (e.g. `1.5` USDC → `1_500_000`).
    ///
    /// Digits beyond the token's precision are truncated.
    pub fn from_human(token: Token, amount: Decimal) -> Result<Self, AmountError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(AmountError::Negative(amount));
        }
        let raw = decimal_to_raw(amount, token.decimals).ok_or(AmountError::Overflow(amount))?;
        Ok(Self { token, raw })
    }

    /// Human-readable value, `None` when it does not fit a `Decimal`.
    pub fn to_human(&self) -> Option<Decimal> {
        if self.raw > U256::from(u128::MAX) {
            return None;
        }
        let raw = i128::try_from(self.raw.as_u128()).ok()?;
        Decimal::try_from_i128_with_scale(raw, u32::from(self.token.decimals))
            .ok()
            .map(|d| d.normalize())
    }

    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }
}

impl fmt::Display for CurrencyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.raw, self.token)
    }
}

/// Expands a non-negative decimal into raw units of a token with `decimals` precision.
///
/// Returns `None` for negative inputs and when the result does not fit in a `U256`.
pub fn decimal_to_raw(value: Decimal, decimals: u8) -> Option<U256> {
    if value.is_sign_negative() && !value.is_zero() {
        return None;
    }
    let mantissa = U256::from(value.mantissa().unsigned_abs());
    let scale = value.scale();
    let decimals = u32::from(decimals);

    if decimals >= scale {
        let exp = decimals - scale;
        if exp > MAX_U256_EXP10 {
            return None;
        }
        mantissa.checked_mul(U256::exp10(exp as usize))
    } else {
        let exp = scale - decimals;
        if exp > MAX_U256_EXP10 {
            return Some(U256::zero());
        }
        Some(mantissa / U256::exp10(exp as usize))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be non-negative, got {0}")]
    Negative(Decimal),
    #[error("Amount {0} overflows 256 bits at the token's precision")]
    Overflow(Decimal),
    #[error("Unknown trade type: {0}")]
    UnknownTradeType(String),
}
