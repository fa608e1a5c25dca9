//! The two assets of the system: USDC (base) and pUSD (pegged).

use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Which side of the peg an amount or token account belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// The reserve asset (USDC).
    Base,
    /// The minted stablecoin (pUSD).
    Pegged,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Base => write!(f, "base"),
            AssetKind::Pegged => write!(f, "pegged"),
        }
    }
}

/// Token metadata: ticker, mint address, and decimal precision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub mint: Address,
    pub decimals: u8,
}

impl Asset {
    pub fn new(symbol: &str, mint: Address, decimals: u8) -> Self {
        Self {
            symbol: symbol.to_string(),
            mint,
            decimals,
        }
    }
}
