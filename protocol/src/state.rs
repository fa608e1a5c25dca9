//! Client-side mirrors of the program's config and treasury accounts.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::config::MAX_FLOAT_PCT;
use crate::error::{TreasuryError, TreasuryResult};

/// Strategy ids the program knows about. Anything else is rejected.
pub const STRATEGY_YIELD_MASTER: u8 = 0;
pub const STRATEGY_LENDING: u8 = 1;
pub const STRATEGY_STAKING: u8 = 2;

pub const KNOWN_STRATEGIES: [u8; 3] = [STRATEGY_YIELD_MASTER, STRATEGY_LENDING, STRATEGY_STAKING];

/// Human name of a known strategy id.
pub fn strategy_name(id: u8) -> Option<&'static str> {
    match id {
        STRATEGY_YIELD_MASTER => Some("yield_master"),
        STRATEGY_LENDING => Some("lending"),
        STRATEGY_STAKING => Some("staking"),
        _ => None,
    }
}

/// The program's config account: float bounds, active strategy, authorities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPda {
    /// Lower float bound, percent of supply.
    pub float_min_pct: u8,
    /// Upper float bound, percent of supply.
    pub float_max_pct: u8,
    pub strategy_id: u8,
    /// Opaque risk parameter passed through to the strategy.
    pub risk_param: u16,
    pub authority: Address,
    /// Signer allowed to act on the authority's behalf (e.g. the rebalance
    /// bot). `None` means only the authority signs.
    pub delegated_signer: Option<Address>,
}

impl ConfigPda {
    /// `0 <= float_min_pct < float_max_pct <= 90` and a known strategy.
    pub fn validate(&self) -> TreasuryResult<()> {
        if self.float_min_pct >= self.float_max_pct || self.float_max_pct > MAX_FLOAT_PCT {
            return Err(TreasuryError::FloatBoundsViolation {
                min_pct: self.float_min_pct,
                max_pct: self.float_max_pct,
            });
        }
        if !KNOWN_STRATEGIES.contains(&self.strategy_id) {
            return Err(TreasuryError::StrategyNotAvailable(self.strategy_id));
        }
        Ok(())
    }

    /// True if `signer` may act for this config.
    pub fn is_authorized(&self, signer: &Address) -> bool {
        *signer == self.authority || self.delegated_signer.as_ref() == Some(signer)
    }
}

/// The program's aggregate reserve/supply mirror.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryPda {
    pub usdc_balance: u64,
    pub pusd_supply: u64,
}
