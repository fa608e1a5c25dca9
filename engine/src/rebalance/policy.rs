//! The rebalance decision, as a pure function of reserves, supply, and bounds.
//!
//! Both amounts are in base atomic units. Comparisons against the bounds are
//! exact (`reserves * 100` against `supply * pct`); only the reported ratio
//! is rounded down.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RebalanceDecision {
    /// Float above the upper bound: move `amount` into the strategy.
    InvestSurplus { amount: u64 },
    /// Float below the lower bound: pull `amount` out of the strategy.
    WithdrawDeficit { amount: u64 },
    NoAction,
}

impl RebalanceDecision {
    pub fn amount(&self) -> u64 {
        match self {
            RebalanceDecision::InvestSurplus { amount } | RebalanceDecision::WithdrawDeficit { amount } => *amount,
            RebalanceDecision::NoAction => 0,
        }
    }
}

impl std::fmt::Display for RebalanceDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebalanceDecision::InvestSurplus { amount } => write!(f, "invest surplus of {amount}"),
            RebalanceDecision::WithdrawDeficit { amount } => write!(f, "withdraw deficit of {amount}"),
            RebalanceDecision::NoAction => write!(f, "no action"),
        }
    }
}

/// `reserves * 100 / supply`, rounded down; 0 when supply is 0.
pub fn float_ratio_pct(reserves: u64, supply: u64) -> u64 {
    if supply == 0 {
        return 0;
    }
    let ratio = u128::from(reserves) * 100 / u128::from(supply);
    u64::try_from(ratio).unwrap_or(u64::MAX)
}

/// Decides what to do with `reserves` of float against `supply`.
///
/// - above `max_pct`: invest `reserves - floor(supply * max / 100)`
/// - below `min_pct`: withdraw `ceil(supply * min / 100) - reserves`
/// - otherwise, or when the amount would be zero: no action
pub fn decide(reserves: u64, supply: u64, min_pct: u8, max_pct: u8) -> RebalanceDecision {
    if supply == 0 {
        return RebalanceDecision::NoAction;
    }
    let scaled_reserves = u128::from(reserves) * 100;
    let supply = u128::from(supply);

    if scaled_reserves > supply * u128::from(max_pct) {
        let target = supply * u128::from(max_pct) / 100;
        let amount = u128::from(reserves).saturating_sub(target);
        return non_zero(amount, |amount| RebalanceDecision::InvestSurplus { amount });
    }
    if scaled_reserves < supply * u128::from(min_pct) {
        let target = (supply * u128::from(min_pct)).div_ceil(100);
        let amount = target.saturating_sub(u128::from(reserves));
        return non_zero(amount, |amount| RebalanceDecision::WithdrawDeficit { amount });
    }
    RebalanceDecision::NoAction
}

fn non_zero(amount: u128, make: impl FnOnce(u64) -> RebalanceDecision) -> RebalanceDecision {
    match u64::try_from(amount) {
        Ok(0) => RebalanceDecision::NoAction,
        Ok(amount) => make(amount),
        Err(_) => make(u64::MAX),
    }
}
