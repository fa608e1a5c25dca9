//! # Fee Policy
//!
//! Basis-point fees on the redeem path. Corporate withdrawals pay a fee that
//! is routed to the yield account; employee withdrawals are free by default.
//! Deposits never pay. Both rates are configuration, not constants.
//!
//! Arithmetic is integer-only and floors: `fee = amount * bps / 10_000`.
//! The intermediate product is computed in `u128` so large amounts cannot
//! overflow before the division.

use serde::{Deserialize, Serialize};

use crate::account::Role;
use crate::config::{DEFAULT_CORPORATE_FEE_BPS, DEFAULT_EMPLOYEE_FEE_BPS};
use crate::error::{TreasuryError, TreasuryResult};

/// One hundred percent, in basis points.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Which way funds cross the peg.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// USDC in, pUSD minted.
    Deposit,
    /// pUSD burned, USDC out.
    Withdraw,
}

/// A gross amount split into the fee leg and the net leg.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub gross: u64,
    pub fee: u64,
    pub net: u64,
}

/// Per-role withdrawal fee rates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub corporate_withdraw_bps: u16,
    pub employee_withdraw_bps: u16,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            corporate_withdraw_bps: DEFAULT_CORPORATE_FEE_BPS,
            employee_withdraw_bps: DEFAULT_EMPLOYEE_FEE_BPS,
        }
    }
}

impl FeePolicy {
    /// Rejects rates above 100%.
    pub fn validate(&self) -> TreasuryResult<()> {
        for (label, bps) in [
            ("corporate", self.corporate_withdraw_bps),
            ("employee", self.employee_withdraw_bps),
        ] {
            if u64::from(bps) > BPS_DENOMINATOR {
                return Err(TreasuryError::InvalidConfig(format!(
                    "{label} fee of {bps} bps exceeds 100%"
                )));
            }
        }
        Ok(())
    }

    /// The rate that applies to `role` moving in `direction`.
    pub fn rate_bps(&self, role: Role, direction: Direction) -> u16 {
        match (direction, role) {
            (Direction::Withdraw, Role::Corporate) => self.corporate_withdraw_bps,
            (Direction::Withdraw, Role::Employee) => self.employee_withdraw_bps,
            _ => 0,
        }
    }

    /// Fee in atomic units for `amount` atomic units.
    pub fn compute_fee(&self, amount: u64, role: Role, direction: Direction) -> u64 {
        let bps = u128::from(self.rate_bps(role, direction));
        let fee = (u128::from(amount) * bps) / u128::from(BPS_DENOMINATOR);
        u64::try_from(fee).unwrap_or(u64::MAX)
    }

    /// Splits `amount` into fee and net legs.
    pub fn split(&self, amount: u64, role: Role, direction: Direction) -> FeeSplit {
        let fee = self.compute_fee(amount, role, direction).min(amount);
        FeeSplit {
            gross: amount,
            fee,
            net: amount - fee,
        }
    }
}
