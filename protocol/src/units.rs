//! # Unit Conversion
//!
//! Humans type `"49.5"`. The ledger only understands `49_500_000`. This module
//! is the border crossing between the two, and it is strict about papers:
//!
//! - UI amounts are parsed as exact decimals. `"0.1"` is one tenth, not
//!   `0.1000000000000000055511151231257827`.
//! - A fraction finer than the asset's precision is rejected, not rounded.
//!   Silently dropping dust is how ledgers drift.
//! - Negative amounts and overflow are rejected with
//!   [`TreasuryError::InvalidAmount`].
//!
//! The [`UnitConverter`] also owns the decimal multiplier between the base
//! and pegged assets. The multiplier is computed from the two precisions and
//! cross-checked against the configured value; it is never assumed.

use crate::asset::Asset;
use crate::error::{TreasuryError, TreasuryResult};

/// Largest precision whose scale factor still fits in a `u64`.
pub const MAX_DECIMALS: u8 = 19;

/// Returns `10^decimals`, or an error if it does not fit in a `u64`.
pub fn scale_factor(decimals: u8) -> TreasuryResult<u64> {
    10u64.checked_pow(u32::from(decimals)).ok_or_else(|| {
        TreasuryError::InvalidAmount(format!("precision of {decimals} decimals is not representable"))
    })
}

/// Converts a UI amount string into atomic units at `decimals` precision.
///
/// Accepts plain decimal notation (`"100"`, `"49.5"`, `"0.000001"`).
/// Trailing zeros beyond the precision are tolerated (`"1.50"` at 1 decimal);
/// any other digit beyond it is an error.
pub fn to_atomic(amount_ui: &str, decimals: u8) -> TreasuryResult<u64> {
    let raw = amount_ui.trim();
    if raw.is_empty() {
        return Err(TreasuryError::InvalidAmount("empty amount".into()));
    }
    if raw.starts_with('-') {
        return Err(TreasuryError::InvalidAmount(format!("negative amount {raw}")));
    }

    let (whole, fraction) = match raw.split_once('.') {
        Some((w, f)) => (w, f),
        None => (raw, ""),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
        return Err(TreasuryError::InvalidAmount(format!("not a decimal number: {raw}")));
    }

    let precision = usize::from(decimals);
    let (kept, dropped) = if fraction.len() > precision {
        fraction.split_at(precision)
    } else {
        (fraction, "")
    };
    if dropped.bytes().any(|b| b != b'0') {
        return Err(TreasuryError::InvalidAmount(format!(
            "{raw} is not an integral number of units at {decimals} decimals"
        )));
    }

    let scale = scale_factor(decimals)?;
    let overflow = || TreasuryError::InvalidAmount(format!("{raw} overflows u64 atomic units"));

    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u64>().map_err(|_| overflow())?
    };

    let mut fraction_units: u64 = 0;
    if !kept.is_empty() {
        fraction_units = kept.parse::<u64>().map_err(|_| overflow())?;
        let pad = scale_factor(decimals - kept.len() as u8)?;
        fraction_units = fraction_units.checked_mul(pad).ok_or_else(overflow)?;
    }

    whole_units
        .checked_mul(scale)
        .and_then(|w| w.checked_add(fraction_units))
        .ok_or_else(overflow)
}

/// Converts a floating-point UI amount into atomic units.
///
/// The float is rendered with Rust's shortest round-trip formatting and then
/// parsed exactly, so `0.1` becomes one tenth rather than its binary
/// approximation. NaN, infinities, and negatives are rejected.
pub fn to_atomic_f64(amount_ui: f64, decimals: u8) -> TreasuryResult<u64> {
    if !amount_ui.is_finite() {
        return Err(TreasuryError::InvalidAmount(format!("non-finite amount {amount_ui}")));
    }
    if amount_ui < 0.0 {
        return Err(TreasuryError::InvalidAmount(format!("negative amount {amount_ui}")));
    }
    to_atomic(&format!("{amount_ui}"), decimals)
}

/// Renders atomic units as a canonical UI string (no trailing zeros).
pub fn from_atomic(units: u64, decimals: u8) -> String {
    if decimals == 0 {
        return units.to_string();
    }
    let digits = format!("{:0>width$}", units, width = usize::from(decimals) + 1);
    let (whole, fraction) = digits.split_at(digits.len() - usize::from(decimals));
    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{fraction}")
    }
}

/// Computes `10^(pegged - base)`. Fails if the pegged asset is coarser than
/// the base asset, since the multiplier would not be an integer.
pub fn decimal_multiplier(base_decimals: u8, pegged_decimals: u8) -> TreasuryResult<u64> {
    let diff = pegged_decimals.checked_sub(base_decimals).ok_or_else(|| {
        TreasuryError::InvalidConfig(format!(
            "pegged decimals ({pegged_decimals}) below base decimals ({base_decimals})"
        ))
    })?;
    scale_factor(diff).map_err(|_| {
        TreasuryError::InvalidConfig(format!("decimal gap of {diff} overflows the multiplier"))
    })
}

/// Converts between UI strings and atomic units for both assets and
/// between base and pegged atomic units.
#[derive(Clone, Debug)]
pub struct UnitConverter {
    base: Asset,
    pegged: Asset,
    multiplier: u64,
}

impl UnitConverter {
    /// Builds a converter, insisting the configured multiplier matches the
    /// one implied by the assets' decimals.
    pub fn new(base: Asset, pegged: Asset, configured_multiplier: u64) -> TreasuryResult<Self> {
        if configured_multiplier == 0 {
            return Err(TreasuryError::InvalidConfig(
                "decimal multiplier must be a positive integer".into(),
            ));
        }
        let derived = decimal_multiplier(base.decimals, pegged.decimals)?;
        if derived != configured_multiplier {
            return Err(TreasuryError::InvalidConfig(format!(
                "configured decimal multiplier {configured_multiplier} does not match \
                 10^({} - {}) = {derived}",
                pegged.decimals, base.decimals
            )));
        }
        Ok(Self {
            base,
            pegged,
            multiplier: derived,
        })
    }

    pub fn base(&self) -> &Asset {
        &self.base
    }

    pub fn pegged(&self) -> &Asset {
        &self.pegged
    }

    pub fn multiplier(&self) -> u64 {
        self.multiplier
    }

    /// UI base amount to base atomic units.
    pub fn base_to_atomic(&self, amount_ui: &str) -> TreasuryResult<u64> {
        to_atomic(amount_ui, self.base.decimals)
    }

    /// UI pegged amount to pegged atomic units.
    pub fn pegged_to_atomic(&self, amount_ui: &str) -> TreasuryResult<u64> {
        to_atomic(amount_ui, self.pegged.decimals)
    }

    /// Base atomic units to the pegged atomic units they back.
    pub fn base_to_pegged(&self, base_units: u64) -> TreasuryResult<u64> {
        base_units.checked_mul(self.multiplier).ok_or_else(|| {
            TreasuryError::InvalidAmount(format!("{base_units} base units overflow pegged supply"))
        })
    }

    /// Pegged atomic units to base atomic units. Must divide exactly: a
    /// pegged amount finer than the base precision cannot be redeemed.
    pub fn pegged_to_base(&self, pegged_units: u64) -> TreasuryResult<u64> {
        if pegged_units % self.multiplier != 0 {
            return Err(TreasuryError::InvalidAmount(format!(
                "{pegged_units} pegged units are finer than the base asset precision"
            )));
        }
        Ok(pegged_units / self.multiplier)
    }
}
