//! # Peg Ledger
//!
//! Reserves are the USDC held in the treasury vault, the corporate vault,
//! and any strategy vaults. Supply is total minted pUSD. The peg:
//!
//! ```text
//! supply == reserves x decimal_multiplier
//! ```
//!
//! Reserve state is never tracked speculatively. [`PegLedger::observe`]
//! reads it back from the ledger after a confirmed operation; the
//! `preview_*` functions compute what a pending operation *would* leave
//! behind so validation can fail before anything is submitted.
//!
//! The yield account that collects fees is outside the reserves: a fee is
//! USDC leaving the vault together with the net payout, matched by the burn.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::account::Role;
use crate::address::Address;
use crate::asset::AssetKind;
use crate::config::TreasuryConfig;
use crate::error::{TreasuryError, TreasuryResult};
use crate::ledger::LedgerClient;
use crate::pda::ProgramAddresses;
use crate::state::TreasuryPda;
use crate::units::UnitConverter;

/// The two vaults that take deposits directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReserveVault {
    /// Program treasury PDA. Employee-side reserves and the float.
    Treasury,
    /// Corporate reserve vault.
    Corporate,
}

impl std::fmt::Display for ReserveVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReserveVault::Treasury => write!(f, "treasury vault"),
            ReserveVault::Corporate => write!(f, "corporate vault"),
        }
    }
}

/// Addresses whose USDC balances make up the reserves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReserveAccounts {
    pub treasury_vault: Address,
    pub corporate_vault: Address,
    pub strategy_vaults: Vec<Address>,
    /// Fee destination. Not part of reserves.
    pub yield_account: Address,
}

impl ReserveAccounts {
    /// Derives the program-owned accounts for `config`.
    pub fn from_config(config: &TreasuryConfig) -> TreasuryResult<Self> {
        let pdas = ProgramAddresses::new(config.program_id);
        Ok(Self {
            treasury_vault: pdas.treasury()?.0,
            corporate_vault: config.corporate_vault,
            strategy_vaults: Vec::new(),
            yield_account: pdas.yield_master()?.0,
        })
    }

    /// Adds a strategy vault. Duplicates are ignored.
    pub fn with_strategy_vault(mut self, vault: Address) -> Self {
        if !self.strategy_vaults.contains(&vault) {
            self.strategy_vaults.push(vault);
        }
        self
    }

    pub fn address(&self, vault: ReserveVault) -> Address {
        match vault {
            ReserveVault::Treasury => self.treasury_vault,
            ReserveVault::Corporate => self.corporate_vault,
        }
    }

    /// The vault an actor's deposits land in and withdrawals come from.
    pub fn vault_for(role: Role) -> TreasuryResult<ReserveVault> {
        match role {
            Role::Corporate => Ok(ReserveVault::Corporate),
            Role::Employee => Ok(ReserveVault::Treasury),
            other => Err(TreasuryError::Unauthorized(format!(
                "{other} accounts cannot cross the peg"
            ))),
        }
    }
}

/// USDC balances of the reserve vaults, in base atomic units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveState {
    pub treasury_vault: u64,
    pub corporate_vault: u64,
    /// Sum over all strategy vaults.
    pub strategies: u64,
}

impl ReserveState {
    /// Immediately liquid reserves: the float.
    pub fn liquid(&self) -> Option<u64> {
        self.treasury_vault.checked_add(self.corporate_vault)
    }

    pub fn total(&self) -> Option<u64> {
        self.liquid()?.checked_add(self.strategies)
    }

    pub fn vault(&self, vault: ReserveVault) -> u64 {
        match vault {
            ReserveVault::Treasury => self.treasury_vault,
            ReserveVault::Corporate => self.corporate_vault,
        }
    }

    fn vault_mut(&mut self, vault: ReserveVault) -> &mut u64 {
        match vault {
            ReserveVault::Treasury => &mut self.treasury_vault,
            ReserveVault::Corporate => &mut self.corporate_vault,
        }
    }
}

/// Reserves and supply observed (or previewed) at one point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PegSnapshot {
    pub reserves: ReserveState,
    /// Pegged supply in pegged atomic units.
    pub supply: u64,
    pub multiplier: u64,
}

impl PegSnapshot {
    /// `reserves x multiplier`, if it fits.
    pub fn expected_supply(&self) -> Option<u64> {
        self.reserves.total()?.checked_mul(self.multiplier)
    }

    pub fn holds(&self) -> bool {
        self.expected_supply() == Some(self.supply)
    }

    /// Fails with `InvariantViolation` if the peg does not hold.
    pub fn check(&self) -> TreasuryResult<()> {
        if self.holds() {
            return Ok(());
        }
        Err(TreasuryError::InvariantViolation {
            supply: self.supply,
            reserves: self.reserves.total().unwrap_or(u64::MAX),
            multiplier: self.multiplier,
        })
    }

    /// The aggregate mirror the program keeps in its treasury account.
    /// `None` if the reserve total overflows.
    pub fn treasury_pda(&self) -> Option<TreasuryPda> {
        Some(TreasuryPda {
            usdc_balance: self.reserves.total()?,
            pusd_supply: self.supply,
        })
    }

    /// Supply expressed in base units, rounded down.
    pub fn supply_in_base(&self) -> u64 {
        self.supply / self.multiplier.max(1)
    }
}

/// Observes and previews reserve/supply state for one treasury.
#[derive(Clone, Debug)]
pub struct PegLedger {
    accounts: ReserveAccounts,
    converter: UnitConverter,
}

impl PegLedger {
    pub fn new(accounts: ReserveAccounts, converter: UnitConverter) -> Self {
        Self { accounts, converter }
    }

    pub fn accounts(&self) -> &ReserveAccounts {
        &self.accounts
    }

    pub fn converter(&self) -> &UnitConverter {
        &self.converter
    }

    /// Reads the reserve balances and supply from the ledger.
    pub async fn observe(&self, ledger: &dyn LedgerClient) -> TreasuryResult<PegSnapshot> {
        let treasury_vault = ledger.balance(&self.accounts.treasury_vault, AssetKind::Base).await?;
        let corporate_vault = ledger.balance(&self.accounts.corporate_vault, AssetKind::Base).await?;
        let mut strategies = 0u64;
        for vault in &self.accounts.strategy_vaults {
            let balance = ledger.balance(vault, AssetKind::Base).await?;
            strategies = strategies.checked_add(balance).ok_or_else(|| {
                TreasuryError::InvalidAmount("strategy reserves overflow u64".into())
            })?;
        }
        let supply = ledger.supply().await?;
        Ok(PegSnapshot {
            reserves: ReserveState {
                treasury_vault,
                corporate_vault,
                strategies,
            },
            supply,
            multiplier: self.converter.multiplier(),
        })
    }

    /// Observes and checks the peg. Violations are logged loudly and
    /// returned; nothing is corrected.
    pub async fn check(&self, ledger: &dyn LedgerClient) -> TreasuryResult<PegSnapshot> {
        let snapshot = self.observe(ledger).await?;
        if let Err(err) = snapshot.check() {
            error!(
                supply = snapshot.supply,
                reserves = ?snapshot.reserves,
                multiplier = snapshot.multiplier,
                "peg invariant violated"
            );
            return Err(err);
        }
        Ok(snapshot)
    }

    /// State after depositing `base_units` into `vault` and minting the
    /// matching supply.
    pub fn preview_deposit(
        &self,
        current: &PegSnapshot,
        vault: ReserveVault,
        base_units: u64,
    ) -> TreasuryResult<PegSnapshot> {
        let minted = self.converter.base_to_pegged(base_units)?;
        let mut next = *current;
        let slot = next.reserves.vault_mut(vault);
        *slot = slot
            .checked_add(base_units)
            .ok_or_else(|| TreasuryError::InvalidAmount(format!("{vault} balance overflows u64")))?;
        next.supply = next
            .supply
            .checked_add(minted)
            .ok_or_else(|| TreasuryError::InvalidAmount("pegged supply overflows u64".into()))?;
        Ok(next)
    }

    /// State after paying `base_gross` (net plus fee) out of `vault` and
    /// burning the matching supply.
    pub fn preview_withdraw(
        &self,
        current: &PegSnapshot,
        vault: ReserveVault,
        base_gross: u64,
    ) -> TreasuryResult<PegSnapshot> {
        let burned = self.converter.base_to_pegged(base_gross)?;
        let available = current.reserves.vault(vault);
        if available < base_gross {
            return Err(TreasuryError::InsufficientBalance {
                account: vault.to_string(),
                available,
                required: base_gross,
            });
        }
        if current.supply < burned {
            return Err(TreasuryError::InsufficientBalance {
                account: "pegged supply".into(),
                available: current.supply,
                required: burned,
            });
        }
        let mut next = *current;
        *next.reserves.vault_mut(vault) = available - base_gross;
        next.supply = current.supply - burned;
        Ok(next)
    }
}
