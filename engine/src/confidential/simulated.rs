//! In-process confidential balances.
//!
//! Public balances stay in the wrapped [`SimulatedLedger`]; this type adds
//! the pending and available confidential sides of each token account.
//! Moving between public and confidential never changes supply.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use pusd_protocol::address::Address;
use pusd_protocol::asset::AssetKind;
use pusd_protocol::error::{TreasuryError, TreasuryResult};
use pusd_protocol::ledger::{LedgerClient, SimulatedLedger};

use super::ConfidentialLedger;

/// Confidential sides of one token account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidentialBalances {
    pub pending: u64,
    pub available: u64,
}

/// Exportable copy of every configured account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidentialState {
    pub accounts: BTreeMap<Address, ConfidentialBalances>,
}

pub struct SimulatedConfidentialLedger {
    public: Arc<SimulatedLedger>,
    // Presence means the account is configured.
    accounts: DashMap<Address, ConfidentialBalances>,
}

impl std::fmt::Debug for SimulatedConfidentialLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedConfidentialLedger")
            .field("accounts", &self.accounts.len())
            .finish_non_exhaustive()
    }
}

impl SimulatedConfidentialLedger {
    pub fn new(public: Arc<SimulatedLedger>) -> Self {
        Self {
            public,
            accounts: DashMap::new(),
        }
    }

    pub fn from_state(public: Arc<SimulatedLedger>, state: ConfidentialState) -> Self {
        Self {
            public,
            accounts: state.accounts.into_iter().collect(),
        }
    }

    pub fn snapshot(&self) -> ConfidentialState {
        ConfidentialState {
            accounts: self.accounts.iter().map(|e| (*e.key(), *e.value())).collect(),
        }
    }

    pub fn balances(&self, owner: &Address) -> Option<ConfidentialBalances> {
        self.accounts.get(owner).map(|e| *e.value())
    }

    fn require_configured(&self, owner: &Address) -> TreasuryResult<ConfidentialBalances> {
        self.balances(owner)
            .ok_or_else(|| TreasuryError::AccountNotConfigured(owner.to_string()))
    }

    fn signature() -> String {
        format!("sim-{}", Uuid::new_v4().simple())
    }
}

fn require_positive(amount: u64) -> TreasuryResult<()> {
    if amount == 0 {
        return Err(TreasuryError::InvalidAmount("confidential amount must be positive".into()));
    }
    Ok(())
}

fn overflow(owner: &Address) -> TreasuryError {
    TreasuryError::InvalidAmount(format!("confidential balance of {owner} overflows u64"))
}

#[async_trait]
impl ConfidentialLedger for SimulatedConfidentialLedger {
    async fn configure_account(&self, owner: &Address) -> TreasuryResult<Option<String>> {
        if self.accounts.contains_key(owner) {
            return Ok(None);
        }
        self.accounts.insert(*owner, ConfidentialBalances::default());
        debug!(%owner, "confidential account configured");
        Ok(Some(Self::signature()))
    }

    async fn deposit(&self, owner: &Address, amount: u64) -> TreasuryResult<String> {
        require_positive(amount)?;
        let current = self.require_configured(owner)?;
        let pending = current.pending.checked_add(amount).ok_or_else(|| overflow(owner))?;
        let public = self.public.balance(owner, AssetKind::Pegged).await?;
        if public < amount {
            return Err(TreasuryError::InsufficientBalance {
                account: owner.to_string(),
                available: public,
                required: amount,
            });
        }
        self.public.shield(owner, amount)?;
        if let Some(mut entry) = self.accounts.get_mut(owner) {
            entry.pending = pending;
        }
        Ok(Self::signature())
    }

    async fn transfer(&self, from: &Address, to: &Address, amount: u64) -> TreasuryResult<String> {
        require_positive(amount)?;
        let source = self.require_configured(from)?;
        let destination = self.require_configured(to)?;
        if source.available < amount {
            return Err(TreasuryError::InsufficientBalance {
                account: format!("confidential balance of {from}"),
                available: source.available,
                required: amount,
            });
        }
        let credited = destination.pending.checked_add(amount).ok_or_else(|| overflow(to))?;
        if let Some(mut entry) = self.accounts.get_mut(from) {
            entry.available -= amount;
        }
        if let Some(mut entry) = self.accounts.get_mut(to) {
            entry.pending = credited;
        }
        Ok(Self::signature())
    }

    async fn apply_pending_balance(&self, owner: &Address) -> TreasuryResult<String> {
        let current = self.require_configured(owner)?;
        let available = current.available.checked_add(current.pending).ok_or_else(|| overflow(owner))?;
        if let Some(mut entry) = self.accounts.get_mut(owner) {
            entry.available = available;
            entry.pending = 0;
        }
        Ok(Self::signature())
    }

    async fn withdraw(&self, owner: &Address, amount: u64) -> TreasuryResult<String> {
        require_positive(amount)?;
        let current = self.require_configured(owner)?;
        if current.available < amount {
            return Err(TreasuryError::InsufficientBalance {
                account: format!("confidential balance of {owner}"),
                available: current.available,
                required: amount,
            });
        }
        self.public.unshield(owner, amount)?;
        if let Some(mut entry) = self.accounts.get_mut(owner) {
            entry.available -= amount;
        }
        Ok(Self::signature())
    }
}
