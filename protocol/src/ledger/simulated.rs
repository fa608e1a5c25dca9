//! In-process ledger with the chain's all-or-nothing bundle semantics.
//!
//! A bundle is applied to a copy of the state and committed only if every
//! instruction succeeds. Signatures are verified; program-side authority
//! checks are not modelled. Backs the CLI's local network and the tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::{Confirmation, LedgerClient};
use crate::address::Address;
use crate::asset::AssetKind;
use crate::error::{TreasuryError, TreasuryResult};
use crate::instruction::{Instruction, SignedBundle};

/// Everything the simulated chain knows. Exported as a snapshot so a local
/// network can persist between process runs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Token accounts by `(owner, asset)`. Presence means the account exists.
    pub accounts: BTreeMap<(Address, AssetKind), u64>,
    /// Pegged supply in atomic units.
    pub supply: u64,
    pub slot: u64,
    /// Processed bundles by signature.
    pub processed: BTreeMap<String, Confirmation>,
}

impl LedgerState {
    fn balance(&self, owner: &Address, asset: AssetKind) -> u64 {
        self.accounts.get(&(*owner, asset)).copied().unwrap_or(0)
    }

    fn debit(&mut self, owner: &Address, asset: AssetKind, amount: u64) -> Result<(), String> {
        let balance = self
            .accounts
            .get_mut(&(*owner, asset))
            .ok_or_else(|| format!("{asset} account of {owner} does not exist"))?;
        let held = *balance;
        *balance = held
            .checked_sub(amount)
            .ok_or_else(|| format!("{asset} account of {owner} holds {held}, needs {amount}"))?;
        Ok(())
    }

    fn credit(&mut self, owner: &Address, asset: AssetKind, amount: u64) -> Result<(), String> {
        let balance = self
            .accounts
            .get_mut(&(*owner, asset))
            .ok_or_else(|| format!("{asset} account of {owner} does not exist"))?;
        let held = *balance;
        *balance = held
            .checked_add(amount)
            .ok_or_else(|| format!("{asset} account of {owner} would overflow"))?;
        Ok(())
    }

    fn apply(&mut self, instruction: &Instruction) -> Result<(), String> {
        match instruction {
            Instruction::CreateTokenAccount { owner, asset } => {
                self.accounts.entry((*owner, *asset)).or_insert(0);
            }
            Instruction::Transfer { asset, from, to, amount } => {
                if *amount == 0 {
                    return Err("zero-amount transfer".into());
                }
                if !self.accounts.contains_key(&(*to, *asset)) {
                    return Err(format!("{asset} account of {to} does not exist"));
                }
                self.debit(from, *asset, *amount)?;
                self.credit(to, *asset, *amount)?;
            }
            Instruction::MintTo { to, amount } => {
                if *amount == 0 {
                    return Err("zero-amount mint".into());
                }
                self.supply = self
                    .supply
                    .checked_add(*amount)
                    .ok_or("pegged supply would overflow")?;
                self.credit(to, AssetKind::Pegged, *amount)?;
            }
            Instruction::Burn { from, amount } => {
                if *amount == 0 {
                    return Err("zero-amount burn".into());
                }
                self.debit(from, AssetKind::Pegged, *amount)?;
                self.supply = self
                    .supply
                    .checked_sub(*amount)
                    .ok_or("burn exceeds pegged supply")?;
            }
            Instruction::CloseTokenAccount { owner, asset } => match self.accounts.get(&(*owner, *asset)) {
                None => return Err(format!("{asset} account of {owner} does not exist")),
                Some(0) => {
                    self.accounts.remove(&(*owner, *asset));
                }
                Some(balance) => {
                    return Err(format!("cannot close {asset} account of {owner} holding {balance}"))
                }
            },
        }
        Ok(())
    }
}

/// A [`LedgerClient`] that lives in memory.
#[derive(Debug, Default)]
pub struct SimulatedLedger {
    state: Mutex<LedgerState>,
    drop_next_response: AtomicBool,
    fail_next_submission: AtomicBool,
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: LedgerState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> LedgerState {
        self.state.lock().clone()
    }

    pub fn restore(&self, state: LedgerState) {
        *self.state.lock() = state;
    }

    /// Credits `amount` to `owner`, creating the account if needed. Pegged
    /// airdrops are mints and raise supply.
    pub fn airdrop(&self, owner: &Address, asset: AssetKind, amount: u64) {
        let mut state = self.state.lock();
        let balance = state.accounts.entry((*owner, asset)).or_insert(0);
        *balance = balance.saturating_add(amount);
        if asset == AssetKind::Pegged {
            state.supply = state.supply.saturating_add(amount);
        }
    }

    /// The next submission is applied but its response is lost.
    pub fn drop_next_response(&self) {
        self.drop_next_response.store(true, Ordering::SeqCst);
    }

    /// The next submission never reaches the ledger.
    pub fn fail_next_submission(&self) {
        self.fail_next_submission.store(true, Ordering::SeqCst);
    }

    /// Moves pegged balance from the public side of `owner`'s token account
    /// into its confidential extension. Supply is unchanged.
    pub fn shield(&self, owner: &Address, amount: u64) -> TreasuryResult<()> {
        self.state
            .lock()
            .debit(owner, AssetKind::Pegged, amount)
            .map_err(TreasuryError::LedgerRejected)
    }

    /// Moves pegged balance back out of the confidential extension.
    pub fn unshield(&self, owner: &Address, amount: u64) -> TreasuryResult<()> {
        let mut state = self.state.lock();
        state.accounts.entry((*owner, AssetKind::Pegged)).or_insert(0);
        state
            .credit(owner, AssetKind::Pegged, amount)
            .map_err(TreasuryError::LedgerRejected)
    }

    fn apply_bundle(&self, bundle: &SignedBundle) -> TreasuryResult<Confirmation> {
        if !bundle.verify() {
            return Err(TreasuryError::LedgerRejected("signature verification failed".into()));
        }
        let signature = bundle.id();
        let mut state = self.state.lock();
        if state.processed.contains_key(&signature) {
            return Err(TreasuryError::LedgerRejected(format!("{signature} already processed")));
        }

        let mut next = state.clone();
        for (index, instruction) in bundle.bundle.instructions.iter().enumerate() {
            next.apply(instruction).map_err(|reason| {
                TreasuryError::LedgerRejected(format!("instruction {index}: {reason}"))
            })?;
        }
        next.slot += 1;
        let confirmation = Confirmation {
            signature: signature.clone(),
            slot: next.slot,
        };
        next.processed.insert(signature, confirmation.clone());
        *state = next;
        Ok(confirmation)
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn submit(&self, bundle: &SignedBundle) -> TreasuryResult<Confirmation> {
        if self.fail_next_submission.swap(false, Ordering::SeqCst) {
            return Err(TreasuryError::NetworkError("connection reset before send".into()));
        }
        let confirmation = self.apply_bundle(bundle)?;
        debug!(
            signature = %confirmation.signature,
            slot = confirmation.slot,
            legs = bundle.bundle.instructions.len(),
            "simulated bundle applied"
        );
        if self.drop_next_response.swap(false, Ordering::SeqCst) {
            return Err(TreasuryError::NetworkError("response lost".into()));
        }
        Ok(confirmation)
    }

    async fn confirmation(&self, signature: &str) -> TreasuryResult<Option<Confirmation>> {
        Ok(self.state.lock().processed.get(signature).cloned())
    }

    async fn balance(&self, owner: &Address, asset: AssetKind) -> TreasuryResult<u64> {
        Ok(self.state.lock().balance(owner, asset))
    }

    async fn supply(&self) -> TreasuryResult<u64> {
        Ok(self.state.lock().supply)
    }

    async fn token_account_exists(&self, owner: &Address, asset: AssetKind) -> TreasuryResult<bool> {
        Ok(self.state.lock().accounts.contains_key(&(*owner, asset)))
    }
}
