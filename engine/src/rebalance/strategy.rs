//! Yield strategies and the registry of installed ones.
//!
//! A strategy only builds instruction legs; the runner bundles, signs, and
//! submits them. Strategy vaults count toward reserves, so moving float in
//! or out of a strategy never touches the peg.

use std::collections::BTreeMap;
use std::sync::Arc;

use pusd_protocol::address::Address;
use pusd_protocol::asset::AssetKind;
use pusd_protocol::error::{TreasuryError, TreasuryResult};
use pusd_protocol::instruction::Instruction;
use pusd_protocol::pda::ProgramAddresses;
use pusd_protocol::state::{strategy_name, KNOWN_STRATEGIES};

pub trait YieldStrategy: Send + Sync {
    fn id(&self) -> u8;

    fn name(&self) -> &str;

    /// Base-asset account holding the funds deployed in this strategy.
    fn vault(&self) -> Address;

    /// Legs moving `amount` base units from `from` into the strategy.
    fn invest(&self, from: Address, amount: u64) -> Vec<Instruction>;

    /// Legs moving `amount` base units out of the strategy to `to`.
    fn withdraw(&self, to: Address, amount: u64) -> Vec<Instruction>;
}

/// A strategy that parks funds in a dedicated vault account.
#[derive(Debug, Clone)]
pub struct VaultStrategy {
    id: u8,
    name: String,
    vault: Address,
}

impl VaultStrategy {
    pub fn new(id: u8, name: impl Into<String>, vault: Address) -> Self {
        Self {
            id,
            name: name.into(),
            vault,
        }
    }

    /// The strategy for `id`, parked in its program-derived vault.
    pub fn derived(id: u8, pdas: &ProgramAddresses) -> TreasuryResult<Self> {
        let name = strategy_name(id).ok_or(TreasuryError::StrategyNotAvailable(id))?;
        Ok(Self::new(id, name, pdas.strategy_vault(id)?.0))
    }
}

impl YieldStrategy for VaultStrategy {
    fn id(&self) -> u8 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn vault(&self) -> Address {
        self.vault
    }

    fn invest(&self, from: Address, amount: u64) -> Vec<Instruction> {
        vec![
            Instruction::CreateTokenAccount {
                owner: self.vault,
                asset: AssetKind::Base,
            },
            Instruction::Transfer {
                asset: AssetKind::Base,
                from,
                to: self.vault,
                amount,
            },
        ]
    }

    fn withdraw(&self, to: Address, amount: u64) -> Vec<Instruction> {
        vec![Instruction::Transfer {
            asset: AssetKind::Base,
            from: self.vault,
            to,
            amount,
        }]
    }
}

/// Installed strategies by id. Only ids from the known set are accepted.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<u8, Arc<dyn YieldStrategy>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.strategies.keys()).finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every known strategy as a [`VaultStrategy`] over its derived vault.
    pub fn with_vault_strategies(pdas: &ProgramAddresses) -> TreasuryResult<Self> {
        let mut registry = Self::new();
        for id in KNOWN_STRATEGIES {
            registry.register(Arc::new(VaultStrategy::derived(id, pdas)?))?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, strategy: Arc<dyn YieldStrategy>) -> TreasuryResult<()> {
        let id = strategy.id();
        if !KNOWN_STRATEGIES.contains(&id) {
            return Err(TreasuryError::StrategyNotAvailable(id));
        }
        self.strategies.insert(id, strategy);
        Ok(())
    }

    pub fn get(&self, id: u8) -> TreasuryResult<Arc<dyn YieldStrategy>> {
        self.strategies
            .get(&id)
            .cloned()
            .ok_or(TreasuryError::StrategyNotAvailable(id))
    }

    pub fn vaults(&self) -> Vec<Address> {
        self.strategies.values().map(|s| s.vault()).collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
