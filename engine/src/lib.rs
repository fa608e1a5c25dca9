//! # pUSD Engine: Treasury Workflows
//!
//! Multi-step workflows built on the `pusd-protocol` primitives. Each one
//! turns a caller's intent into exactly one instruction bundle per ledger
//! round trip, and re-reads confirmed state afterwards instead of trusting
//! its own arithmetic.
//!
//! - **Treasury**: a single deposit/withdraw path parameterized by actor
//!   role. USDC in and pUSD out, or pUSD burned and USDC released with the
//!   withdrawal fee routed to the yield account.
//! - **Revocable**: durable registry of corporate-to-employee transfers that
//!   may still be revoked inside their window.
//! - **Confidential**: the configure → deposit → transfer → apply →
//!   withdraw cycle over an injectable `ConfidentialLedger`.
//! - **Payroll**: schedule and thaw of merkle-committed payroll batches held
//!   in per-batch escrow accounts.
//! - **Rebalance**: float-ratio policy, yield strategies, and the periodic
//!   loop that applies them.
//!
//! ## Design Principles
//!
//! 1. Validate first, submit once. No leg of an operation is ever sent on
//!    its own.
//! 2. A lost response is not a failure. Re-query before concluding anything.
//! 3. Lifecycle stages are enum variants (`BatchStatus`, `CycleStep`).
//! 4. Every collaborator (ledger, confidential ledger, compensation,
//!    storage) is injected. There are no singletons.

pub mod confidential;
pub mod payroll;
pub mod rebalance;
pub mod revocable;
pub mod treasury;

use pusd_protocol::config::TreasuryConfig;
use pusd_protocol::peg::{PegLedger, ReserveAccounts};
use pusd_protocol::TreasuryResult;

use crate::rebalance::StrategyRegistry;

pub use confidential::{ConfidentialLedger, ConfidentialTransferWorkflow};
pub use payroll::{BatchStatus, PayrollBatch, PayrollEscrow};
pub use rebalance::{RebalanceDecision, Rebalancer};
pub use revocable::{CompensationHook, LogOnlyCompensation, RevocableRegistry, RevocableTransaction};
pub use treasury::{OperationPlan, OperationReceipt, TreasuryService};

/// Builds the peg ledger for `config`, counting every installed strategy
/// vault as reserves.
pub fn peg_ledger(config: &TreasuryConfig, strategies: &StrategyRegistry) -> TreasuryResult<PegLedger> {
    let accounts = strategies
        .vaults()
        .into_iter()
        .fold(ReserveAccounts::from_config(config)?, ReserveAccounts::with_strategy_vault);
    Ok(PegLedger::new(accounts, config.unit_converter()?))
}
