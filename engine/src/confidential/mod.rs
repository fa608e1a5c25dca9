//! # Confidential Transfers
//!
//! Amounts hidden on-chain behind encrypted balances. The five ledger
//! primitives live behind [`ConfidentialLedger`]; the ordering rules, the
//! revocation hook-up, and the saga bookkeeping live in
//! [`ConfidentialTransferWorkflow`] and do not care which backend runs.
//!
//! Backends:
//! - [`SimulatedConfidentialLedger`]: in-process, backed by a
//!   [`SimulatedLedger`](pusd_protocol::ledger::SimulatedLedger).
//! - [`TokenCliLedger`]: shells out to the `spl-token` CLI.

pub mod simulated;
pub mod token_cli;
pub mod workflow;

use async_trait::async_trait;

use pusd_protocol::address::Address;
use pusd_protocol::error::TreasuryResult;

pub use simulated::{ConfidentialBalances, ConfidentialState, SimulatedConfidentialLedger};
pub use token_cli::TokenCliLedger;
pub use workflow::{ConfidentialTransferWorkflow, CycleFailure, CycleReport, CycleStep, TransferReceipt};

/// The confidential-transfer primitives of the token program.
///
/// Amounts are pegged atomic units. Every method returns the ledger
/// signature of the transaction it sent.
#[async_trait]
pub trait ConfidentialLedger: Send + Sync {
    /// Enables confidential credits on `owner`'s token account. Returns
    /// `None` if the account was already configured.
    async fn configure_account(&self, owner: &Address) -> TreasuryResult<Option<String>>;

    /// Public balance into the pending confidential balance.
    async fn deposit(&self, owner: &Address, amount: u64) -> TreasuryResult<String>;

    /// Available confidential balance of `from` into the pending balance of `to`.
    async fn transfer(&self, from: &Address, to: &Address, amount: u64) -> TreasuryResult<String>;

    /// Pending confidential balance into available.
    async fn apply_pending_balance(&self, owner: &Address) -> TreasuryResult<String>;

    /// Available confidential balance back to the public balance.
    async fn withdraw(&self, owner: &Address, amount: u64) -> TreasuryResult<String>;
}
