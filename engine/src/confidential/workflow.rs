//! # Confidential Transfer Workflow
//!
//! Per-account state is `Unconfigured → Configured`; configuring twice is a
//! no-op. A full cycle is:
//!
//! ```text
//! configure(sender) → configure(recipient) → deposit(sender)
//!   → apply(sender) → transfer → apply(recipient) → withdraw(recipient)
//! ```
//!
//! Each step lands on its own and nothing is rolled back automatically.
//! [`ConfidentialTransferWorkflow::run_transfer_cycle`] runs the cycle as a
//! saga and reports exactly which steps completed, so the caller can resume
//! or compensate. Corporate-originated transfers are recorded in the
//! [`RevocableRegistry`].

use dashmap::DashSet;
use std::sync::Arc;
use tracing::{error, info, warn};

use pusd_protocol::account::TreasuryAccount;
use pusd_protocol::address::Address;
use pusd_protocol::error::{TreasuryError, TreasuryResult};
use pusd_protocol::units::{from_atomic, UnitConverter};

use super::ConfidentialLedger;
use crate::revocable::{RevocableRegistry, RevocableTransaction};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One step of the full confidential cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    ConfigureSender,
    ConfigureRecipient,
    Deposit,
    ApplySender,
    Transfer,
    ApplyRecipient,
    Withdraw,
}

impl std::fmt::Display for CycleStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CycleStep::ConfigureSender => "configure sender",
            CycleStep::ConfigureRecipient => "configure recipient",
            CycleStep::Deposit => "deposit",
            CycleStep::ApplySender => "apply sender pending balance",
            CycleStep::Transfer => "confidential transfer",
            CycleStep::ApplyRecipient => "apply recipient pending balance",
            CycleStep::Withdraw => "withdraw",
        };
        f.write_str(s)
    }
}

/// A confirmed confidential transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub signature: String,
    /// Present when the sender's role carries a revocation right.
    pub revocable: Option<RevocableTransaction>,
    /// Set when the transfer landed with a revocation right but its
    /// registry entry could not be written. The transfer is not revocable.
    pub revocation_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {error}")]
pub struct CycleFailure {
    pub step: CycleStep,
    #[source]
    pub error: TreasuryError,
}

/// Outcome of a saga run.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Completed steps in order, with the signature each one produced
    /// (`None` for a configure that was already in place).
    pub completed: Vec<(CycleStep, Option<String>)>,
    /// The step that failed. Everything after it was not attempted.
    pub failure: Option<CycleFailure>,
    pub revocable: Option<RevocableTransaction>,
    /// Copied from [`TransferReceipt::revocation_error`].
    pub revocation_error: Option<String>,
}

impl CycleReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    pub fn last_completed(&self) -> Option<CycleStep> {
        self.completed.last().map(|(step, _)| *step)
    }

    // Records the result of `step`; returns false if the saga must stop.
    fn settle(&mut self, step: CycleStep, result: TreasuryResult<Option<String>>) -> bool {
        match result {
            Ok(signature) => {
                self.completed.push((step, signature));
                true
            }
            Err(error) => {
                warn!(%step, %error, completed = self.completed.len(), "confidential cycle stopped");
                self.failure = Some(CycleFailure { step, error });
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

pub struct ConfidentialTransferWorkflow {
    ledger: Arc<dyn ConfidentialLedger>,
    registry: Arc<RevocableRegistry>,
    converter: UnitConverter,
    configured: DashSet<Address>,
}

impl std::fmt::Debug for ConfidentialTransferWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfidentialTransferWorkflow")
            .field("configured", &self.configured.len())
            .finish_non_exhaustive()
    }
}

impl ConfidentialTransferWorkflow {
    pub fn new(ledger: Arc<dyn ConfidentialLedger>, registry: Arc<RevocableRegistry>, converter: UnitConverter) -> Self {
        Self {
            ledger,
            registry,
            converter,
            configured: DashSet::new(),
        }
    }

    pub fn registry(&self) -> &Arc<RevocableRegistry> {
        &self.registry
    }

    pub fn is_configured(&self, owner: &Address) -> bool {
        self.configured.contains(owner)
    }

    fn require_configured(&self, owner: &Address) -> TreasuryResult<()> {
        if self.is_configured(owner) {
            Ok(())
        } else {
            Err(TreasuryError::AccountNotConfigured(owner.to_string()))
        }
    }

    fn positive_amount(&self, amount_ui: &str) -> TreasuryResult<u64> {
        let amount = self.converter.pegged_to_atomic(amount_ui)?;
        if amount == 0 {
            return Err(TreasuryError::InvalidAmount("confidential amount must be positive".into()));
        }
        Ok(amount)
    }

    /// Enables confidential credits. Returns `None` when nothing had to be done.
    pub async fn configure_for_confidential(&self, owner: &Address) -> TreasuryResult<Option<String>> {
        if self.is_configured(owner) {
            return Ok(None);
        }
        let signature = self.ledger.configure_account(owner).await?;
        self.configured.insert(*owner);
        info!(%owner, fresh = signature.is_some(), "confidential account ready");
        Ok(signature)
    }

    pub async fn deposit_confidential(&self, owner: &Address, amount_ui: &str) -> TreasuryResult<String> {
        let amount = self.positive_amount(amount_ui)?;
        self.require_configured(owner)?;
        self.ledger.deposit(owner, amount).await
    }

    /// Sends from `sender` to `recipient`. A corporate sender gets a
    /// revocable entry for the transfer.
    pub async fn transfer_confidential(
        &self,
        sender: &TreasuryAccount,
        recipient: &Address,
        amount_ui: &str,
    ) -> TreasuryResult<TransferReceipt> {
        let amount = self.positive_amount(amount_ui)?;
        let from = *sender.owner();
        self.require_configured(&from)?;
        self.require_configured(recipient)?;

        let signature = self.ledger.transfer(&from, recipient, amount).await?;
        info!(%from, to = %recipient, amount, %signature, "confidential transfer sent");

        let mut receipt = TransferReceipt {
            signature,
            revocable: None,
            revocation_error: None,
        };
        if sender.role().grants_revocation() {
            let amount_ui = from_atomic(amount, self.converter.pegged().decimals);
            match self.registry.record(from, *recipient, &amount_ui, &receipt.signature) {
                Ok(entry) => receipt.revocable = Some(entry),
                Err(err) => {
                    error!(signature = %receipt.signature, error = %err, "transfer landed but could not be made revocable");
                    receipt.revocation_error = Some(err.to_string());
                }
            }
        }
        Ok(receipt)
    }

    pub async fn apply_pending_balance(&self, owner: &Address) -> TreasuryResult<String> {
        self.require_configured(owner)?;
        self.ledger.apply_pending_balance(owner).await
    }

    pub async fn withdraw_confidential(&self, owner: &Address, amount_ui: &str) -> TreasuryResult<String> {
        let amount = self.positive_amount(amount_ui)?;
        self.require_configured(owner)?;
        self.ledger.withdraw(owner, amount).await
    }

    /// Runs the whole cycle for `amount_ui`, stopping at the first failure.
    pub async fn run_transfer_cycle(&self, sender: &TreasuryAccount, recipient: &Address, amount_ui: &str) -> CycleReport {
        let mut report = CycleReport::default();
        let from = *sender.owner();

        if !report.settle(CycleStep::ConfigureSender, self.configure_for_confidential(&from).await) {
            return report;
        }
        if !report.settle(CycleStep::ConfigureRecipient, self.configure_for_confidential(recipient).await) {
            return report;
        }
        let deposit = self.deposit_confidential(&from, amount_ui).await.map(Some);
        if !report.settle(CycleStep::Deposit, deposit) {
            return report;
        }
        let apply = self.apply_pending_balance(&from).await.map(Some);
        if !report.settle(CycleStep::ApplySender, apply) {
            return report;
        }
        let transfer = match self.transfer_confidential(sender, recipient, amount_ui).await {
            Ok(receipt) => {
                report.revocable = receipt.revocable;
                report.revocation_error = receipt.revocation_error;
                Ok(Some(receipt.signature))
            }
            Err(err) => Err(err),
        };
        if !report.settle(CycleStep::Transfer, transfer) {
            return report;
        }
        let apply = self.apply_pending_balance(recipient).await.map(Some);
        if !report.settle(CycleStep::ApplyRecipient, apply) {
            return report;
        }
        let withdraw = self.withdraw_confidential(recipient, amount_ui).await.map(Some);
        report.settle(CycleStep::Withdraw, withdraw);
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
