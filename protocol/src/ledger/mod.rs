//! # Ledger Capability
//!
//! The chain is an external collaborator. The core only needs five things
//! from it: submit a signed bundle, ask whether a signature landed, read a
//! token balance, read pegged supply, and check that a token account exists.
//!
//! ## Lost responses
//!
//! A submission that fails with [`TreasuryError::NetworkError`] may still
//! have landed: bundles are atomic on the ledger, but the client can lose
//! the reply. [`submit_and_confirm`] handles that case by asking for the
//! bundle's signature before reporting failure. It never re-submits.

pub mod simulated;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::Address;
use crate::asset::AssetKind;
use crate::error::{TreasuryError, TreasuryResult};
use crate::instruction::SignedBundle;

pub use simulated::{LedgerState, SimulatedLedger};

/// Proof that a bundle was applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// Base58 signature of the bundle; the transaction id.
    pub signature: String,
    /// Monotonic ledger slot at which the bundle landed.
    pub slot: u64,
}

/// What the treasury core needs from the chain.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Applies the bundle atomically. `LedgerRejected` means nothing landed;
    /// `NetworkError` means the outcome is unknown.
    async fn submit(&self, bundle: &SignedBundle) -> TreasuryResult<Confirmation>;

    /// Looks up a previously submitted bundle by signature.
    async fn confirmation(&self, signature: &str) -> TreasuryResult<Option<Confirmation>>;

    /// Token balance of `owner` in atomic units. A missing account is zero.
    async fn balance(&self, owner: &Address, asset: AssetKind) -> TreasuryResult<u64>;

    /// Total pegged supply in atomic units.
    async fn supply(&self) -> TreasuryResult<u64>;

    async fn token_account_exists(&self, owner: &Address, asset: AssetKind) -> TreasuryResult<bool>;
}

/// Submits `bundle`; on a network error, re-queries the signature before
/// giving up so a landed bundle is reported as landed.
pub async fn submit_and_confirm(
    ledger: &dyn LedgerClient,
    bundle: &SignedBundle,
) -> TreasuryResult<Confirmation> {
    let signature = bundle.id();
    match ledger.submit(bundle).await {
        Ok(confirmation) => {
            debug!(%signature, slot = confirmation.slot, "bundle confirmed");
            Ok(confirmation)
        }
        Err(err) if err.may_have_landed() => {
            warn!(%signature, error = %err, "submission outcome unknown, re-querying");
            match ledger.confirmation(&signature).await? {
                Some(confirmation) => {
                    debug!(%signature, slot = confirmation.slot, "bundle landed despite lost response");
                    Ok(confirmation)
                }
                None => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

/// Fails with `InsufficientBalance` unless `owner` holds `required`.
pub async fn require_balance(
    ledger: &dyn LedgerClient,
    label: &str,
    owner: &Address,
    asset: AssetKind,
    required: u64,
) -> TreasuryResult<u64> {
    let available = ledger.balance(owner, asset).await?;
    if available < required {
        return Err(TreasuryError::InsufficientBalance {
            account: label.to_string(),
            available,
            required,
        });
    }
    Ok(available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, TransactionBundle};
    use crate::keys::TreasuryKeypair;

    fn funded() -> (SimulatedLedger, TreasuryKeypair) {
        let ledger = SimulatedLedger::new();
        let kp = TreasuryKeypair::generate();
        ledger.airdrop(&kp.address(), AssetKind::Base, 1_000);
        (ledger, kp)
    }

    fn transfer(kp: &TreasuryKeypair, amount: u64) -> SignedBundle {
        let mut bundle = TransactionBundle::new(kp.address());
        bundle.push(Instruction::Transfer {
            asset: AssetKind::Base,
            from: kp.address(),
            to: Address::from_label("elsewhere"),
            amount,
        });
        bundle.sign(kp).unwrap()
    }

    #[tokio::test]
    async fn lost_response_is_recovered_by_requery() {
        let (ledger, kp) = funded();
        ledger.drop_next_response();
        let signed = transfer(&kp, 100);
        let confirmation = submit_and_confirm(&ledger, &signed).await.unwrap();
        assert_eq!(confirmation.signature, signed.id());
        assert_eq!(ledger.balance(&kp.address(), AssetKind::Base).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn rejection_is_not_requeried() {
        let (ledger, kp) = funded();
        let err = submit_and_confirm(&ledger, &transfer(&kp, 5_000)).await.unwrap_err();
        assert!(matches!(err, TreasuryError::LedgerRejected(_)));
    }

    #[tokio::test]
    async fn require_balance_reports_shortfall() {
        let (ledger, kp) = funded();
        let err = require_balance(&ledger, "corporate", &kp.address(), AssetKind::Base, 2_000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TreasuryError::InsufficientBalance { available: 1_000, required: 2_000, .. }
        ));
        assert_eq!(
            require_balance(&ledger, "corporate", &kp.address(), AssetKind::Base, 10).await.unwrap(),
            1_000
        );
    }
}
