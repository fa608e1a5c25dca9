//! # Treasury Deposit / Withdraw
//!
//! One code path for both actor roles. The role picks the reserve vault and
//! the fee rate; everything else is shared.
//!
//! ```text
//! deposit  (base UI)   : transfer USDC actor → vault, mint pUSD to actor
//! withdraw (pegged UI) : burn pUSD, transfer USDC vault → actor (net),
//!                        transfer USDC vault → yield account (fee)
//! ```
//!
//! Every leg of an operation goes into a single signed bundle. The plan is
//! built and checked against a fresh reserve snapshot before submission, and
//! the peg is re-observed from the ledger after confirmation.
//!
//! A withdrawal's redeem allowance is reserved before submission and handed
//! back only if the ledger rejected the bundle or has no record of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use pusd_protocol::account::Role;
use pusd_protocol::address::Address;
use pusd_protocol::asset::AssetKind;
use pusd_protocol::error::{TreasuryError, TreasuryResult};
use pusd_protocol::fees::{Direction, FeePolicy};
use pusd_protocol::instruction::{Instruction, SignedBundle, TransactionBundle};
use pusd_protocol::keys::TreasuryKeypair;
use pusd_protocol::ledger::{require_balance, submit_and_confirm, LedgerClient};
use pusd_protocol::peg::{PegLedger, PegSnapshot, ReserveAccounts, ReserveVault};
use pusd_protocol::redeem::RedeemAllowList;
use pusd_protocol::units::from_atomic;

// ---------------------------------------------------------------------------
// Plans and receipts
// ---------------------------------------------------------------------------

/// Everything an operation will do, computed before anything is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPlan {
    pub actor: Address,
    pub role: Role,
    pub direction: Direction,
    pub vault: ReserveVault,
    /// Base units entering or leaving the reserves.
    pub base_gross: u64,
    /// Withdrawal fee in base units, routed to the yield account.
    pub fee: u64,
    /// Base units reaching the actor on a withdraw. Zero on a deposit.
    pub net: u64,
    /// Pegged units minted or burned.
    pub pegged: u64,
    pub before: PegSnapshot,
    /// Projected state after confirmation.
    pub after: PegSnapshot,
    pub instructions: Vec<Instruction>,
}

impl OperationPlan {
    /// Renders the base amounts at the base asset's precision.
    pub fn describe(&self, base_decimals: u8) -> String {
        match self.direction {
            Direction::Deposit => format!(
                "{} deposits {} into the {}",
                self.role,
                from_atomic(self.base_gross, base_decimals),
                self.vault
            ),
            Direction::Withdraw => format!(
                "{} withdraws {} from the {} (net {}, fee {})",
                self.role,
                from_atomic(self.base_gross, base_decimals),
                self.vault,
                from_atomic(self.net, base_decimals),
                from_atomic(self.fee, base_decimals)
            ),
        }
    }
}

/// A confirmed operation and the peg as observed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReceipt {
    pub plan: OperationPlan,
    pub signature: String,
    pub slot: u64,
    pub snapshot: PegSnapshot,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Deposits and withdrawals against the reserve vaults.
pub struct TreasuryService {
    ledger: Arc<dyn LedgerClient>,
    peg: PegLedger,
    fees: FeePolicy,
    allowlist: Option<Arc<RedeemAllowList>>,
}

impl TreasuryService {
    pub fn new(ledger: Arc<dyn LedgerClient>, peg: PegLedger, fees: FeePolicy) -> TreasuryResult<Self> {
        fees.validate()?;
        Ok(Self {
            ledger,
            peg,
            fees,
            allowlist: None,
        })
    }

    /// Gates every withdrawal on the wallet's redeem allowance.
    pub fn with_allowlist(mut self, allowlist: Arc<RedeemAllowList>) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    pub fn peg(&self) -> &PegLedger {
        &self.peg
    }

    /// Builds and validates the plan without submitting anything.
    ///
    /// `amount_ui` is in base units for a deposit and pegged units for a
    /// withdraw.
    ///
    /// # Errors
    ///
    /// `InvalidAmount`, `Unauthorized` for a role that cannot cross the peg
    /// or a wallet without redeem allowance, `LimitExceeded`, and
    /// `InsufficientBalance` for either the actor or the vault.
    pub async fn preview(
        &self,
        actor: &Address,
        role: Role,
        direction: Direction,
        amount_ui: &str,
    ) -> TreasuryResult<OperationPlan> {
        let vault = ReserveAccounts::vault_for(role)?;
        let converter = self.peg.converter();
        let before = self.peg.observe(self.ledger.as_ref()).await?;

        let plan = match direction {
            Direction::Deposit => {
                let base_gross = converter.base_to_atomic(amount_ui)?;
                if base_gross == 0 {
                    return Err(TreasuryError::InvalidAmount("deposit must be positive".into()));
                }
                let pegged = converter.base_to_pegged(base_gross)?;
                require_balance(self.ledger.as_ref(), &actor.to_string(), actor, AssetKind::Base, base_gross).await?;
                let after = self.peg.preview_deposit(&before, vault, base_gross)?;
                let instructions = self.deposit_legs(actor, vault, base_gross, pegged);
                OperationPlan {
                    actor: *actor,
                    role,
                    direction,
                    vault,
                    base_gross,
                    fee: 0,
                    net: 0,
                    pegged,
                    before,
                    after,
                    instructions,
                }
            }
            Direction::Withdraw => {
                let pegged = converter.pegged_to_atomic(amount_ui)?;
                if pegged == 0 {
                    return Err(TreasuryError::InvalidAmount("withdrawal must be positive".into()));
                }
                let base_gross = converter.pegged_to_base(pegged)?;
                if let Some(allowlist) = &self.allowlist {
                    allowlist.check(actor, base_gross, Utc::now())?;
                }
                require_balance(self.ledger.as_ref(), &actor.to_string(), actor, AssetKind::Pegged, pegged).await?;
                let after = self.peg.preview_withdraw(&before, vault, base_gross)?;
                let split = self.fees.split(base_gross, role, direction);
                let instructions = self.withdraw_legs(actor, vault, pegged, split.net, split.fee);
                OperationPlan {
                    actor: *actor,
                    role,
                    direction,
                    vault,
                    base_gross,
                    fee: split.fee,
                    net: split.net,
                    pegged,
                    before,
                    after,
                    instructions,
                }
            }
        };
        Ok(plan)
    }

    /// Plans, submits as one bundle signed by `actor`, and re-checks the peg.
    pub async fn execute(
        &self,
        actor: &TreasuryKeypair,
        role: Role,
        direction: Direction,
        amount_ui: &str,
    ) -> TreasuryResult<OperationReceipt> {
        let address = actor.address();
        let plan = self.preview(&address, role, direction, amount_ui).await?;

        let mut bundle = TransactionBundle::new(address).with_memo(format!("{role} {}", direction_label(direction)));
        bundle.extend(plan.instructions.iter().cloned());
        let signed = bundle.sign(actor)?;

        let reserved_at = Utc::now();
        let reserved = match (direction, &self.allowlist) {
            (Direction::Withdraw, Some(allowlist)) => {
                allowlist.reserve(&address, plan.base_gross, reserved_at)?;
                true
            }
            _ => false,
        };

        let confirmation = match submit_and_confirm(self.ledger.as_ref(), &signed).await {
            Ok(confirmation) => confirmation,
            Err(err) => {
                if reserved {
                    self.release_unless_landed(&address, plan.base_gross, reserved_at, &signed, &err)
                        .await;
                }
                return Err(err);
            }
        };

        info!(
            actor = %address,
            %role,
            direction = direction_label(direction),
            base_gross = plan.base_gross,
            fee = plan.fee,
            pegged = plan.pegged,
            signature = %confirmation.signature,
            "treasury operation confirmed"
        );

        let snapshot = self.peg.check(self.ledger.as_ref()).await?;
        Ok(OperationReceipt {
            plan,
            signature: confirmation.signature,
            slot: confirmation.slot,
            snapshot,
        })
    }

    /// Hands a redeem reservation back after a failed submission, but only
    /// once the ledger says the bundle is not there. An unknown outcome keeps
    /// the allowance consumed.
    async fn release_unless_landed(
        &self,
        actor: &Address,
        amount: u64,
        reserved_at: DateTime<Utc>,
        signed: &SignedBundle,
        err: &TreasuryError,
    ) {
        let Some(allowlist) = &self.allowlist else {
            return;
        };
        if err.may_have_landed() {
            match self.ledger.confirmation(&signed.id()).await {
                Ok(None) => {}
                Ok(Some(_)) => return,
                Err(query_err) => {
                    warn!(%actor, amount, error = %query_err, "withdrawal outcome unknown, redeem allowance stays reserved");
                    return;
                }
            }
        }
        match allowlist.release(actor, amount, reserved_at, Utc::now()) {
            Ok(_) => debug!(%actor, amount, "redeem allowance released"),
            Err(release_err) => error!(%actor, amount, error = %release_err, "failed to release redeem allowance"),
        }
    }

    pub async fn deposit(&self, actor: &TreasuryKeypair, role: Role, amount_ui: &str) -> TreasuryResult<OperationReceipt> {
        self.execute(actor, role, Direction::Deposit, amount_ui).await
    }

    pub async fn withdraw(&self, actor: &TreasuryKeypair, role: Role, amount_ui: &str) -> TreasuryResult<OperationReceipt> {
        self.execute(actor, role, Direction::Withdraw, amount_ui).await
    }

    fn deposit_legs(&self, actor: &Address, vault: ReserveVault, base: u64, pegged: u64) -> Vec<Instruction> {
        let vault = self.peg.accounts().address(vault);
        vec![
            Instruction::CreateTokenAccount {
                owner: vault,
                asset: AssetKind::Base,
            },
            Instruction::CreateTokenAccount {
                owner: *actor,
                asset: AssetKind::Pegged,
            },
            Instruction::Transfer {
                asset: AssetKind::Base,
                from: *actor,
                to: vault,
                amount: base,
            },
            Instruction::MintTo {
                to: *actor,
                amount: pegged,
            },
        ]
    }

    fn withdraw_legs(&self, actor: &Address, vault: ReserveVault, pegged: u64, net: u64, fee: u64) -> Vec<Instruction> {
        let vault = self.peg.accounts().address(vault);
        let yield_account = self.peg.accounts().yield_account;
        let mut legs = vec![
            Instruction::Burn {
                from: *actor,
                amount: pegged,
            },
            Instruction::CreateTokenAccount {
                owner: *actor,
                asset: AssetKind::Base,
            },
        ];
        if net > 0 {
            legs.push(Instruction::Transfer {
                asset: AssetKind::Base,
                from: vault,
                to: *actor,
                amount: net,
            });
        }
        if fee > 0 {
            legs.push(Instruction::CreateTokenAccount {
                owner: yield_account,
                asset: AssetKind::Base,
            });
            legs.push(Instruction::Transfer {
                asset: AssetKind::Base,
                from: vault,
                to: yield_account,
                amount: fee,
            });
        }
        legs
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Deposit => "deposit",
        Direction::Withdraw => "withdraw",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
