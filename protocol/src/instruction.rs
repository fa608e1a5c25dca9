//! # Instruction Bundles
//!
//! A [`TransactionBundle`] is the unit of atomicity: the ledger applies all
//! of its instructions or none of them. A redeem is burn + transfer + fee
//! transfer in ONE bundle, a payroll thaw is every employee payout plus the
//! escrow close in ONE bundle. Splitting legs across bundles would let a
//! lost response leave the fee debited without the burn, and the peg
//! invariant would be at the mercy of the network.
//!
//! Bundles are signed by their fee payer over the bincode encoding of the
//! bundle body. The signature doubles as the transaction id, so the client
//! knows what to look up if a submission's response is lost.

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::asset::AssetKind;
use crate::error::{TreasuryError, TreasuryResult};
use crate::keys::{verify_signature, TreasuryKeypair};

/// A single ledger instruction. Token accounts are addressed by
/// `(owner, asset)`, mirroring associated token accounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Create the token account if absent. Idempotent.
    CreateTokenAccount { owner: Address, asset: AssetKind },
    Transfer {
        asset: AssetKind,
        from: Address,
        to: Address,
        amount: u64,
    },
    /// Mint pegged tokens. Only the pegged asset has a mint authority here.
    MintTo { to: Address, amount: u64 },
    /// Burn pegged tokens.
    Burn { from: Address, amount: u64 },
    /// Close an empty token account.
    CloseTokenAccount { owner: Address, asset: AssetKind },
}

/// An ordered, all-or-nothing set of instructions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBundle {
    pub fee_payer: Address,
    pub instructions: Vec<Instruction>,
    pub memo: Option<String>,
    /// Random nonce so two identical bundles get distinct signatures.
    pub nonce: u64,
    /// Unix milliseconds at construction.
    pub created_at_ms: i64,
}

impl TransactionBundle {
    pub fn new(fee_payer: Address) -> Self {
        Self {
            fee_payer,
            instructions: Vec::new(),
            memo: None,
            nonce: rand::thread_rng().next_u64(),
            created_at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn push(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self
    }

    pub fn extend(&mut self, instructions: impl IntoIterator<Item = Instruction>) -> &mut Self {
        self.instructions.extend(instructions);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Canonical bytes covered by the signature.
    pub fn message_bytes(&self) -> TreasuryResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TreasuryError::Serialization(e.to_string()))
    }

    /// Signs the bundle. The signer must be the fee payer.
    pub fn sign(self, signer: &TreasuryKeypair) -> TreasuryResult<SignedBundle> {
        if signer.address() != self.fee_payer {
            return Err(TreasuryError::Unauthorized(format!(
                "bundle fee payer {} cannot be signed by {}",
                self.fee_payer,
                signer.address()
            )));
        }
        if self.instructions.is_empty() {
            return Err(TreasuryError::InvalidAmount("refusing to sign an empty bundle".into()));
        }
        let signature = signer.sign(&self.message_bytes()?).to_vec();
        Ok(SignedBundle {
            bundle: self,
            signature,
        })
    }
}

/// A bundle plus its fee payer's signature.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBundle {
    pub bundle: TransactionBundle,
    pub signature: Vec<u8>,
}

impl SignedBundle {
    /// Transaction id: the base58 signature.
    pub fn id(&self) -> String {
        bs58::encode(&self.signature).into_string()
    }

    pub fn verify(&self) -> bool {
        match self.bundle.message_bytes() {
            Ok(message) => verify_signature(&self.bundle.fee_payer, &message, &self.signature),
            Err(_) => false,
        }
    }
}
