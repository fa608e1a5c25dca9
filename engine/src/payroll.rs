//! # Payroll Escrow
//!
//! A payroll batch freezes its total in a per-batch escrow account at
//! schedule time and commits to the employee list with a merkle root. At or
//! after `release_at` the batch is thawed: the escrow pays every employee
//! and is closed, all in one bundle.
//!
//! ## Lifecycle
//!
//! ```text
//! None ──schedule──► Submitting ──confirmed──► Scheduled ──thaw (now >= release_at)──► Thawed
//! ```
//!
//! A thaw is legal once. The employee list presented at thaw must sum to
//! the frozen total and hash to the committed root; anything else is
//! refused before a single transfer is built.
//!
//! The record is written before the schedule bundle is submitted and
//! promoted once it confirms. A record left in `Submitting` is settled
//! against the ledger by the next schedule or thaw of that batch. A
//! `Scheduled` record whose escrow is gone belongs to a thaw that landed
//! without its record update, and is repaired to `Thawed`.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use pusd_protocol::address::Address;
use pusd_protocol::asset::AssetKind;
use pusd_protocol::error::{TreasuryError, TreasuryResult};
use pusd_protocol::instruction::{Instruction, TransactionBundle};
use pusd_protocol::keys::TreasuryKeypair;
use pusd_protocol::ledger::{require_balance, submit_and_confirm, LedgerClient};
use pusd_protocol::merkle::{payroll_root, root_to_hex, verify_proof, Hash32, PayrollLeaf};
use pusd_protocol::pda::{ProgramAddresses, MAX_SEED_LEN};
use pusd_protocol::storage::{Keyspace, TreasuryDb};
use pusd_protocol::units::UnitConverter;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Record written, schedule bundle not yet confirmed.
    Submitting,
    /// Funds are frozen in escrow.
    Scheduled,
    /// Funds were distributed and the escrow closed.
    Thawed,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Submitting => write!(f, "Submitting"),
            BatchStatus::Scheduled => write!(f, "Scheduled"),
            BatchStatus::Thawed => write!(f, "Thawed"),
        }
    }
}

/// A scheduled payroll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollBatch {
    pub batch_id: String,
    pub merkle_root: Hash32,
    /// Pegged atomic units frozen in escrow.
    pub total: u64,
    pub release_at: DateTime<Utc>,
    pub frozen: bool,
    pub employee_count: u32,
    pub escrow: Address,
    pub funder: Address,
    pub status: BatchStatus,
    pub scheduled_at: DateTime<Utc>,
    pub schedule_signature: String,
    pub thawed_at: Option<DateTime<Utc>>,
    pub thaw_signature: Option<String>,
}

impl PayrollBatch {
    pub fn can_thaw(&self, now: DateTime<Utc>) -> bool {
        self.status == BatchStatus::Scheduled && can_thaw(self.release_at, now)
    }
}

/// `now >= release_at`.
pub fn can_thaw(release_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= release_at
}

/// True if `proof` places `employee` under `root`.
pub fn validate_merkle_proof(employee: &PayrollLeaf, root: &Hash32, proof: &[Hash32]) -> bool {
    verify_proof(employee, proof, root)
}

/// Result of a successful thaw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThawReceipt {
    pub batch: PayrollBatch,
    pub signature: String,
    pub distributed: Vec<PayrollLeaf>,
}

/// Parameters of a new batch. `total_ui` is in pegged UI units.
#[derive(Debug, Clone)]
pub struct ScheduleRequest<'a> {
    pub batch_id: &'a str,
    pub merkle_root: Hash32,
    pub total_ui: &'a str,
    pub employee_count: u32,
    pub release_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Escrow
// ---------------------------------------------------------------------------

pub struct PayrollEscrow {
    ledger: Arc<dyn LedgerClient>,
    db: Arc<TreasuryDb>,
    pdas: ProgramAddresses,
    converter: UnitConverter,
    // One schedule or thaw at a time, across the ledger round trip.
    lock: Mutex<()>,
}

impl std::fmt::Debug for PayrollEscrow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayrollEscrow")
            .field("program_id", self.pdas.program_id())
            .finish_non_exhaustive()
    }
}

impl PayrollEscrow {
    pub fn new(ledger: Arc<dyn LedgerClient>, db: Arc<TreasuryDb>, pdas: ProgramAddresses, converter: UnitConverter) -> Self {
        Self {
            ledger,
            db,
            pdas,
            converter,
            lock: Mutex::new(()),
        }
    }

    pub fn batch(&self, batch_id: &str) -> TreasuryResult<Option<PayrollBatch>> {
        Ok(self.db.get(Keyspace::PayrollBatches, batch_id.as_bytes())?)
    }

    pub fn batches(&self) -> TreasuryResult<Vec<PayrollBatch>> {
        Ok(self.db.values(Keyspace::PayrollBatches)?)
    }

    /// The escrow account of `batch_id`.
    pub fn escrow_address(&self, batch_id: &str) -> TreasuryResult<Address> {
        validate_batch_id(batch_id)?;
        Ok(self.pdas.payroll_escrow(batch_id)?.0)
    }

    pub async fn schedule_payroll(&self, funder: &TreasuryKeypair, request: ScheduleRequest<'_>) -> TreasuryResult<PayrollBatch> {
        self.schedule_payroll_at(funder, request, Utc::now()).await
    }

    /// Freezes `total_ui` in the batch escrow.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if the total is zero or malformed, or there are no employees.
    /// - `ReleaseInPast` if `release_at <= now`.
    /// - `BatchAlreadyExists` if the id is on record or its escrow exists.
    /// - `InsufficientBalance` if the funder cannot cover the total.
    pub async fn schedule_payroll_at(
        &self,
        funder: &TreasuryKeypair,
        request: ScheduleRequest<'_>,
        now: DateTime<Utc>,
    ) -> TreasuryResult<PayrollBatch> {
        let total = self.converter.pegged_to_atomic(request.total_ui)?;
        self.schedule_atomic(
            funder,
            request.batch_id,
            request.merkle_root,
            total,
            request.employee_count,
            request.release_at,
            now,
        )
        .await
    }

    /// Schedules a batch straight from its employee list: the root, total,
    /// and count are derived from `employees`.
    pub async fn schedule_employees_at(
        &self,
        funder: &TreasuryKeypair,
        batch_id: &str,
        employees: &[PayrollLeaf],
        release_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TreasuryResult<PayrollBatch> {
        check_distribution(batch_id, employees)?;
        let total = sum_amounts(employees)?;
        let count = u32::try_from(employees.len())
            .map_err(|_| TreasuryError::InvalidAmount("too many employees in one batch".into()))?;
        self.schedule_atomic(funder, batch_id, payroll_root(employees), total, count, release_at, now)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn schedule_atomic(
        &self,
        funder: &TreasuryKeypair,
        batch_id: &str,
        merkle_root: Hash32,
        total: u64,
        employee_count: u32,
        release_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TreasuryResult<PayrollBatch> {
        if total == 0 {
            return Err(TreasuryError::InvalidAmount("payroll total must be positive".into()));
        }
        if employee_count == 0 {
            return Err(TreasuryError::InvalidAmount("payroll batch has no employees".into()));
        }
        if release_at <= now {
            return Err(TreasuryError::ReleaseInPast { release_at, now });
        }
        let escrow = self.escrow_address(batch_id)?;

        let _guard = self.lock.lock().await;
        let existing = match self.batch(batch_id)? {
            Some(batch) => self.settle_submitting(batch).await?,
            None => None,
        };
        if existing.is_some() || self.ledger.token_account_exists(&escrow, AssetKind::Pegged).await? {
            return Err(TreasuryError::BatchAlreadyExists(batch_id.to_string()));
        }
        let funder_address = funder.address();
        require_balance(self.ledger.as_ref(), &funder_address.to_string(), &funder_address, AssetKind::Pegged, total).await?;

        let mut bundle = TransactionBundle::new(funder_address).with_memo(format!("payroll schedule {batch_id}"));
        bundle
            .push(Instruction::CreateTokenAccount {
                owner: escrow,
                asset: AssetKind::Pegged,
            })
            .push(Instruction::Transfer {
                asset: AssetKind::Pegged,
                from: funder_address,
                to: escrow,
                amount: total,
            });
        let signed = bundle.sign(funder)?;

        let mut batch = PayrollBatch {
            batch_id: batch_id.to_string(),
            merkle_root,
            total,
            release_at,
            frozen: true,
            employee_count,
            escrow,
            funder: funder_address,
            status: BatchStatus::Submitting,
            scheduled_at: now,
            schedule_signature: signed.id(),
            thawed_at: None,
            thaw_signature: None,
        };
        if !self.db.insert_new(Keyspace::PayrollBatches, batch_id.as_bytes(), &batch)? {
            return Err(TreasuryError::BatchAlreadyExists(batch_id.to_string()));
        }

        if let Err(err) = submit_and_confirm(self.ledger.as_ref(), &signed).await {
            if err.may_have_landed() {
                warn!(batch_id, error = %err, "payroll schedule outcome unknown, record left in Submitting");
            } else {
                self.db.remove(Keyspace::PayrollBatches, batch_id.as_bytes())?;
            }
            return Err(err);
        }
        batch.status = BatchStatus::Scheduled;
        self.db.put(Keyspace::PayrollBatches, batch_id.as_bytes(), &batch)?;
        info!(
            batch_id,
            total,
            employees = employee_count,
            release_at = %release_at,
            root = %root_to_hex(&merkle_root),
            "payroll scheduled"
        );
        Ok(batch)
    }

    pub async fn thaw_payroll(&self, payer: &TreasuryKeypair, batch_id: &str, employees: &[PayrollLeaf]) -> TreasuryResult<ThawReceipt> {
        self.thaw_payroll_at(payer, batch_id, employees, Utc::now()).await
    }

    /// Pays every employee from escrow and closes the escrow.
    ///
    /// # Errors
    ///
    /// Checked in this order: `BatchNotFound`, `BatchAlreadyClosed` (also
    /// when the escrow is already closed on the ledger), `ReleaseNotReached`, `PayrollSumMismatch`, `InvalidAmount` for a
    /// wrong count, duplicate wallet, or zero allotment, then
    /// `InvalidMerkleProof` if the list does not hash to the committed root.
    pub async fn thaw_payroll_at(
        &self,
        payer: &TreasuryKeypair,
        batch_id: &str,
        employees: &[PayrollLeaf],
        now: DateTime<Utc>,
    ) -> TreasuryResult<ThawReceipt> {
        let _guard = self.lock.lock().await;
        let recorded = self
            .batch(batch_id)?
            .ok_or_else(|| TreasuryError::BatchNotFound(batch_id.to_string()))?;
        let mut batch = self
            .settle_submitting(recorded)
            .await?
            .ok_or_else(|| TreasuryError::BatchNotFound(batch_id.to_string()))?;
        if batch.status == BatchStatus::Thawed {
            return Err(TreasuryError::BatchAlreadyClosed(batch_id.to_string()));
        }
        if !self.ledger.token_account_exists(&batch.escrow, AssetKind::Pegged).await? {
            batch.status = BatchStatus::Thawed;
            batch.frozen = false;
            batch.thawed_at.get_or_insert(now);
            self.db.put(Keyspace::PayrollBatches, batch_id.as_bytes(), &batch)?;
            warn!(batch_id, thaw_signature = ?batch.thaw_signature, "escrow already closed, batch record repaired");
            return Err(TreasuryError::BatchAlreadyClosed(batch_id.to_string()));
        }
        if !can_thaw(batch.release_at, now) {
            return Err(TreasuryError::ReleaseNotReached {
                batch_id: batch_id.to_string(),
                release_at: batch.release_at,
                now,
            });
        }
        self.verify_distribution(&batch, employees)?;

        let mut bundle = TransactionBundle::new(payer.address()).with_memo(format!("payroll thaw {batch_id}"));
        let existing = try_join_all(
            employees
                .iter()
                .map(|employee| self.ledger.token_account_exists(&employee.wallet, AssetKind::Pegged)),
        )
        .await?;
        for (employee, exists) in employees.iter().zip(existing) {
            if !exists {
                bundle.push(Instruction::CreateTokenAccount {
                    owner: employee.wallet,
                    asset: AssetKind::Pegged,
                });
            }
            bundle.push(Instruction::Transfer {
                asset: AssetKind::Pegged,
                from: batch.escrow,
                to: employee.wallet,
                amount: employee.amount,
            });
        }
        bundle.push(Instruction::CloseTokenAccount {
            owner: batch.escrow,
            asset: AssetKind::Pegged,
        });
        let signed = bundle.sign(payer)?;
        batch.thaw_signature = Some(signed.id());
        self.db.put(Keyspace::PayrollBatches, batch_id.as_bytes(), &batch)?;
        let confirmation = submit_and_confirm(self.ledger.as_ref(), &signed).await?;

        batch.status = BatchStatus::Thawed;
        batch.frozen = false;
        batch.thawed_at = Some(now);
        batch.thaw_signature = Some(confirmation.signature.clone());
        self.db.put(Keyspace::PayrollBatches, batch_id.as_bytes(), &batch)?;
        info!(batch_id, total = batch.total, employees = employees.len(), signature = %confirmation.signature, "payroll thawed");

        Ok(ThawReceipt {
            batch,
            signature: confirmation.signature,
            distributed: employees.to_vec(),
        })
    }

    /// Resolves a `Submitting` record against the ledger: promoted if its
    /// schedule bundle landed, dropped (`None`) if it did not. Other records
    /// pass through.
    async fn settle_submitting(&self, mut batch: PayrollBatch) -> TreasuryResult<Option<PayrollBatch>> {
        if batch.status != BatchStatus::Submitting {
            return Ok(Some(batch));
        }
        let key = batch.batch_id.clone();
        if self.ledger.confirmation(&batch.schedule_signature).await?.is_some() {
            batch.status = BatchStatus::Scheduled;
            self.db.put(Keyspace::PayrollBatches, key.as_bytes(), &batch)?;
            info!(batch_id = %key, signature = %batch.schedule_signature, "payroll schedule confirmed on re-query");
            return Ok(Some(batch));
        }
        if self.ledger.token_account_exists(&batch.escrow, AssetKind::Pegged).await? {
            return Err(TreasuryError::NetworkError(format!(
                "schedule of batch {key} is unconfirmed but its escrow exists"
            )));
        }
        self.db.remove(Keyspace::PayrollBatches, key.as_bytes())?;
        warn!(batch_id = %key, "payroll schedule never landed, record dropped");
        Ok(None)
    }

    fn verify_distribution(&self, batch: &PayrollBatch, employees: &[PayrollLeaf]) -> TreasuryResult<()> {
        let distributed = employees
            .iter()
            .map(|e| u128::from(e.amount))
            .sum::<u128>();
        if distributed != u128::from(batch.total) {
            return Err(TreasuryError::PayrollSumMismatch {
                batch_id: batch.batch_id.clone(),
                total: batch.total,
                distributed: u64::try_from(distributed).unwrap_or(u64::MAX),
            });
        }
        if employees.len() != batch.employee_count as usize {
            return Err(TreasuryError::InvalidAmount(format!(
                "payroll batch {} expects {} employees, got {}",
                batch.batch_id,
                batch.employee_count,
                employees.len()
            )));
        }
        check_distribution(&batch.batch_id, employees)?;
        if payroll_root(employees) != batch.merkle_root {
            return Err(TreasuryError::InvalidMerkleProof(format!(
                "employee list of batch {} does not match root {}",
                batch.batch_id,
                root_to_hex(&batch.merkle_root)
            )));
        }
        Ok(())
    }
}

fn validate_batch_id(batch_id: &str) -> TreasuryResult<()> {
    if batch_id.is_empty() || batch_id.len() > MAX_SEED_LEN {
        return Err(TreasuryError::InvalidConfig(format!(
            "batch id must be 1 to {MAX_SEED_LEN} bytes, got {}",
            batch_id.len()
        )));
    }
    Ok(())
}

fn check_distribution(batch_id: &str, employees: &[PayrollLeaf]) -> TreasuryResult<()> {
    let mut seen = HashSet::with_capacity(employees.len());
    for employee in employees {
        if employee.amount == 0 {
            return Err(TreasuryError::InvalidAmount(format!(
                "batch {batch_id}: zero allotment for {}",
                employee.wallet
            )));
        }
        if !seen.insert(employee.wallet) {
            return Err(TreasuryError::InvalidAmount(format!(
                "batch {batch_id}: {} listed twice",
                employee.wallet
            )));
        }
    }
    Ok(())
}

fn sum_amounts(employees: &[PayrollLeaf]) -> TreasuryResult<u64> {
    employees.iter().try_fold(0u64, |acc, e| {
        acc.checked_add(e.amount)
            .ok_or_else(|| TreasuryError::InvalidAmount("payroll total overflows u64".into()))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
