//! # Revocable Transfer Registry
//!
//! Corporate-originated transfers to employees stay revocable for a fixed
//! window (30 minutes by default). The registry is the single source of
//! truth for "can this still be revoked": it refuses revocation outside the
//! window even if the chain could technically still support a reversal.
//!
//! ## Lifecycle
//!
//! ```text
//! record ──► Pending ──revoke (now <= expires_at)──► Revoked
//!               │
//!               └── now > expires_at ──► Expired (informational, immutable)
//! ```
//!
//! Entries are durable (sled) and never deleted. A secondary index keyed
//! by `expires_at` tracks which entries are still inside their window;
//! [`RevocableRegistry::sweep`] drops expired ids from that index.
//!
//! ## Compensation
//!
//! Revoking flips the flag first and persists it, then invokes the
//! [`CompensationHook`]. The default hook, [`LogOnlyCompensation`], performs
//! no on-chain reversal and says so in the log. Whether a revoke moves
//! funds back is the hook's business, not the registry's.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use pusd_protocol::address::Address;
use pusd_protocol::error::{TreasuryError, TreasuryResult};
use pusd_protocol::storage::{timestamp_key, Keyspace, TreasuryDb};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A corporate-to-employee transfer that may be cancelled within its window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocableTransaction {
    /// Registry-generated id (UUID v4).
    pub id: String,
    pub from: Address,
    pub to: Address,
    /// Amount as entered, in pegged UI units.
    pub amount_ui: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Ledger signature of the transfer.
    pub signature: String,
}

impl RevocableTransaction {
    /// True while `now` is inside the window and the entry is not revoked.
    /// The window includes `expires_at` itself.
    pub fn is_revocable_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && now <= self.expires_at
    }

    fn expiry_key(&self) -> Vec<u8> {
        expiry_key(self.expires_at, &self.id)
    }
}

fn expiry_key(expires_at: DateTime<Utc>, id: &str) -> Vec<u8> {
    let mut key = timestamp_key(expires_at.timestamp_millis()).to_vec();
    key.extend_from_slice(id.as_bytes());
    key
}

/// What a compensation hook did about a revoked transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompensationOutcome {
    /// A reversing transaction landed.
    Reversed { signature: String },
    /// Nothing was done on-chain.
    NotPerformed { reason: String },
}

/// Result of a successful revoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationReceipt {
    pub transaction: RevocableTransaction,
    pub compensation: CompensationOutcome,
}

// ---------------------------------------------------------------------------
// Compensation
// ---------------------------------------------------------------------------

/// Performs (or declines to perform) the on-chain side of a revoke.
#[async_trait]
pub trait CompensationHook: Send + Sync {
    async fn compensate(&self, transaction: &RevocableTransaction) -> TreasuryResult<CompensationOutcome>;
}

/// Logs the revoke intent and reverses nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyCompensation;

#[async_trait]
impl CompensationHook for LogOnlyCompensation {
    async fn compensate(&self, transaction: &RevocableTransaction) -> TreasuryResult<CompensationOutcome> {
        warn!(
            id = %transaction.id,
            from = %transaction.from,
            to = %transaction.to,
            amount = %transaction.amount_ui,
            "transfer marked revoked; no on-chain reversal performed"
        );
        Ok(CompensationOutcome::NotPerformed {
            reason: "no compensating instruction is configured".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Durable registry of revocable transfers.
pub struct RevocableRegistry {
    db: Arc<TreasuryDb>,
    window: Duration,
    hook: Arc<dyn CompensationHook>,
    // Serializes read-modify-write of entries. Never held across an await.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for RevocableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocableRegistry")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl RevocableRegistry {
    pub fn new(db: Arc<TreasuryDb>, window: std::time::Duration, hook: Arc<dyn CompensationHook>) -> TreasuryResult<Self> {
        let window = Duration::from_std(window)
            .map_err(|e| TreasuryError::InvalidConfig(format!("revocation window out of range: {e}")))?;
        if window <= Duration::zero() {
            return Err(TreasuryError::InvalidConfig("revocation window must be positive".into()));
        }
        Ok(Self {
            db,
            window,
            hook,
            write_lock: Mutex::new(()),
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a transfer created now.
    pub fn record(&self, from: Address, to: Address, amount_ui: &str, signature: &str) -> TreasuryResult<RevocableTransaction> {
        self.record_at(from, to, amount_ui, signature, Utc::now())
    }

    pub fn record_at(
        &self,
        from: Address,
        to: Address,
        amount_ui: &str,
        signature: &str,
        now: DateTime<Utc>,
    ) -> TreasuryResult<RevocableTransaction> {
        let expires_at = now
            .checked_add_signed(self.window)
            .ok_or_else(|| TreasuryError::InvalidConfig(format!("revocation window overflows from {now}")))?;
        let tx = RevocableTransaction {
            id: Uuid::new_v4().to_string(),
            from,
            to,
            amount_ui: amount_ui.to_string(),
            created_at: now,
            expires_at,
            revoked: false,
            revoked_at: None,
            signature: signature.to_string(),
        };
        self.db.put_indexed(
            (Keyspace::Revocable, tx.id.as_bytes(), &tx),
            (Keyspace::RevocableExpiry, &tx.expiry_key(), &tx.id),
        )?;
        info!(id = %tx.id, %from, %to, amount = %tx.amount_ui, expires_at = %tx.expires_at, "revocable transfer recorded");
        Ok(tx)
    }

    pub fn get(&self, id: &str) -> TreasuryResult<Option<RevocableTransaction>> {
        Ok(self.db.get(Keyspace::Revocable, id.as_bytes())?)
    }

    /// Revokes `id` now.
    pub async fn revoke(&self, id: &str) -> TreasuryResult<RevocationReceipt> {
        self.revoke_at(id, Utc::now()).await
    }

    /// Revokes `id` as of `now`.
    ///
    /// # Errors
    ///
    /// - [`TreasuryError::TransactionNotFound`] for an unknown id.
    /// - [`TreasuryError::AlreadyRevoked`] if it was revoked before.
    /// - [`TreasuryError::RevocationExpired`] if `now > expires_at`.
    ///
    /// A hook failure is returned as-is; the entry stays revoked.
    pub async fn revoke_at(&self, id: &str, now: DateTime<Utc>) -> TreasuryResult<RevocationReceipt> {
        let transaction = self.mark_revoked(id, now)?;
        info!(id = %transaction.id, "transfer revoked");

        match self.hook.compensate(&transaction).await {
            Ok(compensation) => Ok(RevocationReceipt {
                transaction,
                compensation,
            }),
            Err(err) => {
                error!(id = %transaction.id, error = %err, "compensation failed after revoke");
                Err(err)
            }
        }
    }

    fn mark_revoked(&self, id: &str, now: DateTime<Utc>) -> TreasuryResult<RevocableTransaction> {
        let _guard = self.write_lock.lock();
        let mut tx = self
            .get(id)?
            .ok_or_else(|| TreasuryError::TransactionNotFound(id.to_string()))?;
        if tx.revoked {
            return Err(TreasuryError::AlreadyRevoked(id.to_string()));
        }
        if now > tx.expires_at {
            return Err(TreasuryError::RevocationExpired {
                id: id.to_string(),
                expires_at: tx.expires_at,
            });
        }
        tx.revoked = true;
        tx.revoked_at = Some(now);
        self.db.put(Keyspace::Revocable, tx.id.as_bytes(), &tx)?;
        self.db.remove(Keyspace::RevocableExpiry, &tx.expiry_key())?;
        Ok(tx)
    }

    /// Entries still revocable at `now`, soonest expiry first.
    pub fn pending(&self, now: DateTime<Utc>) -> TreasuryResult<Vec<RevocableTransaction>> {
        let ids: Vec<(Vec<u8>, String)> = self
            .db
            .scan(Keyspace::RevocableExpiry, timestamp_key(now.timestamp_millis()).to_vec()..)?;
        let mut out = Vec::with_capacity(ids.len());
        for (_, id) in ids {
            if let Some(tx) = self.get(&id)? {
                if tx.is_revocable_at(now) {
                    out.push(tx);
                }
            }
        }
        Ok(out)
    }

    /// Drops ids whose window closed before `now` from the pending index.
    /// The entries themselves are kept. Returns how many left the window.
    pub fn sweep(&self, now: DateTime<Utc>) -> TreasuryResult<usize> {
        let _guard = self.write_lock.lock();
        let expired: Vec<(Vec<u8>, String)> = self
            .db
            .scan(Keyspace::RevocableExpiry, ..timestamp_key(now.timestamp_millis()).to_vec())?;
        for (key, _) in &expired {
            self.db.remove(Keyspace::RevocableExpiry, key)?;
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "revocation windows closed");
        }
        Ok(expired.len())
    }

    /// Every recorded entry, revoked and expired ones included.
    pub fn all(&self) -> TreasuryResult<Vec<RevocableTransaction>> {
        Ok(self.db.values(Keyspace::Revocable)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: std::time::Duration = std::time::Duration::from_secs(30 * 60);

    fn registry() -> RevocableRegistry {
        let db = Arc::new(TreasuryDb::open_temporary().unwrap());
        RevocableRegistry::new(db, WINDOW, Arc::new(LogOnlyCompensation)).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(reg: &RevocableRegistry, now: DateTime<Utc>) -> RevocableTransaction {
        reg.record_at(
            Address::from_label("corporate"),
            Address::from_label("employee"),
            "25",
            "sig",
            now,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn revocable_up_to_and_including_the_boundary() {
        let reg = registry();
        let tx = record(&reg, t0());
        assert_eq!(tx.expires_at, t0() + Duration::minutes(30));

        let receipt = reg.revoke_at(&tx.id, t0() + Duration::minutes(30)).await.unwrap();
        assert!(receipt.transaction.revoked);
        assert!(matches!(receipt.compensation, CompensationOutcome::NotPerformed { .. }));
        assert!(reg.get(&tx.id).unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn one_millisecond_late_is_expired() {
        let reg = registry();
        let tx = record(&reg, t0());
        let late = t0() + Duration::minutes(30) + Duration::milliseconds(1);
        let err = reg.revoke_at(&tx.id, late).await.unwrap_err();
        assert!(matches!(err, TreasuryError::RevocationExpired { .. }));
        assert!(!reg.get(&tx.id).unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn cannot_revoke_twice_or_unknown() {
        let reg = registry();
        let tx = record(&reg, t0());
        reg.revoke_at(&tx.id, t0()).await.unwrap();
        assert!(matches!(
            reg.revoke_at(&tx.id, t0()).await,
            Err(TreasuryError::AlreadyRevoked(_))
        ));
        assert!(matches!(
            reg.revoke_at("missing", t0()).await,
            Err(TreasuryError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn pending_and_sweep_track_the_window() {
        let reg = registry();
        let early = record(&reg, t0());
        let later = record(&reg, t0() + Duration::minutes(20));
        let revoked = record(&reg, t0());
        reg.revoke_at(&revoked.id, t0()).await.unwrap();

        let at_10 = t0() + Duration::minutes(10);
        let ids: Vec<String> = reg.pending(at_10).unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![early.id.clone(), later.id.clone()]);

        let at_40 = t0() + Duration::minutes(40);
        assert_eq!(reg.sweep(at_40).unwrap(), 1);
        assert_eq!(reg.sweep(at_40).unwrap(), 0);
        let ids: Vec<String> = reg.pending(at_40).unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![later.id]);

        // Swept entries are still on record.
        assert_eq!(reg.all().unwrap().len(), 3);
        assert!(reg.get(&early.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let db = Arc::new(TreasuryDb::open(dir.path()).unwrap());
            let reg = RevocableRegistry::new(db.clone(), WINDOW, Arc::new(LogOnlyCompensation)).unwrap();
            let tx = record(&reg, t0());
            db.flush().unwrap();
            tx.id
        };
        let db = Arc::new(TreasuryDb::open(dir.path()).unwrap());
        let reg = RevocableRegistry::new(db, WINDOW, Arc::new(LogOnlyCompensation)).unwrap();
        reg.revoke_at(&id, t0() + Duration::minutes(5)).await.unwrap();
    }

    struct FailingHook(AtomicUsize);

    #[async_trait]
    impl CompensationHook for FailingHook {
        async fn compensate(&self, _tx: &RevocableTransaction) -> TreasuryResult<CompensationOutcome> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(TreasuryError::NetworkError("rpc down".into()))
        }
    }

    #[tokio::test]
    async fn hook_failure_leaves_entry_revoked() {
        let db = Arc::new(TreasuryDb::open_temporary().unwrap());
        let hook = Arc::new(FailingHook(AtomicUsize::new(0)));
        let reg = RevocableRegistry::new(db, WINDOW, hook.clone()).unwrap();
        let tx = record(&reg, t0());
        assert!(reg.revoke_at(&tx.id, t0()).await.is_err());
        assert_eq!(hook.0.load(Ordering::SeqCst), 1);
        assert!(reg.get(&tx.id).unwrap().unwrap().revoked);
        assert!(matches!(
            reg.revoke_at(&tx.id, t0()).await,
            Err(TreasuryError::AlreadyRevoked(_))
        ));
    }

    #[test]
    fn zero_window_is_rejected() {
        let db = Arc::new(TreasuryDb::open_temporary().unwrap());
        assert!(RevocableRegistry::new(db, std::time::Duration::ZERO, Arc::new(LogOnlyCompensation)).is_err());
    }
}
