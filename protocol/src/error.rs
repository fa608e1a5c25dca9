//! Error taxonomy for treasury, escrow, and registry operations.
//!
//! Every fallible operation in the workspace returns a [`TreasuryError`].
//! Validation variants are raised before anything is submitted to the
//! ledger. [`TreasuryError::NetworkError`] is the only variant that can
//! surface *after* a submission, and it does not mean "nothing happened".

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage::db::DbError;

/// Which redeem window a limit check failed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitWindow {
    Daily,
    Monthly,
}

impl std::fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitWindow::Daily => write!(f, "daily"),
            LimitWindow::Monthly => write!(f, "monthly"),
        }
    }
}

/// Errors produced by the treasury core.
#[derive(Debug, Error)]
pub enum TreasuryError {
    /// Amount is negative, zero where zero is meaningless, not representable
    /// at the asset's precision, or overflows `u64`.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// An actor or a reserve vault does not hold enough funds.
    #[error("insufficient balance in {account}: available {available}, required {required}")]
    InsufficientBalance {
        /// Human-readable account label (actor address or vault name).
        account: String,
        /// Balance currently held, in atomic units.
        available: u64,
        /// Balance the operation needs, in atomic units.
        required: u64,
    },

    /// `supply == reserves x multiplier` does not hold.
    #[error("peg invariant violated: supply {supply} != reserves {reserves} x {multiplier}")]
    InvariantViolation {
        /// Pegged-asset supply in atomic units.
        supply: u64,
        /// Base-asset reserves in atomic units.
        reserves: u64,
        /// Decimal multiplier between the two assets.
        multiplier: u64,
    },

    /// Missing redeem allowlist entry, wrong role, or wrong signer.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A redeem would push a wallet past its daily or monthly cap.
    #[error("{window} redeem limit exceeded: used {used} + requested {requested} > limit {limit}")]
    LimitExceeded {
        /// The window that rejected the redeem.
        window: LimitWindow,
        /// Amount already used in the window.
        used: u64,
        /// Amount requested by this redeem.
        requested: u64,
        /// Configured cap for the window.
        limit: u64,
    },

    /// Float bounds fail `0 <= min < max <= 90`.
    #[error("float bounds violation: min {min_pct}%, max {max_pct}%")]
    FloatBoundsViolation {
        /// Configured lower bound (percent).
        min_pct: u8,
        /// Configured upper bound (percent).
        max_pct: u8,
    },

    /// Strategy id is outside the known set or has no installed implementation.
    #[error("yield strategy {0} is not available")]
    StrategyNotAvailable(u8),

    #[error("payroll batch {0} already exists")]
    BatchAlreadyExists(String),

    #[error("payroll batch {0} is already closed")]
    BatchAlreadyClosed(String),

    #[error("payroll batch {0} not found")]
    BatchNotFound(String),

    /// Scheduling with a release time that is not strictly in the future.
    #[error("release time {release_at} is not after now ({now})")]
    ReleaseInPast {
        release_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Thaw attempted before the batch release time.
    #[error("payroll batch {batch_id} is locked until {release_at} (now {now})")]
    ReleaseNotReached {
        batch_id: String,
        release_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// Thaw distribution does not add up to the amount frozen at schedule time.
    #[error("payroll batch {batch_id}: employee amounts sum to {distributed}, batch total is {total}")]
    PayrollSumMismatch {
        batch_id: String,
        total: u64,
        distributed: u64,
    },

    #[error("merkle proof rejected for {0}")]
    InvalidMerkleProof(String),

    #[error("revocable transaction {0} not found")]
    TransactionNotFound(String),

    #[error("revocable transaction {0} was already revoked")]
    AlreadyRevoked(String),

    #[error("revocation window for {id} closed at {expires_at}")]
    RevocationExpired {
        id: String,
        expires_at: DateTime<Utc>,
    },

    /// Confidential operation on an account that was never configured.
    #[error("account {0} is not configured for confidential transfers")]
    AccountNotConfigured(String),

    #[error("invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The ledger evaluated the bundle and refused it. Nothing landed.
    #[error("transaction rejected by ledger: {0}")]
    LedgerRejected(String),

    /// Transport failure. The submission may or may not have landed.
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl TreasuryError {
    /// Returns `true` when a submission that produced this error might
    /// still have been applied by the ledger. Callers must re-query
    /// confirmed state before retrying.
    pub fn may_have_landed(&self) -> bool {
        matches!(self, TreasuryError::NetworkError(_))
    }
}

pub type TreasuryResult<T> = Result<T, TreasuryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_may_have_landed() {
        assert!(TreasuryError::NetworkError("timeout".into()).may_have_landed());
        assert!(!TreasuryError::LedgerRejected("bad".into()).may_have_landed());
        assert!(!TreasuryError::InvalidAmount("x".into()).may_have_landed());
    }

    #[test]
    fn limit_message_names_the_window() {
        let err = TreasuryError::LimitExceeded {
            window: LimitWindow::Daily,
            used: 950,
            requested: 60,
            limit: 1000,
        };
        assert!(err.to_string().starts_with("daily redeem limit exceeded"));
    }
}
