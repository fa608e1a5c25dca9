//! # Redeem Allowlist
//!
//! A wallet may redeem pUSD for USDC only if it holds an allowlist entry,
//! and only up to its daily and monthly caps. Counters reset lazily: every
//! check or use first rolls the counters over if the UTC day (or month)
//! changed since the last reset.
//!
//! Limits and counters are in base atomic units of the gross redeem.
//!
//! A withdrawal reserves its allowance before the bundle is submitted, so
//! concurrent redeems from one wallet cannot both fit under the same cap.
//! The reservation is released only when the bundle provably did not land.

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::address::Address;
use crate::error::{LimitWindow, TreasuryError, TreasuryResult};
use crate::storage::{Keyspace, TreasuryDb};

/// Per-wallet redeem caps and usage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemAllowEntry {
    pub wallet: Address,
    pub daily_limit: u64,
    pub monthly_limit: u64,
    pub daily_used: u64,
    pub monthly_used: u64,
    pub last_daily_reset: DateTime<Utc>,
    pub last_monthly_reset: DateTime<Utc>,
}

impl RedeemAllowEntry {
    pub fn new(wallet: Address, daily_limit: u64, monthly_limit: u64, now: DateTime<Utc>) -> Self {
        Self {
            wallet,
            daily_limit,
            monthly_limit,
            daily_used: 0,
            monthly_used: 0,
            last_daily_reset: now,
            last_monthly_reset: now,
        }
    }

    /// Zeroes whichever counters crossed a UTC day or month boundary.
    pub fn roll_over(&mut self, now: DateTime<Utc>) {
        if now.date_naive() > self.last_daily_reset.date_naive() {
            self.daily_used = 0;
            self.last_daily_reset = now;
        }
        if (now.year(), now.month()) > (self.last_monthly_reset.year(), self.last_monthly_reset.month()) {
            self.monthly_used = 0;
            self.last_monthly_reset = now;
        }
    }

    /// Fails with `LimitExceeded` if `amount` does not fit in either window.
    /// Call [`roll_over`](Self::roll_over) first.
    pub fn check(&self, amount: u64) -> TreasuryResult<()> {
        for (window, used, limit) in [
            (LimitWindow::Daily, self.daily_used, self.daily_limit),
            (LimitWindow::Monthly, self.monthly_used, self.monthly_limit),
        ] {
            let fits = used.checked_add(amount).is_some_and(|total| total <= limit);
            if !fits {
                return Err(TreasuryError::LimitExceeded {
                    window,
                    used,
                    requested: amount,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Checks and consumes `amount`.
    pub fn consume(&mut self, amount: u64) -> TreasuryResult<()> {
        self.check(amount)?;
        self.daily_used += amount;
        self.monthly_used += amount;
        Ok(())
    }

    /// Gives back `amount` from every window that has not rolled over since
    /// `reserved_at`. Call [`roll_over`](Self::roll_over) first.
    pub fn unconsume(&mut self, amount: u64, reserved_at: DateTime<Utc>) {
        if self.last_daily_reset <= reserved_at {
            self.daily_used = self.daily_used.saturating_sub(amount);
        }
        if self.last_monthly_reset <= reserved_at {
            self.monthly_used = self.monthly_used.saturating_sub(amount);
        }
    }

    /// Allowance left today, accounting for the monthly cap.
    pub fn remaining(&self) -> u64 {
        let daily = self.daily_limit.saturating_sub(self.daily_used);
        let monthly = self.monthly_limit.saturating_sub(self.monthly_used);
        daily.min(monthly)
    }
}

/// Durable allowlist, one entry per wallet.
#[derive(Debug)]
pub struct RedeemAllowList {
    db: Arc<TreasuryDb>,
    // Serializes read-modify-write of entries.
    write_lock: Mutex<()>,
}

impl RedeemAllowList {
    pub fn new(db: Arc<TreasuryDb>) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    pub fn get(&self, wallet: &Address) -> TreasuryResult<Option<RedeemAllowEntry>> {
        Ok(self.db.get(Keyspace::RedeemAllow, wallet.as_bytes())?)
    }

    /// Creates or updates a wallet's caps. Usage counters are preserved.
    pub fn set_limits(
        &self,
        wallet: &Address,
        daily_limit: u64,
        monthly_limit: u64,
        now: DateTime<Utc>,
    ) -> TreasuryResult<RedeemAllowEntry> {
        if daily_limit > monthly_limit {
            return Err(TreasuryError::InvalidConfig(format!(
                "daily limit {daily_limit} exceeds monthly limit {monthly_limit}"
            )));
        }
        let _guard = self.write_lock.lock();
        let entry = match self.get(wallet)? {
            Some(mut existing) => {
                existing.daily_limit = daily_limit;
                existing.monthly_limit = monthly_limit;
                existing
            }
            None => RedeemAllowEntry::new(*wallet, daily_limit, monthly_limit, now),
        };
        self.db.put(Keyspace::RedeemAllow, wallet.as_bytes(), &entry)?;
        info!(%wallet, daily_limit, monthly_limit, "redeem allowance set");
        Ok(entry)
    }

    pub fn remove(&self, wallet: &Address) -> TreasuryResult<bool> {
        let _guard = self.write_lock.lock();
        Ok(self.db.remove(Keyspace::RedeemAllow, wallet.as_bytes())?)
    }

    fn load(&self, wallet: &Address, now: DateTime<Utc>) -> TreasuryResult<RedeemAllowEntry> {
        let mut entry = self
            .get(wallet)?
            .ok_or_else(|| TreasuryError::Unauthorized(format!("{wallet} has no redeem allowance")))?;
        entry.roll_over(now);
        Ok(entry)
    }

    /// Read-only check, for previews. Does not consume allowance.
    pub fn check(&self, wallet: &Address, amount: u64, now: DateTime<Utc>) -> TreasuryResult<RedeemAllowEntry> {
        let entry = self.load(wallet, now)?;
        entry.check(amount)?;
        Ok(entry)
    }

    /// Checks, consumes, and persists `amount` in one step under the write
    /// lock. Call before submitting the withdrawal.
    pub fn reserve(&self, wallet: &Address, amount: u64, now: DateTime<Utc>) -> TreasuryResult<RedeemAllowEntry> {
        let _guard = self.write_lock.lock();
        let mut entry = self.load(wallet, now)?;
        entry.consume(amount)?;
        self.db.put(Keyspace::RedeemAllow, wallet.as_bytes(), &entry)?;
        debug!(%wallet, amount, daily_used = entry.daily_used, monthly_used = entry.monthly_used, "redeem reserved");
        Ok(entry)
    }

    /// Returns a reservation made at `reserved_at` whose withdrawal never
    /// landed. Windows that rolled over since then are left alone.
    pub fn release(
        &self,
        wallet: &Address,
        amount: u64,
        reserved_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> TreasuryResult<RedeemAllowEntry> {
        let _guard = self.write_lock.lock();
        let mut entry = self.load(wallet, now)?;
        entry.unconsume(amount, reserved_at);
        self.db.put(Keyspace::RedeemAllow, wallet.as_bytes(), &entry)?;
        debug!(%wallet, amount, daily_used = entry.daily_used, monthly_used = entry.monthly_used, "redeem released");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn list() -> RedeemAllowList {
        RedeemAllowList::new(Arc::new(TreasuryDb::open_temporary().unwrap()))
    }

    #[test]
    fn daily_cap_rejects_sixty_accepts_forty() {
        let now = at(2024, 1, 15, 9);
        let mut entry = RedeemAllowEntry::new(Address::from_label("w"), 1_000, 10_000, now);
        entry.daily_used = 950;

        let err = entry.check(60).unwrap_err();
        assert!(matches!(
            err,
            TreasuryError::LimitExceeded { window: LimitWindow::Daily, used: 950, requested: 60, limit: 1_000 }
        ));
        entry.consume(40).unwrap();
        assert_eq!(entry.daily_used, 990);
    }

    #[test]
    fn monthly_cap_applies_independently() {
        let now = at(2024, 1, 15, 9);
        let mut entry = RedeemAllowEntry::new(Address::from_label("w"), 1_000, 1_500, now);
        entry.monthly_used = 1_400;
        assert!(matches!(
            entry.check(200),
            Err(TreasuryError::LimitExceeded { window: LimitWindow::Monthly, .. })
        ));
        assert_eq!(entry.remaining(), 100);
    }

    #[test]
    fn counters_roll_over_at_utc_boundaries() {
        let mut entry = RedeemAllowEntry::new(Address::from_label("w"), 1_000, 5_000, at(2024, 1, 31, 22));
        entry.daily_used = 900;
        entry.monthly_used = 4_900;

        entry.roll_over(at(2024, 1, 31, 23));
        assert_eq!((entry.daily_used, entry.monthly_used), (900, 4_900));

        entry.roll_over(at(2024, 2, 1, 0));
        assert_eq!((entry.daily_used, entry.monthly_used), (0, 0));
    }

    #[test]
    fn day_change_keeps_monthly_usage() {
        let mut entry = RedeemAllowEntry::new(Address::from_label("w"), 1_000, 5_000, at(2024, 3, 4, 12));
        entry.daily_used = 500;
        entry.monthly_used = 2_500;
        entry.roll_over(at(2024, 3, 5, 1));
        assert_eq!((entry.daily_used, entry.monthly_used), (0, 2_500));
    }

    #[test]
    fn unknown_wallet_is_unauthorized() {
        let err = list().check(&Address::from_label("nobody"), 1, at(2024, 1, 1, 0)).unwrap_err();
        assert!(matches!(err, TreasuryError::Unauthorized(_)));
    }

    #[test]
    fn reserve_persists_usage_and_check_does_not() {
        let list = list();
        let wallet = Address::from_label("corp");
        let now = at(2024, 6, 1, 8);
        list.set_limits(&wallet, 1_000, 20_000, now).unwrap();

        list.check(&wallet, 950, now).unwrap();
        assert_eq!(list.get(&wallet).unwrap().unwrap().daily_used, 0);

        list.reserve(&wallet, 950, now).unwrap();
        assert!(list.check(&wallet, 60, now).is_err());
        assert!(list.reserve(&wallet, 60, now).is_err());
        list.reserve(&wallet, 40, now).unwrap();
        assert_eq!(list.get(&wallet).unwrap().unwrap().daily_used, 990);

        // Next day the daily window is fresh again.
        list.check(&wallet, 1_000, at(2024, 6, 2, 8)).unwrap();
    }

    #[test]
    fn release_returns_allowance_in_the_same_window() {
        let list = list();
        let wallet = Address::from_label("corp");
        let now = at(2024, 6, 1, 8);
        list.set_limits(&wallet, 1_000, 20_000, now).unwrap();

        list.reserve(&wallet, 600, now).unwrap();
        let entry = list.release(&wallet, 600, now, at(2024, 6, 1, 9)).unwrap();
        assert_eq!((entry.daily_used, entry.monthly_used), (0, 0));
        list.reserve(&wallet, 1_000, now).unwrap();
    }

    #[test]
    fn release_after_midnight_leaves_the_new_day_alone() {
        let list = list();
        let wallet = Address::from_label("corp");
        let reserved_at = at(2024, 6, 1, 23);
        list.set_limits(&wallet, 1_000, 20_000, reserved_at).unwrap();
        list.reserve(&wallet, 600, reserved_at).unwrap();

        let next_day = at(2024, 6, 2, 0);
        list.reserve(&wallet, 300, next_day).unwrap();
        let entry = list.release(&wallet, 600, reserved_at, next_day).unwrap();
        assert_eq!(entry.daily_used, 300);
        assert_eq!(entry.monthly_used, 300);
    }

    #[test]
    fn concurrent_reservations_cannot_exceed_the_cap() {
        let list = Arc::new(list());
        let wallet = Address::from_label("corp");
        let now = at(2024, 6, 1, 8);
        list.set_limits(&wallet, 20, 1_000, now).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let list = Arc::clone(&list);
                std::thread::spawn(move || list.reserve(&wallet, 15, now).is_ok())
            })
            .collect();
        let granted = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(granted, 1);
        assert_eq!(list.get(&wallet).unwrap().unwrap().daily_used, 15);
    }

    #[test]
    fn updating_limits_keeps_counters() {
        let list = list();
        let wallet = Address::from_label("corp");
        let now = at(2024, 6, 1, 8);
        list.set_limits(&wallet, 1_000, 20_000, now).unwrap();
        list.reserve(&wallet, 700, now).unwrap();
        let entry = list.set_limits(&wallet, 2_000, 20_000, now).unwrap();
        assert_eq!(entry.daily_used, 700);
        assert!(list.set_limits(&wallet, 30_000, 20_000, now).is_err());
        assert!(list.remove(&wallet).unwrap());
    }
}
