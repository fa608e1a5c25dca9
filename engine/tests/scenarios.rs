//! End-to-end scenarios across the engine.
//!
//! Every test wires real components (sled in a temp dir, the simulated
//! ledger, the confidential simulator) and checks the peg from the ledger's
//! point of view, not from the workflow's own bookkeeping.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use pusd_engine::confidential::SimulatedConfidentialLedger;
use pusd_engine::payroll::{PayrollEscrow, ScheduleRequest};
use pusd_engine::rebalance::{RebalanceDecision, Rebalancer, StrategyRegistry};
use pusd_engine::revocable::{LogOnlyCompensation, RevocableRegistry};
use pusd_engine::treasury::TreasuryService;
use pusd_engine::{peg_ledger, BatchStatus, ConfidentialTransferWorkflow};
use pusd_protocol::account::{Role, TreasuryAccount};
use pusd_protocol::address::Address;
use pusd_protocol::asset::AssetKind;
use pusd_protocol::config::TreasuryConfig;
use pusd_protocol::error::{LimitWindow, TreasuryError};
use pusd_protocol::keys::TreasuryKeypair;
use pusd_protocol::ledger::{LedgerClient, SimulatedLedger};
use pusd_protocol::merkle::{payroll_root, PayrollLeaf};
use pusd_protocol::pda::ProgramAddresses;
use pusd_protocol::redeem::RedeemAllowList;
use pusd_protocol::state::{ConfigPda, STRATEGY_LENDING};
use pusd_protocol::storage::TreasuryDb;

/// Helper: everything a scenario needs, on one ledger and one database.
struct Harness {
    config: TreasuryConfig,
    ledger: Arc<SimulatedLedger>,
    db: Arc<TreasuryDb>,
    strategies: StrategyRegistry,
    _dir: tempfile::TempDir,
}

fn harness_with(config: TreasuryConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(TreasuryDb::open(dir.path().join("db")).unwrap());
    let strategies = StrategyRegistry::with_vault_strategies(&ProgramAddresses::new(config.program_id)).unwrap();
    Harness {
        config,
        ledger: Arc::new(SimulatedLedger::new()),
        db,
        strategies,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(TreasuryConfig::default())
}

impl Harness {
    fn treasury(&self) -> TreasuryService {
        let peg = peg_ledger(&self.config, &self.strategies).unwrap();
        TreasuryService::new(self.ledger.clone(), peg, self.config.fee_policy()).unwrap()
    }

    fn escrow(&self) -> PayrollEscrow {
        PayrollEscrow::new(
            self.ledger.clone(),
            self.db.clone(),
            ProgramAddresses::new(self.config.program_id),
            self.config.unit_converter().unwrap(),
        )
    }

    fn registry(&self) -> Arc<RevocableRegistry> {
        Arc::new(
            RevocableRegistry::new(self.db.clone(), self.config.revocation_window(), Arc::new(LogOnlyCompensation))
                .unwrap(),
        )
    }

    fn funded(&self, asset: AssetKind, amount: u64) -> TreasuryKeypair {
        let kp = TreasuryKeypair::generate();
        self.ledger.airdrop(&kp.address(), asset, amount);
        kp
    }
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-31T17:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

// ---------------------------------------------------------------------------
// Peg
// ---------------------------------------------------------------------------

#[tokio::test]
async fn corporate_deposit_then_withdraw_keeps_the_peg() {
    let h = harness();
    let treasury = h.treasury();
    let corporate = h.funded(AssetKind::Base, 100_000_000);
    let multiplier = h.config.decimal_multiplier;

    let deposit = treasury.deposit(&corporate, Role::Corporate, "100").await.unwrap();
    assert_eq!(deposit.snapshot.supply, 100_000_000 * multiplier);
    deposit.snapshot.check().unwrap();

    let withdraw = treasury.withdraw(&corporate, Role::Corporate, "50").await.unwrap();
    assert_eq!(withdraw.plan.fee, 500_000);
    assert_eq!(withdraw.plan.net, 49_500_000);
    assert_eq!(withdraw.snapshot.supply, 50_000_000 * multiplier);
    withdraw.snapshot.check().unwrap();

    let yield_account = treasury.peg().accounts().yield_account;
    assert_eq!(h.ledger.balance(&yield_account, AssetKind::Base).await.unwrap(), 500_000);
    assert_eq!(
        h.ledger.balance(&corporate.address(), AssetKind::Base).await.unwrap(),
        49_500_000
    );
}

#[tokio::test]
async fn nine_decimal_deployment_scales_supply_by_the_multiplier() {
    let mut config = TreasuryConfig::default();
    config.pegged_asset.decimals = 9;
    config.decimal_multiplier = 1_000;
    let h = harness_with(config);
    let treasury = h.treasury();
    let corporate = h.funded(AssetKind::Base, 100_000_000);

    let deposit = treasury.deposit(&corporate, Role::Corporate, "100").await.unwrap();
    assert_eq!(deposit.snapshot.supply, 100_000_000_000);

    let withdraw = treasury.withdraw(&corporate, Role::Corporate, "50").await.unwrap();
    assert_eq!(withdraw.plan.pegged, 50_000_000_000);
    assert_eq!(withdraw.plan.fee, 500_000);
    withdraw.snapshot.check().unwrap();

    // A pegged amount finer than the base precision cannot be redeemed.
    assert!(matches!(
        treasury.withdraw(&corporate, Role::Corporate, "0.0000001").await,
        Err(TreasuryError::InvalidAmount(_))
    ));
}

#[tokio::test]
async fn mixed_actors_hold_the_invariant_after_every_operation() {
    let h = harness();
    let treasury = h.treasury();
    let corporate = h.funded(AssetKind::Base, 1_000_000_000);
    let employee = h.funded(AssetKind::Base, 50_000_000);

    let steps: [(&TreasuryKeypair, Role, bool, &str); 6] = [
        (&corporate, Role::Corporate, true, "400"),
        (&employee, Role::Employee, true, "50"),
        (&corporate, Role::Corporate, false, "123.45"),
        (&employee, Role::Employee, false, "20"),
        (&corporate, Role::Corporate, true, "0.000001"),
        (&employee, Role::Employee, false, "30"),
    ];
    for (actor, role, is_deposit, amount) in steps {
        let result = if is_deposit {
            treasury.deposit(actor, role, amount).await
        } else {
            treasury.withdraw(actor, role, amount).await
        };
        let receipt = result.unwrap();
        receipt.snapshot.check().unwrap();
        assert_eq!(receipt.snapshot, treasury.peg().observe(h.ledger.as_ref()).await.unwrap());
    }
}

#[tokio::test]
async fn vault_shortfall_is_refused_before_submission() {
    let h = harness();
    let treasury = h.treasury();
    let corporate = h.funded(AssetKind::Base, 10_000_000);
    treasury.deposit(&corporate, Role::Corporate, "10").await.unwrap();
    // pUSD obtained elsewhere cannot drain a vault that never backed it.
    let employee = h.funded(AssetKind::Pegged, 5_000_000);
    let before = h.ledger.snapshot();

    let err = treasury.withdraw(&employee, Role::Employee, "5").await.unwrap_err();
    assert!(matches!(err, TreasuryError::InsufficientBalance { ref account, .. } if account == "treasury vault"));
    assert_eq!(h.ledger.snapshot(), before);
}

// ---------------------------------------------------------------------------
// Payroll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn payroll_2024_01_releases_once_after_its_time() {
    let h = harness();
    let escrow = h.escrow();
    let funder = h.funded(AssetKind::Pegged, 1_000_000_000);
    let a = PayrollLeaf::new(Address::from_label("employee-a"), 100_000_000);
    let b = PayrollLeaf::new(Address::from_label("employee-b"), 200_000_000);
    let staff = [a, b];
    let now = t0();

    let batch = escrow
        .schedule_payroll_at(
            &funder,
            ScheduleRequest {
                batch_id: "2024-01",
                merkle_root: payroll_root(&staff),
                total_ui: "300",
                employee_count: 2,
                release_at: now + Duration::seconds(60),
            },
            now,
        )
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Scheduled);

    let early = escrow
        .thaw_payroll_at(&funder, "2024-01", &staff, now + Duration::seconds(10))
        .await
        .unwrap_err();
    assert!(matches!(early, TreasuryError::ReleaseNotReached { .. }));

    let receipt = escrow
        .thaw_payroll_at(&funder, "2024-01", &staff, now + Duration::seconds(70))
        .await
        .unwrap();
    assert_eq!(receipt.batch.status, BatchStatus::Thawed);
    assert_eq!(h.ledger.balance(&a.wallet, AssetKind::Pegged).await.unwrap(), 100_000_000);
    assert_eq!(h.ledger.balance(&b.wallet, AssetKind::Pegged).await.unwrap(), 200_000_000);

    let again = escrow
        .thaw_payroll_at(&funder, "2024-01", &staff, now + Duration::seconds(80))
        .await
        .unwrap_err();
    assert!(matches!(again, TreasuryError::BatchAlreadyClosed(_)));
    assert_eq!(escrow.batch("2024-01").unwrap().unwrap().status, BatchStatus::Thawed);
}

#[tokio::test]
async fn thaw_sums_must_match_the_frozen_total() {
    let h = harness();
    let escrow = h.escrow();
    let funder = h.funded(AssetKind::Pegged, 5_000_000_000);
    let wallet_a = Address::from_label("a");
    let wallet_b = Address::from_label("b");
    let scheduled = [PayrollLeaf::new(wallet_a, 400_000_000), PayrollLeaf::new(wallet_b, 600_000_000)];
    let now = t0();
    escrow
        .schedule_employees_at(&funder, "2024-02", &scheduled, now + Duration::seconds(60), now)
        .await
        .unwrap();
    let release = now + Duration::seconds(60);

    for (first, second, distributed) in [(400u64, 500u64, 900_000_000u64), (400, 700, 1_100_000_000)] {
        let list = [
            PayrollLeaf::new(wallet_a, first * 1_000_000),
            PayrollLeaf::new(wallet_b, second * 1_000_000),
        ];
        let err = escrow.thaw_payroll_at(&funder, "2024-02", &list, release).await.unwrap_err();
        assert!(matches!(
            err,
            TreasuryError::PayrollSumMismatch { total: 1_000_000_000, distributed: d, .. } if d == distributed
        ));
    }
    // Nothing moved.
    assert_eq!(h.ledger.balance(&wallet_a, AssetKind::Pegged).await.unwrap(), 0);
    escrow.thaw_payroll_at(&funder, "2024-02", &scheduled, release).await.unwrap();
}

#[tokio::test]
async fn batches_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = TreasuryConfig::default();
    let ledger = Arc::new(SimulatedLedger::new());
    let funder = TreasuryKeypair::generate();
    ledger.airdrop(&funder.address(), AssetKind::Pegged, 10_000_000);
    let staff = [PayrollLeaf::new(Address::from_label("e"), 10_000_000)];
    let now = t0();

    {
        let db = Arc::new(TreasuryDb::open(dir.path()).unwrap());
        let escrow = PayrollEscrow::new(
            ledger.clone(),
            db.clone(),
            ProgramAddresses::new(config.program_id),
            config.unit_converter().unwrap(),
        );
        escrow
            .schedule_employees_at(&funder, "2024-03", &staff, now + Duration::seconds(1), now)
            .await
            .unwrap();
        db.flush().unwrap();
    }

    let db = Arc::new(TreasuryDb::open(dir.path()).unwrap());
    let escrow = PayrollEscrow::new(
        ledger,
        db,
        ProgramAddresses::new(config.program_id),
        config.unit_converter().unwrap(),
    );
    let receipt = escrow
        .thaw_payroll_at(&funder, "2024-03", &staff, now + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(receipt.distributed.len(), 1);
}

// ---------------------------------------------------------------------------
// Revocation and confidential transfers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn revocation_window_boundary() {
    let h = harness();
    let registry = h.registry();
    let corp = Address::from_label("corp");
    let emp = Address::from_label("emp");
    let window = Duration::minutes(30);

    let on_time = registry.record_at(corp, emp, "10", "sig-1", t0()).unwrap();
    let at_boundary = registry.record_at(corp, emp, "10", "sig-2", t0()).unwrap();
    let too_late = registry.record_at(corp, emp, "10", "sig-3", t0()).unwrap();

    registry.revoke_at(&on_time.id, t0()).await.unwrap();
    registry.revoke_at(&at_boundary.id, t0() + window).await.unwrap();
    assert!(matches!(
        registry.revoke_at(&too_late.id, t0() + window + Duration::seconds(1)).await,
        Err(TreasuryError::RevocationExpired { .. })
    ));
    assert!(matches!(
        registry.revoke_at(&on_time.id, t0() + Duration::minutes(1)).await,
        Err(TreasuryError::AlreadyRevoked(_))
    ));
}

#[tokio::test]
async fn corporate_confidential_transfer_can_be_revoked_after_restart() {
    let h = harness();
    let converter = h.config.unit_converter().unwrap();
    let confidential = Arc::new(SimulatedConfidentialLedger::new(h.ledger.clone()));
    let workflow = ConfidentialTransferWorkflow::new(confidential, h.registry(), converter);
    let corporate = TreasuryAccount::register(Address::from_label("corp"), Role::Corporate, Some("hq".into()));
    let employee = Address::from_label("emp");
    h.ledger.airdrop(corporate.owner(), AssetKind::Pegged, 50_000_000);

    let report = workflow.run_transfer_cycle(&corporate, &employee, "12.5").await;
    assert!(report.is_complete());
    let id = report.revocable.unwrap().id;

    // A fresh registry over the same store still knows the transfer.
    let restarted = h.registry();
    let pending = restarted.pending(Utc::now()).unwrap();
    assert_eq!(pending.len(), 1);
    let receipt = restarted.revoke(&id).await.unwrap();
    assert!(receipt.transaction.revoked);
}

// ---------------------------------------------------------------------------
// Redeem limits
// ---------------------------------------------------------------------------

#[tokio::test]
async fn daily_redeem_cap_rejects_sixty_after_nine_fifty() {
    let h = harness();
    let allowlist = Arc::new(RedeemAllowList::new(h.db.clone()));
    let treasury = h.treasury().with_allowlist(allowlist.clone());
    let corporate = h.funded(AssetKind::Base, 10_000_000_000);
    treasury.deposit(&corporate, Role::Corporate, "5000").await.unwrap();

    // Limits in base atomic units: 1000 USDC a day.
    allowlist
        .set_limits(&corporate.address(), 1_000_000_000, 30_000_000_000, Utc::now())
        .unwrap();
    treasury.withdraw(&corporate, Role::Corporate, "950").await.unwrap();

    let err = treasury.withdraw(&corporate, Role::Corporate, "60").await.unwrap_err();
    assert!(matches!(err, TreasuryError::LimitExceeded { window: LimitWindow::Daily, .. }));
    treasury.withdraw(&corporate, Role::Corporate, "40").await.unwrap();
}

// ---------------------------------------------------------------------------
// Rebalancing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rebalance_keeps_the_peg_while_moving_float() {
    let h = harness();
    let treasury = h.treasury();
    let employee = h.funded(AssetKind::Base, 200_000_000);
    treasury.deposit(&employee, Role::Employee, "200").await.unwrap();

    let authority = TreasuryKeypair::generate();
    let bot = TreasuryKeypair::generate();
    let config = ConfigPda {
        float_min_pct: 20,
        float_max_pct: 50,
        strategy_id: STRATEGY_LENDING,
        risk_param: 3,
        authority: authority.address(),
        delegated_signer: Some(bot.address()),
    };
    let rebalancer = Rebalancer::new(
        h.ledger.clone(),
        peg_ledger(&h.config, &h.strategies).unwrap(),
        h.strategies.clone(),
        config,
        bot,
        h.config.rebalance_interval(),
    );

    let outcome = rebalancer.tick().await.unwrap();
    assert_eq!(outcome.decision, RebalanceDecision::InvestSurplus { amount: 100_000_000 });
    outcome.snapshot.check().unwrap();

    // Employee redeems most of the float; the next tick pulls funds back.
    treasury.withdraw(&employee, Role::Employee, "90").await.unwrap();
    let outcome = rebalancer.tick().await.unwrap();
    assert!(matches!(outcome.decision, RebalanceDecision::WithdrawDeficit { .. }));
    outcome.snapshot.check().unwrap();
    assert!(outcome.snapshot.reserves.liquid().unwrap() * 100 >= outcome.snapshot.supply * 20);
}
