//! Integration tests for the primitives as the engine composes them:
//! keypairs sign bundles, the simulated ledger applies them atomically, and
//! the peg ledger observes the result. Each test owns its ledger and, where
//! persistence matters, its own temporary database.

use pusd_protocol::address::Address;
use pusd_protocol::asset::AssetKind;
use pusd_protocol::config::TreasuryConfig;
use pusd_protocol::error::TreasuryError;
use pusd_protocol::instruction::{Instruction, SignedBundle, TransactionBundle};
use pusd_protocol::keys::TreasuryKeypair;
use pusd_protocol::ledger::{submit_and_confirm, LedgerClient, LedgerState, SimulatedLedger};
use pusd_protocol::peg::{PegLedger, ReserveAccounts};
use pusd_protocol::storage::{Keyspace, TreasuryDb};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn peg(config: &TreasuryConfig) -> PegLedger {
    PegLedger::new(
        ReserveAccounts::from_config(config).unwrap(),
        config.unit_converter().unwrap(),
    )
}

/// A hand-built corporate deposit: USDC into the corporate vault, pUSD minted
/// to the depositor, one bundle.
fn deposit_bundle(config: &TreasuryConfig, user: &TreasuryKeypair, amount: u64) -> SignedBundle {
    let mut bundle = TransactionBundle::new(user.address()).with_memo("corporate deposit");
    bundle.extend(vec![
        Instruction::CreateTokenAccount {
            owner: config.corporate_vault,
            asset: AssetKind::Base,
        },
        Instruction::CreateTokenAccount {
            owner: user.address(),
            asset: AssetKind::Pegged,
        },
        Instruction::Transfer {
            asset: AssetKind::Base,
            from: user.address(),
            to: config.corporate_vault,
            amount,
        },
        Instruction::MintTo {
            to: user.address(),
            amount,
        },
    ]);
    bundle.sign(user).unwrap()
}

fn funded_user(ledger: &SimulatedLedger, base: u64) -> TreasuryKeypair {
    let user = TreasuryKeypair::generate();
    ledger.airdrop(&user.address(), AssetKind::Base, base);
    user
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deposit_bundle_keeps_the_peg() {
    let config = TreasuryConfig::default();
    let ledger = SimulatedLedger::new();
    let peg = peg(&config);
    let user = funded_user(&ledger, 100_000_000);

    let confirmation = submit_and_confirm(&ledger, &deposit_bundle(&config, &user, 50_000_000))
        .await
        .unwrap();
    assert_eq!(confirmation.slot, 1);

    let snapshot = peg.check(&ledger).await.unwrap();
    assert_eq!(snapshot.reserves.corporate_vault, 50_000_000);
    assert_eq!(snapshot.supply, 50_000_000);
    assert_eq!(ledger.balance(&user.address(), AssetKind::Base).await.unwrap(), 50_000_000);
}

#[tokio::test]
async fn minting_without_reserves_is_caught() {
    let config = TreasuryConfig::default();
    let ledger = SimulatedLedger::new();
    let peg = peg(&config);
    let minter = TreasuryKeypair::generate();

    let mut bundle = TransactionBundle::new(minter.address());
    bundle.extend(vec![
        Instruction::CreateTokenAccount {
            owner: minter.address(),
            asset: AssetKind::Pegged,
        },
        Instruction::MintTo {
            to: minter.address(),
            amount: 10,
        },
    ]);
    submit_and_confirm(&ledger, &bundle.sign(&minter).unwrap()).await.unwrap();

    let err = peg.check(&ledger).await.unwrap_err();
    assert!(matches!(
        err,
        TreasuryError::InvariantViolation { supply: 10, reserves: 0, multiplier: 1 }
    ));
}

#[tokio::test]
async fn lost_response_is_reported_as_landed() {
    let config = TreasuryConfig::default();
    let ledger = SimulatedLedger::new();
    let user = funded_user(&ledger, 10_000_000);
    let signed = deposit_bundle(&config, &user, 10_000_000);

    ledger.drop_next_response();
    let confirmation = submit_and_confirm(&ledger, &signed).await.unwrap();
    assert_eq!(confirmation.signature, signed.id());
    assert_eq!(ledger.supply().await.unwrap(), 10_000_000);

    // Re-submitting the same bundle is refused rather than applied twice.
    assert!(matches!(
        ledger.submit(&signed).await,
        Err(TreasuryError::LedgerRejected(_))
    ));
    assert_eq!(ledger.supply().await.unwrap(), 10_000_000);
}

#[tokio::test]
async fn submission_that_never_arrived_stays_a_network_error() {
    let config = TreasuryConfig::default();
    let ledger = SimulatedLedger::new();
    let user = funded_user(&ledger, 10_000_000);

    ledger.fail_next_submission();
    let err = submit_and_confirm(&ledger, &deposit_bundle(&config, &user, 10_000_000))
        .await
        .unwrap_err();
    assert!(err.may_have_landed());
    assert_eq!(ledger.supply().await.unwrap(), 0);
    assert_eq!(ledger.balance(&user.address(), AssetKind::Base).await.unwrap(), 10_000_000);
}

#[tokio::test]
async fn ledger_snapshot_survives_a_database_restart() {
    let config = TreasuryConfig::default();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let user = TreasuryKeypair::generate();

    {
        let ledger = SimulatedLedger::new();
        ledger.airdrop(&user.address(), AssetKind::Base, 30_000_000);
        submit_and_confirm(&ledger, &deposit_bundle(&config, &user, 20_000_000))
            .await
            .unwrap();
        let db = TreasuryDb::open(&path).unwrap();
        db.put(Keyspace::Metadata, b"ledger", &ledger.snapshot()).unwrap();
        db.flush().unwrap();
    }

    let db = TreasuryDb::open(&path).unwrap();
    let state: LedgerState = db.get_required(Keyspace::Metadata, b"ledger").unwrap();
    let ledger = SimulatedLedger::from_state(state);
    assert_eq!(ledger.balance(&user.address(), AssetKind::Pegged).await.unwrap(), 20_000_000);
    assert_eq!(ledger.balance(&user.address(), AssetKind::Base).await.unwrap(), 10_000_000);
    peg(&config).check(&ledger).await.unwrap();
    assert!(!ledger
        .token_account_exists(&Address::from_label("nobody"), AssetKind::Base)
        .await
        .unwrap());
}
