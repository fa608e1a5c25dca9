//! Applies the rebalance decision against the ledger, once per tick.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use pusd_protocol::asset::AssetKind;
use pusd_protocol::error::{TreasuryError, TreasuryResult};
use pusd_protocol::instruction::TransactionBundle;
use pusd_protocol::keys::TreasuryKeypair;
use pusd_protocol::ledger::{submit_and_confirm, LedgerClient};
use pusd_protocol::peg::{PegLedger, PegSnapshot};
use pusd_protocol::state::ConfigPda;

use super::policy::{decide, float_ratio_pct, RebalanceDecision};
use super::strategy::StrategyRegistry;

/// What one tick saw and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceOutcome {
    pub decision: RebalanceDecision,
    /// Base units actually moved, after clamping to what the source holds.
    pub executed: u64,
    pub float_ratio_pct: u64,
    pub signature: Option<String>,
    pub snapshot: PegSnapshot,
}

pub struct Rebalancer {
    ledger: Arc<dyn LedgerClient>,
    peg: PegLedger,
    strategies: StrategyRegistry,
    config: RwLock<ConfigPda>,
    signer: TreasuryKeypair,
    interval: Duration,
}

impl std::fmt::Debug for Rebalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rebalancer")
            .field("strategies", &self.strategies)
            .field("signer", &self.signer)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Rebalancer {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        peg: PegLedger,
        strategies: StrategyRegistry,
        config: ConfigPda,
        signer: TreasuryKeypair,
        interval: Duration,
    ) -> Self {
        Self {
            ledger,
            peg,
            strategies,
            config: RwLock::new(config),
            signer,
            interval,
        }
    }

    pub fn config(&self) -> ConfigPda {
        self.config.read().clone()
    }

    /// Replaces the config after validating it. Takes effect on the next tick.
    pub fn set_config(&self, config: ConfigPda) -> TreasuryResult<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    /// One independent evaluation: observe, decide, move, re-check.
    ///
    /// # Errors
    ///
    /// `FloatBoundsViolation` or `StrategyNotAvailable` for a bad config,
    /// `Unauthorized` if the signer may not act for it, and anything the
    /// ledger or the peg check reports.
    pub async fn tick(&self) -> TreasuryResult<RebalanceOutcome> {
        let config = self.config();
        config.validate()?;
        let signer = self.signer.address();
        if !config.is_authorized(&signer) {
            return Err(TreasuryError::Unauthorized(format!(
                "{signer} is neither the config authority nor its delegate"
            )));
        }
        let strategy = self.strategies.get(config.strategy_id)?;

        let snapshot = self.peg.observe(self.ledger.as_ref()).await?;
        let float = snapshot
            .reserves
            .liquid()
            .ok_or_else(|| TreasuryError::InvalidAmount("liquid reserves overflow u64".into()))?;
        let supply = snapshot.supply_in_base();
        let ratio = float_ratio_pct(float, supply);
        let decision = decide(float, supply, config.float_min_pct, config.float_max_pct);
        debug!(float, supply, ratio, %decision, "rebalance evaluated");

        let treasury_vault = self.peg.accounts().treasury_vault;
        let (executed, legs) = match decision {
            RebalanceDecision::NoAction => (0, Vec::new()),
            RebalanceDecision::InvestSurplus { amount } => {
                let amount = amount.min(snapshot.reserves.treasury_vault);
                (amount, strategy.invest(treasury_vault, amount))
            }
            RebalanceDecision::WithdrawDeficit { amount } => {
                let deployed = self.ledger.balance(&strategy.vault(), AssetKind::Base).await?;
                let amount = amount.min(deployed);
                (amount, strategy.withdraw(treasury_vault, amount))
            }
        };
        if executed == 0 {
            return Ok(RebalanceOutcome {
                decision,
                executed: 0,
                float_ratio_pct: ratio,
                signature: None,
                snapshot,
            });
        }

        let mut bundle = TransactionBundle::new(signer).with_memo(format!("rebalance via {}", strategy.name()));
        bundle.extend(legs);
        let confirmation = submit_and_confirm(self.ledger.as_ref(), &bundle.sign(&self.signer)?).await?;
        let snapshot = self.peg.check(self.ledger.as_ref()).await?;
        info!(
            %decision,
            executed,
            strategy = strategy.name(),
            signature = %confirmation.signature,
            "rebalance applied"
        );
        Ok(RebalanceOutcome {
            decision,
            executed,
            float_ratio_pct: ratio,
            signature: Some(confirmation.signature),
            snapshot,
        })
    }

    /// Ticks every `interval` until `shutdown` flips to true or its sender
    /// drops. Failed ticks are logged and the loop carries on. Returns the
    /// number of ticks run.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> u64 {
        info!(interval_secs = self.interval.as_secs(), "rebalance loop starting");
        let mut ticks = 0u64;
        loop {
            if *shutdown.borrow() {
                break;
            }
            ticks += 1;
            match self.tick().await {
                Ok(outcome) => debug!(tick = ticks, decision = %outcome.decision, "rebalance tick done"),
                Err(e) => warn!(tick = ticks, error = %e, "rebalance tick failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(ticks, "rebalance loop stopped");
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pusd_protocol::address::Address;
    use pusd_protocol::config::TreasuryConfig;
    use pusd_protocol::ledger::SimulatedLedger;
    use pusd_protocol::pda::ProgramAddresses;
    use pusd_protocol::state::STRATEGY_YIELD_MASTER;

    struct Fixture {
        ledger: Arc<SimulatedLedger>,
        rebalancer: Rebalancer,
        strategy_vault: Address,
    }

    fn config_pda(authority: Address, min: u8, max: u8) -> ConfigPda {
        ConfigPda {
            float_min_pct: min,
            float_max_pct: max,
            strategy_id: STRATEGY_YIELD_MASTER,
            risk_param: 0,
            authority,
            delegated_signer: None,
        }
    }

    fn fixture(min: u8, max: u8) -> Fixture {
        let config = TreasuryConfig::default();
        let ledger = Arc::new(SimulatedLedger::new());
        let strategies = StrategyRegistry::with_vault_strategies(&ProgramAddresses::new(config.program_id)).unwrap();
        let strategy_vault = strategies.get(STRATEGY_YIELD_MASTER).unwrap().vault();
        let peg = crate::peg_ledger(&config, &strategies).unwrap();
        ledger.airdrop(&peg.accounts().treasury_vault, AssetKind::Base, 100_000_000);
        ledger.airdrop(&Address::from_label("holder"), AssetKind::Pegged, 100_000_000);
        let signer = TreasuryKeypair::generate();
        let pda = config_pda(signer.address(), min, max);
        Fixture {
            ledger: ledger.clone(),
            rebalancer: Rebalancer::new(ledger, peg, strategies, pda, signer, Duration::from_secs(300)),
            strategy_vault,
        }
    }

    #[tokio::test]
    async fn surplus_is_invested_then_settles() {
        let f = fixture(10, 30);
        let outcome = f.rebalancer.tick().await.unwrap();
        assert_eq!(outcome.decision, RebalanceDecision::InvestSurplus { amount: 70_000_000 });
        assert_eq!(outcome.executed, 70_000_000);
        assert_eq!(outcome.float_ratio_pct, 100);
        assert_eq!(outcome.snapshot.reserves.strategies, 70_000_000);
        outcome.snapshot.check().unwrap();

        let again = f.rebalancer.tick().await.unwrap();
        assert_eq!(again.decision, RebalanceDecision::NoAction);
        assert!(again.signature.is_none());
    }

    #[tokio::test]
    async fn deficit_is_pulled_back_from_the_strategy() {
        let f = fixture(10, 30);
        f.rebalancer.tick().await.unwrap();
        let mut cfg = f.rebalancer.config();
        cfg.float_min_pct = 80;
        cfg.float_max_pct = 90;
        f.rebalancer.set_config(cfg).unwrap();

        let outcome = f.rebalancer.tick().await.unwrap();
        assert_eq!(outcome.decision, RebalanceDecision::WithdrawDeficit { amount: 50_000_000 });
        assert_eq!(
            f.ledger.balance(&f.strategy_vault, AssetKind::Base).await.unwrap(),
            20_000_000
        );
    }

    #[tokio::test]
    async fn bad_config_and_strangers_are_refused() {
        let f = fixture(10, 30);
        let mut cfg = f.rebalancer.config();
        cfg.float_min_pct = 40;
        assert!(matches!(
            f.rebalancer.set_config(cfg.clone()),
            Err(TreasuryError::FloatBoundsViolation { .. })
        ));
        cfg.float_min_pct = 10;
        cfg.authority = Address::from_label("someone-else");
        f.rebalancer.set_config(cfg).unwrap();
        assert!(matches!(f.rebalancer.tick().await, Err(TreasuryError::Unauthorized(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_survives_failing_ticks_until_shutdown() {
        let f = fixture(10, 30);
        let mut cfg = f.rebalancer.config();
        cfg.authority = Address::from_label("someone-else");
        f.rebalancer.set_config(cfg).unwrap();

        let (tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(650)).await;
            let _ = tx.send(true);
        });
        // Ticks at 0s, 300s and 600s; shutdown lands during the third sleep.
        assert_eq!(f.rebalancer.run(rx).await, 3);
    }
}
