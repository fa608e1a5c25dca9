//! # Command Context
//!
//! Wires the engine components for one invocation: config, database,
//! ledger, and reserve accounts. Only the local network has a transport in
//! this build. Its ledger is a [`SimulatedLedger`] whose state lives in the
//! database's metadata tree between runs.

use anyhow::{Context as _, Result};
use std::path::Path;
use std::sync::Arc;

use pusd_engine::confidential::{ConfidentialState, SimulatedConfidentialLedger};
use pusd_engine::rebalance::StrategyRegistry;
use pusd_engine::{
    ConfidentialTransferWorkflow, LogOnlyCompensation, PayrollEscrow, RevocableRegistry, TreasuryService,
};
use pusd_protocol::config::{Network, TreasuryConfig};
use pusd_protocol::error::TreasuryError;
use pusd_protocol::ledger::{LedgerClient, LedgerState, SimulatedLedger};
use pusd_protocol::pda::ProgramAddresses;
use pusd_protocol::peg::PegLedger;
use pusd_protocol::redeem::RedeemAllowList;
use pusd_protocol::state::ConfigPda;
use pusd_protocol::storage::{Keyspace, TreasuryDb};

use crate::cli::GlobalArgs;

const LEDGER_SNAPSHOT_KEY: &[u8] = b"localnet/ledger";
const CONFIDENTIAL_SNAPSHOT_KEY: &[u8] = b"localnet/confidential";
const CONFIG_PDA_KEY: &[u8] = b"config_pda";

/// Reads the config file (or the network defaults) and applies flag
/// overrides.
pub fn load_config(global: &GlobalArgs) -> Result<TreasuryConfig> {
    let flag_network = global
        .network
        .as_deref()
        .map(str::parse::<Network>)
        .transpose()
        .context("invalid --network")?;

    let mut config = match &global.config {
        Some(path) => TreasuryConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => TreasuryConfig::default_for(flag_network.unwrap_or(Network::Localnet)),
    };
    if let Some(network) = flag_network {
        config.network = network;
    }
    config.validate().context("invalid treasury config")?;
    Ok(config)
}

pub struct Context {
    pub config: TreasuryConfig,
    pub db: Arc<TreasuryDb>,
    pub ledger: Arc<SimulatedLedger>,
    pub confidential: Arc<SimulatedConfidentialLedger>,
    pub strategies: StrategyRegistry,
    pub peg: PegLedger,
    pub dry_run: bool,
}

impl Context {
    /// Opens the data directory for `config.network`.
    pub fn open(config: TreasuryConfig, data_dir: &Path, dry_run: bool) -> Result<Self> {
        if config.network != Network::Localnet {
            return Err(TreasuryError::NetworkError(format!(
                "no transport for {} ({}) in this build; use --network localnet",
                config.network,
                config.rpc_url()
            ))
            .into());
        }

        let db_path = data_dir.join("db");
        std::fs::create_dir_all(&db_path)
            .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
        let db = Arc::new(
            TreasuryDb::open(&db_path)
                .with_context(|| format!("failed to open database at {}", db_path.display()))?,
        );
        tracing::debug!(path = %db_path.display(), "database opened");

        let ledger_state: LedgerState = db
            .get(Keyspace::Metadata, LEDGER_SNAPSHOT_KEY)
            .context("failed to read the local ledger snapshot")?
            .unwrap_or_default();
        let ledger = Arc::new(SimulatedLedger::from_state(ledger_state));

        let confidential_state: ConfidentialState = db
            .get(Keyspace::Metadata, CONFIDENTIAL_SNAPSHOT_KEY)
            .context("failed to read the confidential snapshot")?
            .unwrap_or_default();
        let confidential = Arc::new(SimulatedConfidentialLedger::from_state(
            Arc::clone(&ledger),
            confidential_state,
        ));

        let strategies = StrategyRegistry::with_vault_strategies(&ProgramAddresses::new(config.program_id))?;
        let peg = pusd_engine::peg_ledger(&config, &strategies)?;

        Ok(Self {
            config,
            db,
            ledger,
            confidential,
            strategies,
            peg,
            dry_run,
        })
    }

    pub fn from_args(global: &GlobalArgs) -> Result<Self> {
        let config = load_config(global)?;
        Self::open(config, &global.data_dir, global.dry_run)
    }

    pub fn ledger_client(&self) -> Arc<dyn LedgerClient> {
        self.ledger.clone()
    }

    pub fn pdas(&self) -> ProgramAddresses {
        ProgramAddresses::new(self.config.program_id)
    }

    pub fn allowlist(&self) -> Arc<RedeemAllowList> {
        Arc::new(RedeemAllowList::new(Arc::clone(&self.db)))
    }

    pub fn treasury(&self) -> Result<TreasuryService> {
        let service = TreasuryService::new(self.ledger_client(), self.peg.clone(), self.config.fee_policy())?;
        Ok(if self.config.enforce_redeem_allowlist {
            service.with_allowlist(self.allowlist())
        } else {
            service
        })
    }

    pub fn registry(&self) -> Result<Arc<RevocableRegistry>> {
        Ok(Arc::new(RevocableRegistry::new(
            Arc::clone(&self.db),
            self.config.revocation_window(),
            Arc::new(LogOnlyCompensation),
        )?))
    }

    pub fn workflow(&self) -> Result<ConfidentialTransferWorkflow> {
        Ok(ConfidentialTransferWorkflow::new(
            self.confidential.clone(),
            self.registry()?,
            self.config.unit_converter()?,
        ))
    }

    pub fn escrow(&self) -> Result<PayrollEscrow> {
        Ok(PayrollEscrow::new(
            self.ledger_client(),
            Arc::clone(&self.db),
            self.pdas(),
            self.config.unit_converter()?,
        ))
    }

    pub fn config_pda(&self) -> Result<Option<ConfigPda>> {
        Ok(self.db.get(Keyspace::Metadata, CONFIG_PDA_KEY)?)
    }

    pub fn store_config_pda(&self, pda: &ConfigPda) -> Result<()> {
        if !self.dry_run {
            self.db.put(Keyspace::Metadata, CONFIG_PDA_KEY, pda)?;
        }
        Ok(())
    }

    /// Writes the local ledger back to disk. A dry run writes nothing.
    pub fn save(&self) -> Result<()> {
        if self.dry_run {
            tracing::debug!("dry run, ledger snapshot not saved");
            return Ok(());
        }
        self.db
            .put(Keyspace::Metadata, LEDGER_SNAPSHOT_KEY, &self.ledger.snapshot())
            .context("failed to save the local ledger snapshot")?;
        self.db
            .put(Keyspace::Metadata, CONFIDENTIAL_SNAPSHOT_KEY, &self.confidential.snapshot())
            .context("failed to save the confidential snapshot")?;
        self.db.flush().context("failed to flush the database")?;
        Ok(())
    }
}
