// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # pUSD Operator CLI
//!
//! Entry point for the `pusd` binary. Parses CLI arguments, initializes
//! logging, wires the engine for the selected network, and runs one
//! treasury operation. Any error is printed to stderr and the process
//! exits with status 1.

mod cli;
mod context;
mod logging;

use anyhow::{bail, Context as _, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Deserialize;
use std::path::Path;

use pusd_engine::rebalance::{decide, float_ratio_pct};
use pusd_engine::revocable::CompensationOutcome;
use pusd_engine::Rebalancer;
use pusd_protocol::account::{Role, TreasuryAccount};
use pusd_protocol::address::Address;
use pusd_protocol::asset::AssetKind;
use pusd_protocol::config::TreasuryConfig;
use pusd_protocol::error::TreasuryError;
use pusd_protocol::fees::Direction;
use pusd_protocol::keys::TreasuryKeypair;
use pusd_protocol::ledger::LedgerClient;
use pusd_protocol::merkle::{payroll_root, root_to_hex, PayrollLeaf};
use pusd_protocol::peg::PegSnapshot;
use pusd_protocol::state::{ConfigPda, STRATEGY_YIELD_MASTER};
use pusd_protocol::units::{from_atomic, UnitConverter};

use cli::{Commands, PusdCli};
use context::Context;

/// Float bounds for a config created on first rebalance.
const DEFAULT_FLOAT_MIN_PCT: u8 = 10;
const DEFAULT_FLOAT_MAX_PCT: u8 = 30;

#[tokio::main]
async fn main() {
    let cli = PusdCli::parse();
    logging::init_logging(cli.global.log_format);

    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: PusdCli) -> Result<()> {
    if let Commands::Keygen(args) = &cli.command {
        return keygen(args);
    }

    let ctx = Context::from_args(&cli.global)?;
    tracing::debug!(network = %ctx.config.network, dry_run = ctx.dry_run, "context ready");

    match cli.command {
        Commands::Deposit(args) => move_funds(&ctx, args, Direction::Deposit).await,
        Commands::Withdraw(args) => move_funds(&ctx, args, Direction::Withdraw).await,
        Commands::Transfer(args) => transfer(&ctx, args).await,
        Commands::Revoke(args) => revoke(&ctx, args).await,
        Commands::SchedulePayroll(args) => schedule_payroll(&ctx, args).await,
        Commands::ThawPayroll(args) => thaw_payroll(&ctx, args).await,
        Commands::Rebalance(args) => rebalance(&ctx, args).await,
        Commands::Status => status(&ctx).await,
        Commands::AllowRedeem(args) => allow_redeem(&ctx, args),
        Commands::Airdrop(args) => airdrop(&ctx, args),
        Commands::Keygen(_) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_keypair(path: &Path) -> Result<TreasuryKeypair> {
    TreasuryKeypair::load(path).with_context(|| format!("failed to load keypair from {}", path.display()))
}

/// Loads the signer named by whichever keypair flag was given.
fn load_actor(actor: &cli::ActorArgs) -> Result<(TreasuryKeypair, Role)> {
    let (path, role) = actor
        .resolve()
        .context("a keypair is required: --keypair, --corporate, or --employee")?;
    Ok((load_keypair(path)?, role))
}

fn parse_address(s: &str) -> Result<Address> {
    s.parse().with_context(|| format!("invalid address {s:?}"))
}

/// One entry of an employee list file.
#[derive(Debug, Deserialize)]
struct EmployeeEntry {
    wallet: Address,
    /// pUSD UI amount.
    amount: String,
}

fn read_employees(path: &Path, converter: &UnitConverter) -> Result<Vec<PayrollLeaf>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read employee list {}", path.display()))?;
    let entries: Vec<EmployeeEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse employee list {}", path.display()))?;
    entries
        .into_iter()
        .map(|entry| -> Result<PayrollLeaf> {
            let amount = converter
                .pegged_to_atomic(&entry.amount)
                .with_context(|| format!("bad amount for {}", entry.wallet))?;
            Ok(PayrollLeaf::new(entry.wallet, amount))
        })
        .collect()
}

fn print_snapshot(label: &str, snapshot: &PegSnapshot, config: &TreasuryConfig) {
    let base = config.base_asset.decimals;
    let reserves = &snapshot.reserves;
    println!("{label}:");
    println!("  treasury vault  : {} {}", from_atomic(reserves.treasury_vault, base), config.base_asset.symbol);
    println!("  corporate vault : {} {}", from_atomic(reserves.corporate_vault, base), config.base_asset.symbol);
    println!("  strategies      : {} {}", from_atomic(reserves.strategies, base), config.base_asset.symbol);
    match snapshot.treasury_pda() {
        Some(pda) => println!("  reserves total  : {} {}", from_atomic(pda.usdc_balance, base), config.base_asset.symbol),
        None => println!("  reserves total  : overflow"),
    }
    println!(
        "  supply          : {} {}",
        from_atomic(snapshot.supply, config.pegged_asset.decimals),
        config.pegged_asset.symbol
    );
    println!("  peg holds       : {}", snapshot.holds());
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn keygen(args: &cli::KeygenArgs) -> Result<()> {
    if args.out.exists() && !args.force {
        bail!("{} already exists; pass --force to overwrite", args.out.display());
    }
    let keypair = TreasuryKeypair::generate();
    keypair
        .write(&args.out)
        .with_context(|| format!("failed to write keypair to {}", args.out.display()))?;
    tracing::info!(address = %keypair.address(), path = %args.out.display(), "keypair generated");
    println!("{}", keypair.address());
    Ok(())
}

async fn move_funds(ctx: &Context, args: cli::MoveArgs, direction: Direction) -> Result<()> {
    let (keypair, role) = load_actor(&args.actor)?;
    let treasury = ctx.treasury()?;
    let base_decimals = ctx.config.base_asset.decimals;

    if ctx.dry_run {
        let plan = treasury.preview(&keypair.address(), role, direction, &args.amount).await?;
        println!("dry run: {}", plan.describe(base_decimals));
        println!("  legs            : {}", plan.instructions.len());
        print_snapshot("projected", &plan.after, &ctx.config);
        return Ok(());
    }

    let result = treasury.execute(&keypair, role, direction, &args.amount).await;
    ctx.save()?;
    let receipt = result?;
    println!("{}", receipt.plan.describe(base_decimals));
    println!("  signature       : {}", receipt.signature);
    println!("  slot            : {}", receipt.slot);
    print_snapshot("reserves", &receipt.snapshot, &ctx.config);
    Ok(())
}

async fn transfer(ctx: &Context, args: cli::TransferArgs) -> Result<()> {
    let (keypair, role) = load_actor(&args.actor)?;
    let recipient = parse_address(&args.to)?;
    let sender = TreasuryAccount::register(keypair.address(), role, None);

    if ctx.dry_run {
        let amount = ctx.config.unit_converter()?.pegged_to_atomic(&args.amount)?;
        let held = ctx.ledger.balance(sender.owner(), AssetKind::Pegged).await?;
        println!(
            "dry run: {role} {} sends {} {} confidentially to {recipient}",
            sender.owner(),
            args.amount,
            ctx.config.pegged_asset.symbol
        );
        println!("  public balance  : {}", from_atomic(held, ctx.config.pegged_asset.decimals));
        println!("  sufficient      : {}", held >= amount);
        println!("  revocable       : {}", role.grants_revocation());
        return Ok(());
    }

    let workflow = ctx.workflow()?;
    let report = workflow.run_transfer_cycle(&sender, &recipient, &args.amount).await;
    ctx.save()?;

    for (step, signature) in &report.completed {
        println!("  {:<32} {}", step.to_string(), signature.as_deref().unwrap_or("already configured"));
    }
    if let Some(revocable) = &report.revocable {
        println!("revocable until {} (id {})", revocable.expires_at.to_rfc3339(), revocable.id);
    }
    if let Some(reason) = &report.revocation_error {
        eprintln!("warning: transfer landed but is NOT revocable: {reason}");
    }
    if let Some(failure) = report.failure {
        return Err(anyhow::Error::new(failure).context("confidential cycle stopped"));
    }
    Ok(())
}

async fn revoke(ctx: &Context, args: cli::RevokeArgs) -> Result<()> {
    let registry = ctx.registry()?;

    if ctx.dry_run {
        let transaction = registry
            .get(&args.id)?
            .ok_or_else(|| TreasuryError::TransactionNotFound(args.id.clone()))?;
        println!("dry run: transfer {} of {} to {}", transaction.id, transaction.amount_ui, transaction.to);
        println!("  expires at      : {}", transaction.expires_at.to_rfc3339());
        println!("  revocable now   : {}", transaction.is_revocable_at(Utc::now()));
        return Ok(());
    }

    let receipt = registry.revoke(&args.id).await?;
    let transaction = &receipt.transaction;
    println!("revoked {} ({} to {})", transaction.id, transaction.amount_ui, transaction.to);
    match &receipt.compensation {
        CompensationOutcome::Reversed { signature } => println!("  reversal        : {signature}"),
        CompensationOutcome::NotPerformed { reason } => println!("  reversal        : not performed ({reason})"),
    }
    Ok(())
}

async fn schedule_payroll(ctx: &Context, args: cli::ScheduleArgs) -> Result<()> {
    let converter = ctx.config.unit_converter()?;
    let employees = read_employees(&args.employees, &converter)?;
    let release_at = DateTime::parse_from_rfc3339(&args.release_at)
        .with_context(|| format!("invalid --release-at {:?}", args.release_at))?
        .with_timezone(&Utc);
    let escrow = ctx.escrow()?;
    let pegged_decimals = ctx.config.pegged_asset.decimals;

    if ctx.dry_run {
        let total: u128 = employees.iter().map(|leaf| u128::from(leaf.amount)).sum();
        println!("dry run: batch {}", args.batch_id);
        println!("  escrow          : {}", escrow.escrow_address(&args.batch_id)?);
        println!("  employees       : {}", employees.len());
        println!("  total           : {}", from_atomic(u64::try_from(total)?, pegged_decimals));
        println!("  merkle root     : {}", root_to_hex(&payroll_root(&employees)));
        println!("  release at      : {}", release_at.to_rfc3339());
        return Ok(());
    }

    let keypair = load_keypair(&args.keypair)?;
    let result = escrow
        .schedule_employees_at(&keypair, &args.batch_id, &employees, release_at, Utc::now())
        .await;
    ctx.save()?;
    let batch = result?;
    println!("scheduled {} ({})", batch.batch_id, batch.status);
    println!("  escrow          : {}", batch.escrow);
    println!("  total           : {}", from_atomic(batch.total, pegged_decimals));
    println!("  merkle root     : {}", root_to_hex(&batch.merkle_root));
    println!("  release at      : {}", batch.release_at.to_rfc3339());
    println!("  signature       : {}", batch.schedule_signature);
    Ok(())
}

async fn thaw_payroll(ctx: &Context, args: cli::ThawArgs) -> Result<()> {
    let escrow = ctx.escrow()?;
    let pegged_decimals = ctx.config.pegged_asset.decimals;

    if ctx.dry_run {
        let batch = escrow
            .batch(&args.batch_id)?
            .ok_or_else(|| TreasuryError::BatchNotFound(args.batch_id.clone()))?;
        println!("dry run: batch {} ({})", batch.batch_id, batch.status);
        println!("  release at      : {}", batch.release_at.to_rfc3339());
        println!("  can thaw now    : {}", batch.can_thaw(Utc::now()));
        return Ok(());
    }

    let converter = ctx.config.unit_converter()?;
    let employees = read_employees(&args.employees, &converter)?;
    let keypair = load_keypair(&args.keypair)?;
    let result = escrow.thaw_payroll(&keypair, &args.batch_id, &employees).await;
    ctx.save()?;
    let receipt = result?;
    println!("thawed {} to {} employees", receipt.batch.batch_id, receipt.distributed.len());
    for leaf in &receipt.distributed {
        println!("  {:<44} {}", leaf.wallet.to_string(), from_atomic(leaf.amount, pegged_decimals));
    }
    println!("  signature       : {}", receipt.signature);
    Ok(())
}

async fn rebalance(ctx: &Context, args: cli::RebalanceArgs) -> Result<()> {
    let keypair = load_keypair(&args.keypair)?;
    let signer = keypair.address();

    let mut pda = ctx.config_pda()?.unwrap_or(ConfigPda {
        float_min_pct: DEFAULT_FLOAT_MIN_PCT,
        float_max_pct: DEFAULT_FLOAT_MAX_PCT,
        strategy_id: STRATEGY_YIELD_MASTER,
        risk_param: 0,
        authority: signer,
        delegated_signer: None,
    });
    let changing = args.min.is_some() || args.max.is_some() || args.strategy.is_some() || args.delegate.is_some();
    if changing {
        if pda.authority != signer {
            return Err(TreasuryError::Unauthorized(format!(
                "only the config authority {} may change the rebalance config",
                pda.authority
            ))
            .into());
        }
        pda.float_min_pct = args.min.unwrap_or(pda.float_min_pct);
        pda.float_max_pct = args.max.unwrap_or(pda.float_max_pct);
        pda.strategy_id = args.strategy.unwrap_or(pda.strategy_id);
        if let Some(delegate) = &args.delegate {
            pda.delegated_signer = Some(parse_address(delegate)?);
        }
    }
    pda.validate()?;
    ctx.store_config_pda(&pda)?;

    if ctx.dry_run {
        let snapshot = ctx.peg.observe(ctx.ledger.as_ref()).await?;
        let float = snapshot.reserves.liquid().unwrap_or(u64::MAX);
        let supply = snapshot.supply_in_base();
        println!(
            "dry run: float {}% of supply, bounds {}..{}%",
            float_ratio_pct(float, supply),
            pda.float_min_pct,
            pda.float_max_pct
        );
        println!("  decision        : {}", decide(float, supply, pda.float_min_pct, pda.float_max_pct));
        return Ok(());
    }

    let rebalancer = Rebalancer::new(
        ctx.ledger_client(),
        ctx.peg.clone(),
        ctx.strategies.clone(),
        pda,
        keypair,
        ctx.config.rebalance_interval(),
    );

    if args.watch {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "failed to listen for Ctrl+C"),
            }
            let _ = shutdown_tx.send(true);
        });
        let ticks = rebalancer.run(shutdown_rx).await;
        ctx.save()?;
        println!("rebalance loop stopped after {ticks} ticks");
        return Ok(());
    }

    let result = rebalancer.tick().await;
    ctx.save()?;
    let outcome = result?;
    println!("{} (float {}% of supply)", outcome.decision, outcome.float_ratio_pct);
    println!(
        "  moved           : {} {}",
        from_atomic(outcome.executed, ctx.config.base_asset.decimals),
        ctx.config.base_asset.symbol
    );
    if let Some(signature) = &outcome.signature {
        println!("  signature       : {signature}");
    }
    print_snapshot("reserves", &outcome.snapshot, &ctx.config);
    Ok(())
}

async fn status(ctx: &Context) -> Result<()> {
    let now = Utc::now();
    let snapshot = ctx.peg.observe(ctx.ledger.as_ref()).await?;
    println!("network           : {} ({})", ctx.config.network, ctx.config.rpc_url());
    println!("program           : {}", ctx.config.program_id);
    print_snapshot("reserves", &snapshot, &ctx.config);

    if let Some(pda) = ctx.config_pda()? {
        println!(
            "rebalance         : bounds {}..{}%, strategy {}",
            pda.float_min_pct, pda.float_max_pct, pda.strategy_id
        );
    }

    let batches = ctx.escrow()?.batches()?;
    println!("payroll batches   : {}", batches.len());
    for batch in &batches {
        println!(
            "  {:<24} {:<9} {} release {}",
            batch.batch_id,
            batch.status.to_string(),
            from_atomic(batch.total, ctx.config.pegged_asset.decimals),
            batch.release_at.to_rfc3339()
        );
    }

    let registry = ctx.registry()?;
    if !ctx.dry_run {
        let swept = registry.sweep(now)?;
        if swept > 0 {
            tracing::debug!(swept, "expired revocation entries swept");
        }
    }
    let pending = registry.pending(now)?;
    println!("revocable         : {}", pending.len());
    for transaction in &pending {
        println!(
            "  {} {} to {} until {}",
            transaction.id,
            transaction.amount_ui,
            transaction.to,
            transaction.expires_at.to_rfc3339()
        );
    }
    Ok(())
}

fn allow_redeem(ctx: &Context, args: cli::AllowRedeemArgs) -> Result<()> {
    let wallet = parse_address(&args.wallet)?;
    let converter = ctx.config.unit_converter()?;
    let daily = converter.base_to_atomic(&args.daily).context("invalid --daily")?;
    let monthly = converter.base_to_atomic(&args.monthly).context("invalid --monthly")?;
    if ctx.dry_run {
        println!("dry run: {wallet} may redeem {} per day, {} per month", args.daily, args.monthly);
        return Ok(());
    }
    let entry = ctx.allowlist().set_limits(&wallet, daily, monthly, Utc::now())?;
    let base = ctx.config.base_asset.decimals;
    println!("{wallet}");
    println!("  daily           : {} (used {})", from_atomic(entry.daily_limit, base), from_atomic(entry.daily_used, base));
    println!(
        "  monthly         : {} (used {})",
        from_atomic(entry.monthly_limit, base),
        from_atomic(entry.monthly_used, base)
    );
    Ok(())
}

fn airdrop(ctx: &Context, args: cli::AirdropArgs) -> Result<()> {
    let to = parse_address(&args.to)?;
    let amount = ctx.config.unit_converter()?.base_to_atomic(&args.amount)?;
    if amount == 0 {
        return Err(TreasuryError::InvalidAmount("airdrop must be positive".into()).into());
    }
    if ctx.dry_run {
        println!("dry run: airdrop {} {} to {to}", args.amount, ctx.config.base_asset.symbol);
        return Ok(());
    }
    ctx.ledger.airdrop(&to, AssetKind::Base, amount);
    ctx.save()?;
    tracing::info!(%to, amount, "airdrop credited");
    println!("credited {} {} to {to}", args.amount, ctx.config.base_asset.symbol);
    Ok(())
}
