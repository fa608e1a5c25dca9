//! # CLI Interface
//!
//! Defines the command-line argument structure for `pusd` using `clap`
//! derive. Global flags select the network, config file, and data
//! directory; each subcommand maps to one treasury operation.

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use pusd_protocol::account::Role;

use crate::logging::LogFormat;

/// Operator CLI for the privacy USD treasury.
///
/// Deposits and withdrawals across the peg, confidential transfers with a
/// corporate revocation window, time-locked payroll escrow, and float
/// rebalancing.
#[derive(Parser, Debug)]
#[command(name = "pusd", about = "pUSD treasury operator CLI", version, propagate_version = true)]
pub struct PusdCli {
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Target network: localnet, devnet, or mainnet.
    ///
    /// Overrides the network named in the config file.
    #[arg(long, global = true, env = "PUSD_NETWORK")]
    pub network: Option<String>,

    /// Path to the treasury configuration file (JSON).
    ///
    /// When omitted, the built-in defaults for the network are used.
    #[arg(long, short = 'c', global = true, env = "PUSD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the local database and ledger snapshot.
    #[arg(long, short = 'd', global = true, env = "PUSD_DATA_DIR", default_value = ".pusd")]
    pub data_dir: PathBuf,

    /// Validate and print what would happen without submitting or saving.
    #[arg(long, global = true, env = "PUSD_DRY_RUN")]
    pub dry_run: bool,

    /// Log output format.
    #[arg(long, global = true, env = "PUSD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Top-level subcommands for the `pusd` binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deposit USDC and mint pUSD 1:1.
    Deposit(MoveArgs),
    /// Burn pUSD and withdraw USDC, net of the role's fee.
    Withdraw(MoveArgs),
    /// Run the full confidential transfer cycle to a recipient.
    Transfer(TransferArgs),
    /// Revoke a corporate transfer inside its window.
    Revoke(RevokeArgs),
    /// Freeze a payroll batch in escrow until its release time.
    SchedulePayroll(ScheduleArgs),
    /// Release a payroll batch to its employees.
    ThawPayroll(ThawArgs),
    /// Evaluate the float bounds and move funds to or from the strategy.
    Rebalance(RebalanceArgs),
    /// Print reserves, supply, payroll batches, and pending revocations.
    Status,
    /// Generate a new keypair file.
    Keygen(KeygenArgs),
    /// Set a wallet's daily and monthly redeem caps.
    AllowRedeem(AllowRedeemArgs),
    /// Fund an account with USDC. Local network only.
    Airdrop(AirdropArgs),
}

/// Actor role on the command line. Only these two cross the peg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActorRole {
    Corporate,
    Employee,
}

impl From<ActorRole> for Role {
    fn from(role: ActorRole) -> Self {
        match role {
            ActorRole::Corporate => Role::Corporate,
            ActorRole::Employee => Role::Employee,
        }
    }
}

/// Who signs, and in which role.
///
/// Either `--keypair` (alias `--user`, `--wallet`) with `--role`, or one of
/// `--corporate` / `--employee`, which name the keypair and the role at once.
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("signer").required(true).args(["keypair", "corporate", "employee"])))]
pub struct ActorArgs {
    /// Keypair file of the actor (JSON byte array).
    #[arg(long, short = 'k', env = "PUSD_KEYPAIR", visible_aliases = ["user", "wallet"])]
    pub keypair: Option<PathBuf>,

    /// Actor role, used with --keypair.
    #[arg(long, value_enum, default_value_t = ActorRole::Corporate)]
    pub role: ActorRole,

    /// Keypair file of a corporate actor.
    #[arg(long, conflicts_with = "role")]
    pub corporate: Option<PathBuf>,

    /// Keypair file of an employee actor.
    #[arg(long, conflicts_with = "role")]
    pub employee: Option<PathBuf>,
}

impl ActorArgs {
    /// The keypair path and role, whichever flag supplied them.
    pub fn resolve(&self) -> Option<(&Path, Role)> {
        if let Some(path) = &self.corporate {
            return Some((path, Role::Corporate));
        }
        if let Some(path) = &self.employee {
            return Some((path, Role::Employee));
        }
        self.keypair.as_deref().map(|path| (path, self.role.into()))
    }
}

/// Arguments for `deposit` and `withdraw`.
#[derive(Args, Debug)]
pub struct MoveArgs {
    #[command(flatten)]
    pub actor: ActorArgs,

    /// UI amount: USDC for a deposit, pUSD for a withdraw.
    #[arg(long)]
    pub amount: String,
}

/// Arguments for `transfer`. Corporate transfers are revocable.
#[derive(Args, Debug)]
pub struct TransferArgs {
    #[command(flatten)]
    pub actor: ActorArgs,

    /// Recipient address (base58).
    #[arg(long)]
    pub to: String,

    /// pUSD UI amount.
    #[arg(long)]
    pub amount: String,
}

/// Arguments for `revoke`.
#[derive(Args, Debug)]
pub struct RevokeArgs {
    /// Id of the revocable transfer.
    pub id: String,
}

/// Arguments for `schedule-payroll`.
#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Keypair file of the funding corporate account.
    #[arg(long, short = 'k', env = "PUSD_KEYPAIR", visible_alias = "corporate")]
    pub keypair: PathBuf,

    /// Batch identifier, e.g. `payroll-2024-01`.
    #[arg(long)]
    pub batch_id: String,

    /// JSON file listing `{"wallet": ..., "amount": ...}` entries.
    #[arg(long)]
    pub employees: PathBuf,

    /// Release time (RFC 3339).
    #[arg(long)]
    pub release_at: String,
}

/// Arguments for `thaw-payroll`.
#[derive(Args, Debug)]
pub struct ThawArgs {
    /// Keypair file paying the bundle fee.
    #[arg(long, short = 'k', env = "PUSD_KEYPAIR", visible_alias = "corporate")]
    pub keypair: PathBuf,

    #[arg(long)]
    pub batch_id: String,

    /// The same employee list the batch was scheduled with.
    #[arg(long)]
    pub employees: PathBuf,
}

/// Arguments for `rebalance`.
#[derive(Args, Debug)]
pub struct RebalanceArgs {
    /// Keypair of the config authority or its delegated signer.
    #[arg(long, short = 'k', env = "PUSD_KEYPAIR")]
    pub keypair: PathBuf,

    /// New lower float bound, percent of supply.
    #[arg(long)]
    pub min: Option<u8>,

    /// New upper float bound, percent of supply.
    #[arg(long)]
    pub max: Option<u8>,

    /// Strategy id: 0 yield master, 1 lending, 2 staking.
    #[arg(long)]
    pub strategy: Option<u8>,

    /// Address allowed to rebalance on the authority's behalf.
    #[arg(long)]
    pub delegate: Option<String>,

    /// Keep rebalancing every interval until Ctrl+C.
    #[arg(long)]
    pub watch: bool,
}

/// Arguments for `keygen`.
#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Where to write the keypair file.
    #[arg(long, short = 'o')]
    pub out: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `allow-redeem`.
#[derive(Args, Debug)]
pub struct AllowRedeemArgs {
    /// Wallet address (base58).
    pub wallet: String,

    /// Daily cap, USDC UI amount.
    #[arg(long)]
    pub daily: String,

    /// Monthly cap, USDC UI amount.
    #[arg(long)]
    pub monthly: String,
}

/// Arguments for `airdrop`.
#[derive(Args, Debug)]
pub struct AirdropArgs {
    /// Recipient address (base58).
    pub to: String,

    /// USDC UI amount.
    pub amount: String,
}
