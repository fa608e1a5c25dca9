//! [`ConfidentialLedger`] over the `spl-token` command-line tool.
//!
//! The CLI holds the zero-knowledge machinery, so this backend only builds
//! argument lists, runs the tool, and pulls the signature out of its output.
//! Every owner must be registered with the path of its keypair file first.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use pusd_protocol::address::Address;
use pusd_protocol::error::{TreasuryError, TreasuryResult};
use pusd_protocol::units::from_atomic;

use super::ConfidentialLedger;

/// Token-2022 program id, the program that carries the confidential extension.
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

const ALREADY_CONFIGURED: &str = "already configured";

pub struct TokenCliLedger {
    program: PathBuf,
    rpc_url: String,
    mint: Address,
    decimals: u8,
    signers: DashMap<Address, PathBuf>,
}

impl std::fmt::Debug for TokenCliLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCliLedger")
            .field("program", &self.program)
            .field("rpc_url", &self.rpc_url)
            .field("mint", &self.mint)
            .finish_non_exhaustive()
    }
}

impl TokenCliLedger {
    /// `mint` and `decimals` describe the pegged asset.
    pub fn new(rpc_url: impl Into<String>, mint: Address, decimals: u8) -> Self {
        Self {
            program: PathBuf::from("spl-token"),
            rpc_url: rpc_url.into(),
            mint,
            decimals,
            signers: DashMap::new(),
        }
    }

    /// Uses a specific `spl-token` binary instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Registers the keypair file that signs for `owner`.
    pub fn register_signer(&self, owner: Address, keypair_path: impl AsRef<Path>) {
        self.signers.insert(owner, keypair_path.as_ref().to_path_buf());
    }

    fn signer(&self, owner: &Address) -> TreasuryResult<PathBuf> {
        self.signers
            .get(owner)
            .map(|p| p.value().clone())
            .ok_or_else(|| TreasuryError::InvalidKeypair(format!("no keypair registered for {owner}")))
    }

    fn ui(&self, amount: u64) -> String {
        from_atomic(amount, self.decimals)
    }

    fn common_args(&self, owner_keypair: &Path) -> Vec<String> {
        vec![
            "--owner".into(),
            owner_keypair.display().to_string(),
            "--fee-payer".into(),
            owner_keypair.display().to_string(),
            "--url".into(),
            self.rpc_url.clone(),
            "--program-id".into(),
            TOKEN_2022_PROGRAM_ID.into(),
            "--output".into(),
            "json".into(),
        ]
    }

    fn args(&self, command: &[String], owner_keypair: &Path) -> Vec<String> {
        let mut args = command.to_vec();
        args.extend(self.common_args(owner_keypair));
        args
    }

    async fn run(&self, args: &[String]) -> TreasuryResult<CliOutput> {
        debug!(program = %self.program.display(), ?args, "running token cli");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| TreasuryError::NetworkError(format!("cannot run {}: {e}", self.program.display())))?;
        Ok(CliOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_for_signature(&self, args: &[String]) -> TreasuryResult<String> {
        let output = self.run(args).await?;
        output.into_signature()
    }
}

struct CliOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl CliOutput {
    fn into_signature(self) -> TreasuryResult<String> {
        if !self.success {
            // The tool may have sent the transaction before failing.
            return Err(TreasuryError::NetworkError(failure_message(&self.stderr, &self.stdout)));
        }
        parse_signature(&self.stdout)
            .ok_or_else(|| TreasuryError::NetworkError("token cli printed no signature".into()))
    }
}

fn failure_message(stderr: &str, stdout: &str) -> String {
    let message = if stderr.trim().is_empty() { stdout } else { stderr };
    format!("token cli failed: {}", message.trim())
}

/// The `signature` field of JSON output, or else the value of the first
/// `Signature:` line. Some subcommands ignore `--output json`.
pub fn parse_signature(stdout: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(stdout.trim()) {
        if let Some(sig) = value.get("signature").and_then(|v| v.as_str()) {
            return Some(sig.to_string()).filter(|sig| !sig.is_empty());
        }
    }
    stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Signature:"))
        .map(|sig| sig.trim().to_string())
        .find(|sig| !sig.is_empty())
}

/// Argument list for each primitive, before the common flags.
pub fn configure_command(mint: &Address) -> Vec<String> {
    vec!["configure-confidential-transfer-account".into(), mint.to_string()]
}

pub fn deposit_command(mint: &Address, amount_ui: &str) -> Vec<String> {
    vec!["deposit-confidential-tokens".into(), mint.to_string(), amount_ui.into()]
}

pub fn transfer_command(mint: &Address, amount_ui: &str, recipient: &Address) -> Vec<String> {
    vec![
        "transfer".into(),
        mint.to_string(),
        amount_ui.into(),
        recipient.to_string(),
        "--confidential".into(),
    ]
}

pub fn apply_pending_command(mint: &Address) -> Vec<String> {
    vec!["apply-pending-balance".into(), mint.to_string()]
}

pub fn withdraw_command(mint: &Address, amount_ui: &str) -> Vec<String> {
    vec!["withdraw-confidential-tokens".into(), mint.to_string(), amount_ui.into()]
}

#[async_trait]
impl ConfidentialLedger for TokenCliLedger {
    async fn configure_account(&self, owner: &Address) -> TreasuryResult<Option<String>> {
        let args = self.args(&configure_command(&self.mint), &self.signer(owner)?);
        let output = self.run(&args).await?;
        if !output.success && output.stderr.to_ascii_lowercase().contains(ALREADY_CONFIGURED) {
            info!(%owner, "account already configured for confidential transfers");
            return Ok(None);
        }
        output.into_signature().map(Some)
    }

    async fn deposit(&self, owner: &Address, amount: u64) -> TreasuryResult<String> {
        let args = self.args(&deposit_command(&self.mint, &self.ui(amount)), &self.signer(owner)?);
        self.run_for_signature(&args).await
    }

    async fn transfer(&self, from: &Address, to: &Address, amount: u64) -> TreasuryResult<String> {
        let args = self.args(&transfer_command(&self.mint, &self.ui(amount), to), &self.signer(from)?);
        self.run_for_signature(&args).await
    }

    async fn apply_pending_balance(&self, owner: &Address) -> TreasuryResult<String> {
        let args = self.args(&apply_pending_command(&self.mint), &self.signer(owner)?);
        self.run_for_signature(&args).await
    }

    async fn withdraw(&self, owner: &Address, amount: u64) -> TreasuryResult<String> {
        let args = self.args(&withdraw_command(&self.mint, &self.ui(amount)), &self.signer(owner)?);
        self.run_for_signature(&args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> TokenCliLedger {
        TokenCliLedger::new("http://127.0.0.1:8899", Address::from_label("pusd-mint"), 6)
    }

    #[test]
    fn signature_is_taken_from_the_signature_line() {
        let out = "Depositing 10 confidential tokens\n\nSignature: 5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW\n";
        assert_eq!(
            parse_signature(out).as_deref(),
            Some("5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW")
        );
        assert_eq!(parse_signature("Signature:\nnothing here"), None);
    }

    #[test]
    fn signature_is_taken_from_json_output() {
        assert_eq!(parse_signature("{\"signature\": \"3xYz\"}\n").as_deref(), Some("3xYz"));
        assert_eq!(parse_signature("{\"signature\": \"\"}"), None);
        assert_eq!(parse_signature("{\"address\": \"abc\"}"), None);
    }

    #[test]
    fn transfer_arguments_carry_the_confidential_flag_and_owner() {
        let l = ledger();
        let recipient = Address::from_label("emp");
        let args = l.args(&transfer_command(&l.mint, &l.ui(25_500_000), &recipient), Path::new("/keys/corp.json"));
        assert_eq!(args[0], "transfer");
        assert_eq!(args[2], "25.5");
        assert_eq!(args[3], recipient.to_string());
        assert!(args.contains(&"--confidential".to_string()));
        let owner = args.iter().position(|a| a == "--owner").unwrap();
        assert_eq!(args[owner + 1], "/keys/corp.json");
        assert!(args.contains(&TOKEN_2022_PROGRAM_ID.to_string()));
    }

    #[tokio::test]
    async fn unregistered_owner_is_an_invalid_keypair() {
        let err = ledger().deposit(&Address::from_label("nobody"), 1).await.unwrap_err();
        assert!(matches!(err, TreasuryError::InvalidKeypair(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_a_network_error() {
        let l = ledger().with_program("/nonexistent/spl-token");
        let owner = Address::from_label("corp");
        l.register_signer(owner, "/keys/corp.json");
        let err = l.apply_pending_balance(&owner).await.unwrap_err();
        assert!(matches!(err, TreasuryError::NetworkError(_)));
    }

    #[test]
    fn failed_run_reports_stderr() {
        let output = CliOutput {
            success: false,
            stdout: String::new(),
            stderr: "Error: insufficient funds\n".into(),
        };
        let err = output.into_signature().unwrap_err();
        assert!(err.to_string().contains("insufficient funds"));
    }
}
