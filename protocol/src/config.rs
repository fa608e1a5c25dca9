//! # Treasury Configuration & Constants
//!
//! Defaults live here as constants. Everything an operator may reasonably
//! change per deployment (fees, windows, the decimal multiplier) is a field
//! of [`TreasuryConfig`], loaded from JSON and validated at startup.
//!
//! The decimal multiplier is required and never inferred: two deployment
//! generations of the pegged asset disagree on its decimals (6 vs 9), so the
//! operator states the multiplier and startup checks it against the assets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::address::Address;
use crate::asset::Asset;
use crate::error::{TreasuryError, TreasuryResult};
use crate::fees::FeePolicy;
use crate::units::{decimal_multiplier, UnitConverter};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Corporate withdrawal fee: 1%.
pub const DEFAULT_CORPORATE_FEE_BPS: u16 = 100;

/// Employee withdrawals are free.
pub const DEFAULT_EMPLOYEE_FEE_BPS: u16 = 0;

/// USDC precision.
pub const BASE_DECIMALS: u8 = 6;

/// Pegged-asset precision of the current deployment generation.
pub const PEGGED_DECIMALS: u8 = 6;

/// Corporate transfers stay revocable for 30 minutes.
pub const DEFAULT_REVOCATION_WINDOW_SECS: u64 = 30 * 60;

/// How often the rebalance loop evaluates the float ratio.
pub const DEFAULT_REBALANCE_INTERVAL_SECS: u64 = 300;

/// Upper bound for `float_max_pct`; at least 10% is always deployable.
pub const MAX_FLOAT_PCT: u8 = 90;

pub const DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";
pub const MAINNET_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const LOCALNET_RPC_URL: &str = "http://127.0.0.1:8899";

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Target cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Devnet,
    Mainnet,
    Localnet,
}

impl Network {
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Devnet => DEVNET_RPC_URL,
            Network::Mainnet => MAINNET_RPC_URL,
            Network::Localnet => LOCALNET_RPC_URL,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Devnet => write!(f, "devnet"),
            Network::Mainnet => write!(f, "mainnet"),
            Network::Localnet => write!(f, "localnet"),
        }
    }
}

impl FromStr for Network {
    type Err = TreasuryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "devnet" => Ok(Network::Devnet),
            "mainnet" | "mainnet-beta" => Ok(Network::Mainnet),
            "localnet" | "local" => Ok(Network::Localnet),
            other => Err(TreasuryError::InvalidConfig(format!("unknown network {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// TreasuryConfig
// ---------------------------------------------------------------------------

fn default_corporate_fee_bps() -> u16 {
    DEFAULT_CORPORATE_FEE_BPS
}

fn default_employee_fee_bps() -> u16 {
    DEFAULT_EMPLOYEE_FEE_BPS
}

fn default_revocation_window_secs() -> u64 {
    DEFAULT_REVOCATION_WINDOW_SECS
}

fn default_rebalance_interval_secs() -> u64 {
    DEFAULT_REBALANCE_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

/// Deployment configuration for one treasury.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryConfig {
    pub network: Network,
    /// Overrides the network's default RPC endpoint.
    #[serde(default)]
    pub rpc_url: Option<String>,
    pub program_id: Address,
    /// The corporate reserve vault. Part of reserves together with the
    /// program's treasury vault.
    pub corporate_vault: Address,
    pub base_asset: Asset,
    pub pegged_asset: Asset,
    /// `10^(pegged.decimals - base.decimals)`. Required.
    pub decimal_multiplier: u64,
    #[serde(default = "default_corporate_fee_bps")]
    pub corporate_fee_bps: u16,
    #[serde(default = "default_employee_fee_bps")]
    pub employee_fee_bps: u16,
    #[serde(default = "default_revocation_window_secs")]
    pub revocation_window_secs: u64,
    #[serde(default = "default_rebalance_interval_secs")]
    pub rebalance_interval_secs: u64,
    #[serde(default = "default_true")]
    pub enforce_redeem_allowlist: bool,
}

impl TreasuryConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> TreasuryResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TreasuryError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            TreasuryError::InvalidConfig(format!("cannot parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> TreasuryResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| TreasuryError::Serialization(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| {
            TreasuryError::InvalidConfig(format!("cannot write {}: {e}", path.display()))
        })
    }

    /// Built-in defaults for `network`. Mints and program id are derived
    /// from fixed labels; real deployments supply their own file.
    pub fn default_for(network: Network) -> Self {
        Self {
            network,
            rpc_url: None,
            program_id: Address::from_label(&format!("pusd-program-{network}")),
            corporate_vault: Address::from_label(&format!("pusd-corporate-vault-{network}")),
            base_asset: Asset::new("USDC", Address::from_label(&format!("usdc-mint-{network}")), BASE_DECIMALS),
            pegged_asset: Asset::new("pUSD", Address::from_label(&format!("pusd-mint-{network}")), PEGGED_DECIMALS),
            decimal_multiplier: 1,
            corporate_fee_bps: DEFAULT_CORPORATE_FEE_BPS,
            employee_fee_bps: DEFAULT_EMPLOYEE_FEE_BPS,
            revocation_window_secs: DEFAULT_REVOCATION_WINDOW_SECS,
            rebalance_interval_secs: DEFAULT_REBALANCE_INTERVAL_SECS,
            enforce_redeem_allowlist: true,
        }
    }

    /// Startup checks. Every rejection is [`TreasuryError::InvalidConfig`].
    pub fn validate(&self) -> TreasuryResult<()> {
        self.fee_policy().validate()?;
        if self.revocation_window_secs == 0 {
            return Err(TreasuryError::InvalidConfig(
                "revocation_window_secs must be positive".into(),
            ));
        }
        if self.rebalance_interval_secs == 0 {
            return Err(TreasuryError::InvalidConfig(
                "rebalance_interval_secs must be positive".into(),
            ));
        }
        if self.pegged_asset.decimals < self.base_asset.decimals {
            return Err(TreasuryError::InvalidConfig(format!(
                "pegged decimals {} below base decimals {}",
                self.pegged_asset.decimals, self.base_asset.decimals
            )));
        }
        let derived = decimal_multiplier(self.base_asset.decimals, self.pegged_asset.decimals)?;
        if self.decimal_multiplier == 0 || self.decimal_multiplier != derived {
            return Err(TreasuryError::InvalidConfig(format!(
                "decimal_multiplier {} does not match 10^({} - {}) = {derived}",
                self.decimal_multiplier, self.pegged_asset.decimals, self.base_asset.decimals
            )));
        }
        Ok(())
    }

    pub fn rpc_url(&self) -> &str {
        self.rpc_url
            .as_deref()
            .unwrap_or_else(|| self.network.default_rpc_url())
    }

    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy {
            corporate_withdraw_bps: self.corporate_fee_bps,
            employee_withdraw_bps: self.employee_fee_bps,
        }
    }

    pub fn unit_converter(&self) -> TreasuryResult<UnitConverter> {
        UnitConverter::new(
            self.base_asset.clone(),
            self.pegged_asset.clone(),
            self.decimal_multiplier,
        )
    }

    pub fn revocation_window(&self) -> Duration {
        Duration::from_secs(self.revocation_window_secs)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self::default_for(Network::Localnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        for network in [Network::Devnet, Network::Mainnet, Network::Localnet] {
            TreasuryConfig::default_for(network).validate().unwrap();
        }
    }

    #[test]
    fn nine_decimal_generation_needs_a_thousandfold_multiplier() {
        let mut config = TreasuryConfig::default();
        config.pegged_asset.decimals = 9;
        assert!(config.validate().is_err());
        config.decimal_multiplier = 1_000;
        config.validate().unwrap();
        assert_eq!(config.unit_converter().unwrap().multiplier(), 1_000);
    }

    #[test]
    fn zero_multiplier_and_zero_window_are_rejected() {
        let mut config = TreasuryConfig::default();
        config.decimal_multiplier = 0;
        assert!(matches!(config.validate(), Err(TreasuryError::InvalidConfig(_))));

        let mut config = TreasuryConfig::default();
        config.revocation_window_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn pegged_below_base_is_rejected() {
        let mut config = TreasuryConfig::default();
        config.pegged_asset.decimals = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fee_above_one_hundred_percent_is_rejected() {
        let mut config = TreasuryConfig::default();
        config.corporate_fee_bps = 10_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let full = serde_json::to_value(TreasuryConfig::default()).unwrap();
        let mut trimmed = full.as_object().unwrap().clone();
        for key in [
            "rpc_url",
            "corporate_fee_bps",
            "employee_fee_bps",
            "revocation_window_secs",
            "rebalance_interval_secs",
            "enforce_redeem_allowlist",
        ] {
            trimmed.remove(key);
        }
        let parsed: TreasuryConfig = serde_json::from_value(trimmed.into()).unwrap();
        assert_eq!(parsed, TreasuryConfig::default());
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treasury.json");
        let config = TreasuryConfig::default_for(Network::Devnet);
        config.save(&path).unwrap();
        assert_eq!(TreasuryConfig::load(&path).unwrap(), config);
        assert_eq!(config.rpc_url(), DEVNET_RPC_URL);
    }

    #[test]
    fn network_parsing() {
        assert_eq!("Mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("mainnet-beta".parse::<Network>().unwrap(), Network::Mainnet);
        assert!("testnet".parse::<Network>().is_err());
    }
}
