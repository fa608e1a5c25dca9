//! # Program-Derived Addresses
//!
//! The deployed program owns its config, treasury, yield, allowlist, and
//! escrow accounts at addresses derived from fixed seeds. This module
//! reproduces that derivation byte-for-byte so the client computes the same
//! addresses the program will check:
//!
//! ```text
//! candidate = SHA-256(seed_0 || ... || seed_n || [bump] || program_id || "ProgramDerivedAddress")
//! ```
//!
//! `bump` starts at 255 and counts down. The first candidate that is NOT a
//! valid ed25519 point wins: an off-curve address has no private key, so only
//! the program can sign for it.

use curve25519_dalek::edwards::CompressedEdwardsY;
use sha2::{Digest, Sha256};

use crate::address::Address;
use crate::error::{TreasuryError, TreasuryResult};

/// Maximum length of a single seed.
pub const MAX_SEED_LEN: usize = 32;

/// Maximum number of seeds, including the bump.
pub const MAX_SEEDS: usize = 16;

const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

pub const SEED_CONFIG: &[u8] = b"config";
pub const SEED_TREASURY: &[u8] = b"treasury";
pub const SEED_YIELD_MASTER: &[u8] = b"yield_master";
pub const SEED_REDEEM_ALLOW: &[u8] = b"redeem_allow";
pub const SEED_PAYROLL_ESCROW: &[u8] = b"payroll_escrow";
pub const SEED_STRATEGY_VAULT: &[u8] = b"strategy_vault";

/// True if `bytes` decompress to a point on the ed25519 curve.
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    CompressedEdwardsY(*bytes).decompress().is_some()
}

fn check_seeds(seeds: &[&[u8]]) -> TreasuryResult<()> {
    if seeds.len() > MAX_SEEDS {
        return Err(TreasuryError::InvalidConfig(format!(
            "{} seeds exceed the limit of {MAX_SEEDS}",
            seeds.len()
        )));
    }
    if let Some(seed) = seeds.iter().find(|s| s.len() > MAX_SEED_LEN) {
        return Err(TreasuryError::InvalidConfig(format!(
            "seed of {} bytes exceeds {MAX_SEED_LEN}",
            seed.len()
        )));
    }
    Ok(())
}

/// Hashes the seeds into an address. Returns `None` if the result lands on
/// the curve (and is therefore not a valid program address).
pub fn create_program_address(seeds: &[&[u8]], program_id: &Address) -> TreasuryResult<Option<Address>> {
    check_seeds(seeds)?;
    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    if is_on_curve(&bytes) {
        return Ok(None);
    }
    Ok(Some(Address::new(bytes)))
}

/// Finds the canonical (highest-bump) program address for `seeds`.
pub fn find_program_address(seeds: &[&[u8]], program_id: &Address) -> TreasuryResult<(Address, u8)> {
    // One slot is reserved for the bump seed.
    if seeds.len() > MAX_SEEDS - 1 {
        return Err(TreasuryError::InvalidConfig(format!(
            "{} seeds leave no room for a bump seed",
            seeds.len()
        )));
    }
    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = seeds.to_vec();
        with_bump.push(&bump_seed);
        if let Some(address) = create_program_address(&with_bump, program_id)? {
            return Ok((address, bump));
        }
    }
    Err(TreasuryError::InvalidConfig(
        "no viable bump seed for program address".into(),
    ))
}

/// The derived accounts of one deployed program.
#[derive(Clone, Debug)]
pub struct ProgramAddresses {
    program_id: Address,
}

impl ProgramAddresses {
    pub fn new(program_id: Address) -> Self {
        Self { program_id }
    }

    pub fn program_id(&self) -> &Address {
        &self.program_id
    }

    pub fn config(&self) -> TreasuryResult<(Address, u8)> {
        find_program_address(&[SEED_CONFIG], &self.program_id)
    }

    /// The treasury vault: holds employee-side reserves and the float.
    pub fn treasury(&self) -> TreasuryResult<(Address, u8)> {
        find_program_address(&[SEED_TREASURY], &self.program_id)
    }

    /// The yield account that collects corporate withdrawal fees.
    pub fn yield_master(&self) -> TreasuryResult<(Address, u8)> {
        find_program_address(&[SEED_YIELD_MASTER], &self.program_id)
    }

    pub fn redeem_allow(&self, wallet: &Address) -> TreasuryResult<(Address, u8)> {
        find_program_address(&[SEED_REDEEM_ALLOW, wallet.as_bytes()], &self.program_id)
    }

    /// Vault holding funds deployed into yield strategy `strategy_id`.
    pub fn strategy_vault(&self, strategy_id: u8) -> TreasuryResult<(Address, u8)> {
        find_program_address(&[SEED_STRATEGY_VAULT, &[strategy_id]], &self.program_id)
    }

    /// Per-batch payroll escrow. `batch_id` must fit in a single seed.
    pub fn payroll_escrow(&self, batch_id: &str) -> TreasuryResult<(Address, u8)> {
        find_program_address(&[SEED_PAYROLL_ESCROW, batch_id.as_bytes()], &self.program_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Address {
        Address::from_label("pusd-test-program")
    }

    #[test]
    fn derived_addresses_are_off_curve() {
        let addrs = ProgramAddresses::new(program());
        for (addr, _) in [
            addrs.config().unwrap(),
            addrs.treasury().unwrap(),
            addrs.yield_master().unwrap(),
            addrs.payroll_escrow("2024-01").unwrap(),
            addrs.strategy_vault(1).unwrap(),
        ] {
            assert!(!is_on_curve(addr.as_bytes()));
        }
    }

    #[test]
    fn derivation_is_deterministic_and_seed_sensitive() {
        let addrs = ProgramAddresses::new(program());
        assert_eq!(addrs.treasury().unwrap(), addrs.treasury().unwrap());
        assert_ne!(addrs.treasury().unwrap().0, addrs.config().unwrap().0);
        assert_ne!(
            addrs.payroll_escrow("2024-01").unwrap().0,
            addrs.payroll_escrow("2024-02").unwrap().0
        );
        let other = ProgramAddresses::new(Address::from_label("another-program"));
        assert_ne!(addrs.treasury().unwrap().0, other.treasury().unwrap().0);
    }

    #[test]
    fn found_bump_recreates_the_address() {
        let (addr, bump) = find_program_address(&[SEED_TREASURY], &program()).unwrap();
        let again = create_program_address(&[SEED_TREASURY, &[bump]], &program()).unwrap();
        assert_eq!(again, Some(addr));
    }

    #[test]
    fn redeem_allow_is_per_wallet() {
        let addrs = ProgramAddresses::new(program());
        let a = addrs.redeem_allow(&Address::from_label("alice")).unwrap().0;
        let b = addrs.redeem_allow(&Address::from_label("bob")).unwrap().0;
        assert_ne!(a, b);
    }

    #[test]
    fn oversized_seed_is_rejected() {
        let addrs = ProgramAddresses::new(program());
        let long_id = "x".repeat(33);
        assert!(addrs.payroll_escrow(&long_id).is_err());
    }

    #[test]
    fn seed_count_limit_includes_the_bump() {
        let seed: &[u8] = b"s";
        let sixteen = vec![seed; MAX_SEEDS];
        assert!(create_program_address(&sixteen, &program()).is_ok());
        assert!(create_program_address(&vec![seed; MAX_SEEDS + 1], &program()).is_err());

        let (addr, bump) = find_program_address(&sixteen[..MAX_SEEDS - 1], &program()).unwrap();
        let bump_seed = [bump];
        let mut with_bump = sixteen[..MAX_SEEDS - 1].to_vec();
        with_bump.push(&bump_seed);
        assert_eq!(create_program_address(&with_bump, &program()).unwrap(), Some(addr));
        assert!(find_program_address(&sixteen, &program()).is_err());
    }

    #[test]
    fn real_public_keys_are_on_curve() {
        let kp = crate::keys::TreasuryKeypair::generate();
        assert!(is_on_curve(kp.address().as_bytes()));
    }
}
