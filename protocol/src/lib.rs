// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # pUSD Protocol: Peg Accounting Primitives
//!
//! Client-side building blocks for the privacy USD treasury. pUSD is minted
//! 1:1 against USDC held in program-controlled vaults, and everything in this
//! crate exists to keep that sentence true.
//!
//! ## Architecture
//!
//! - **units**: UI amount to atomic unit conversion. No floats in arithmetic.
//! - **fees**: basis-point fee policy per actor role.
//! - **account** / **asset**: actors, roles, and the two assets.
//! - **address** / **pda**: base58 addresses and program-derived addresses.
//! - **keys**: ed25519 keypairs in the JSON byte-array format.
//! - **instruction**: single-bundle instruction sets, signed by the fee payer.
//! - **ledger**: the `LedgerClient` capability plus an all-or-nothing simulator.
//! - **peg**: reserve/supply observation and the peg invariant.
//! - **redeem**: per-wallet daily and monthly redeem caps.
//! - **merkle**: payroll merkle commitments.
//! - **state**: mirrors of the on-chain config and treasury accounts.
//! - **storage**: sled-backed persistence.
//! - **config**: network parameters and the validated treasury config.
//!
//! ## Rules of the house
//!
//! 1. Amounts are `u64` atomic units. UI strings are parsed exactly or rejected.
//! 2. Every multi-leg operation is ONE bundle. Legs are never submitted apart.
//! 3. Validation happens before submission. Nothing is mutated speculatively.
//! 4. Invariant violations are reported, never patched over.

pub mod account;
pub mod address;
pub mod asset;
pub mod config;
pub mod error;
pub mod fees;
pub mod instruction;
pub mod keys;
pub mod ledger;
pub mod merkle;
pub mod pda;
pub mod peg;
pub mod redeem;
pub mod state;
pub mod storage;
pub mod units;

pub use error::{TreasuryError, TreasuryResult};
