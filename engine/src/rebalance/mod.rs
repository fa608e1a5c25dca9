//! # Float Rebalancing
//!
//! Keeps the share of supply backed by liquid reserves (the float) between
//! the configured bounds. Surplus float is invested into the active yield
//! strategy; a deficit is pulled back out of it.
//!
//! The decision is recomputed from observed state on every tick and never
//! carried over, so ticks can run at any interval without drift.

pub mod policy;
pub mod runner;
pub mod strategy;

pub use policy::{decide, float_ratio_pct, RebalanceDecision};
pub use runner::{RebalanceOutcome, Rebalancer};
pub use strategy::{StrategyRegistry, VaultStrategy, YieldStrategy};
