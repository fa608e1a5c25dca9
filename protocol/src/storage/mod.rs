//! # Storage Module
//!
//! Durable state for the treasury client. One embedded sled database per
//! data directory, split into named trees (see [`db`] for the layout).
//!
//! Values are bincode. JSON is for config files and CLI output; bincode is
//! for storage.

pub mod db;

pub use db::{timestamp_key, DbError, DbResult, Keyspace, TreasuryDb};
