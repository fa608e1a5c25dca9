//! # Addresses
//!
//! A 32-byte account key rendered in base58, the way every Solana tool shows
//! it. Serialized as a base58 string so config files and JSON output stay
//! readable; bincode storage pays a few extra bytes for that, which is fine.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::TreasuryError;

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 32;

/// A 32-byte account address (public key or program-derived address).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Deterministic address from a human label. Only used for local
    /// defaults and fixtures, never for anything that must match the chain.
    pub fn from_label(label: &str) -> Self {
        let digest = Sha256::digest(label.as_bytes());
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; ADDRESS_LENGTH] {
        self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_base58())
    }
}

impl FromStr for Address {
    type Err = TreasuryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| TreasuryError::InvalidConfig(format!("invalid base58 address {s:?}: {e}")))?;
        let arr: [u8; ADDRESS_LENGTH] = bytes.try_into().map_err(|v: Vec<u8>| {
            TreasuryError::InvalidConfig(format!("address {s:?} decodes to {} bytes, expected 32", v.len()))
        })?;
        Ok(Self(arr))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base58_round_trip() {
        let addr = Address::from_label("corporate-vault");
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn system_program_renders_as_ones() {
        assert_eq!(Address::default().to_string(), "11111111111111111111111111111111");
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!("3yZe7d".parse::<Address>().is_err());
        assert!("0OIl".parse::<Address>().is_err());
    }

    #[test]
    fn serde_uses_base58_strings() {
        let addr = Address::from_label("x");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{addr}\""));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        let bytes = bincode::serialize(&addr).unwrap();
        assert_eq!(bincode::deserialize::<Address>(&bytes).unwrap(), addr);
    }
}
