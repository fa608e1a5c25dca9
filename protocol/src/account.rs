//! Treasury actors and the roles that drive fee and confidentiality policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::address::Address;
use crate::error::TreasuryError;
use crate::keys::TreasuryKeypair;

/// The role an account plays. Determines which vault it deposits into,
/// which fee schedule applies, and whether its transfers are revocable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Employee,
    Corporate,
    Treasury,
    Yield,
}

impl Role {
    /// Only corporate and employee actors move funds across the peg.
    pub fn can_cross_peg(self) -> bool {
        matches!(self, Role::Employee | Role::Corporate)
    }

    /// Corporate-originated transfers carry a revocation right.
    pub fn grants_revocation(self) -> bool {
        self == Role::Corporate
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Employee => "employee",
            Role::Corporate => "corporate",
            Role::Treasury => "treasury",
            Role::Yield => "yield",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = TreasuryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "employee" => Ok(Role::Employee),
            "corporate" => Ok(Role::Corporate),
            "treasury" => Ok(Role::Treasury),
            "yield" => Ok(Role::Yield),
            other => Err(TreasuryError::InvalidConfig(format!("unknown role {other:?}"))),
        }
    }
}

/// Who holds the signing key for an account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Custody {
    /// Key generated by this system on the actor's behalf.
    Generated,
    /// Externally owned key; only the public half is known here.
    Registered,
}

/// A treasury participant. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryAccount {
    owner: Address,
    role: Role,
    branch_id: Option<String>,
    custody: Custody,
    created_at: DateTime<Utc>,
}

impl TreasuryAccount {
    /// Generates a fresh keypair and the account it controls.
    pub fn generate(role: Role, branch_id: Option<String>) -> (Self, TreasuryKeypair) {
        let keypair = TreasuryKeypair::generate();
        let account = Self {
            owner: keypair.address(),
            role,
            branch_id,
            custody: Custody::Generated,
            created_at: Utc::now(),
        };
        (account, keypair)
    }

    /// Registers an externally owned key.
    pub fn register(owner: Address, role: Role, branch_id: Option<String>) -> Self {
        Self {
            owner,
            role,
            branch_id,
            custody: Custody::Registered,
            created_at: Utc::now(),
        }
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn branch_id(&self) -> Option<&str> {
        self.branch_id.as_deref()
    }

    pub fn custody(&self) -> Custody {
        self.custody
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
