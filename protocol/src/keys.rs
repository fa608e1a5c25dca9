//! # Keypairs
//!
//! Ed25519 signing keys for treasury actors, stored on disk the way the
//! Solana tool suite stores them: a JSON array of byte values.
//!
//! Two layouts are accepted on load:
//!
//! - 32 bytes: the raw seed.
//! - 64 bytes: seed followed by the public key. The public half is checked
//!   against the key derived from the seed; a mismatch means the file is
//!   corrupt or was stitched together by hand.
//!
//! Files are always written in the 64-byte layout.
//!
//! Key bytes never appear in logs or error messages.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use std::path::Path;

use crate::address::Address;
use crate::error::{TreasuryError, TreasuryResult};

/// Length of the seed-plus-public-key file layout.
pub const KEYPAIR_FILE_LENGTH: usize = 64;

/// Length of an ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 64;

/// An actor's signing key.
pub struct TreasuryKeypair {
    signing_key: SigningKey,
}

impl TreasuryKeypair {
    /// Fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parses raw key bytes in either accepted layout.
    pub fn from_bytes(bytes: &[u8]) -> TreasuryResult<Self> {
        match bytes.len() {
            SECRET_KEY_LENGTH => {
                let mut seed = [0u8; SECRET_KEY_LENGTH];
                seed.copy_from_slice(bytes);
                Ok(Self::from_seed(&seed))
            }
            KEYPAIR_FILE_LENGTH => {
                let mut seed = [0u8; SECRET_KEY_LENGTH];
                seed.copy_from_slice(&bytes[..SECRET_KEY_LENGTH]);
                let keypair = Self::from_seed(&seed);
                if keypair.address().as_bytes()[..] != bytes[SECRET_KEY_LENGTH..] {
                    return Err(TreasuryError::InvalidKeypair(
                        "public key does not match the secret key".into(),
                    ));
                }
                Ok(keypair)
            }
            n => Err(TreasuryError::InvalidKeypair(format!(
                "expected {SECRET_KEY_LENGTH} or {KEYPAIR_FILE_LENGTH} bytes, found {n}"
            ))),
        }
    }

    /// Parses the JSON byte-array format.
    pub fn from_json(json: &str) -> TreasuryResult<Self> {
        let bytes: Vec<u8> = serde_json::from_str(json)
            .map_err(|e| TreasuryError::InvalidKeypair(format!("not a JSON byte array: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Loads a keypair file.
    pub fn load(path: impl AsRef<Path>) -> TreasuryResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            TreasuryError::InvalidKeypair(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Serializes to the 64-byte JSON array layout.
    pub fn to_json(&self) -> String {
        let mut bytes = Vec::with_capacity(KEYPAIR_FILE_LENGTH);
        bytes.extend_from_slice(&self.signing_key.to_bytes());
        bytes.extend_from_slice(self.address().as_bytes());
        // Serializing a Vec<u8> into a JSON array cannot fail.
        serde_json::to_string(&bytes).unwrap_or_default()
    }

    /// Writes the keypair file, owner-readable only on Unix.
    pub fn write(&self, path: impl AsRef<Path>) -> TreasuryResult<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()).map_err(|e| {
            TreasuryError::InvalidKeypair(format!("cannot write {}: {e}", path.display()))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
                TreasuryError::InvalidKeypair(format!("cannot restrict {}: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    /// The account address this key controls.
    pub fn address(&self) -> Address {
        Address::new(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LENGTH] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl Clone for TreasuryKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl std::fmt::Debug for TreasuryKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TreasuryKeypair({})", self.address())
    }
}

/// Verifies `signature` over `message` against the key at `address`.
pub fn verify_signature(address: &Address, message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(address.as_bytes()) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; SIGNATURE_LENGTH]>::try_from(signature) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(&sig_bytes)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_address() {
        let kp = TreasuryKeypair::generate();
        let restored = TreasuryKeypair::from_json(&kp.to_json()).unwrap();
        assert_eq!(restored.address(), kp.address());
    }

    #[test]
    fn seed_only_layout_is_accepted() {
        let seed = [7u8; 32];
        let json = serde_json::to_string(&seed.to_vec()).unwrap();
        let kp = TreasuryKeypair::from_json(&json).unwrap();
        assert_eq!(kp.address(), TreasuryKeypair::from_seed(&seed).address());
    }

    #[test]
    fn wrong_length_is_invalid() {
        let err = TreasuryKeypair::from_json("[1,2,3]").unwrap_err();
        assert!(matches!(err, TreasuryError::InvalidKeypair(_)));
    }

    #[test]
    fn out_of_range_values_are_invalid() {
        let mut values = vec![1u16; 31];
        values.push(256);
        let json = serde_json::to_string(&values).unwrap();
        assert!(TreasuryKeypair::from_json(&json).is_err());
    }

    #[test]
    fn mismatched_public_half_is_invalid() {
        let kp = TreasuryKeypair::generate();
        let other = TreasuryKeypair::generate();
        let mut bytes: Vec<u8> = serde_json::from_str(&kp.to_json()).unwrap();
        bytes[32..].copy_from_slice(other.address().as_bytes());
        let err = TreasuryKeypair::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corporate.json");
        let kp = TreasuryKeypair::generate();
        kp.write(&path).unwrap();
        assert_eq!(TreasuryKeypair::load(&path).unwrap().address(), kp.address());
        assert!(TreasuryKeypair::load(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn signatures_verify_against_address() {
        let kp = TreasuryKeypair::generate();
        let sig = kp.sign(b"burn 50 pUSD");
        assert!(verify_signature(&kp.address(), b"burn 50 pUSD", &sig));
        assert!(!verify_signature(&kp.address(), b"burn 51 pUSD", &sig));
        assert!(!verify_signature(&kp.address(), b"burn 50 pUSD", &sig[..10]));
    }
}
