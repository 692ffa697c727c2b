//! Hashlock commitments
//!
//! A swap is gated on both chains by the same Keccak-256 hashlock, so either
//! chain's HTLC can validate the preimage without the secret ever being
//! shared off-chain in advance.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Required preimage length in bytes
pub const SECRET_LEN: usize = 32;

pub type Secret = [u8; SECRET_LEN];
pub type Hashlock = [u8; 32];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("invalid secret length: expected {SECRET_LEN} bytes, got {0}")]
    InvalidSecretLength(usize),
}

/// A freshly generated secret and its commitment. The secret stays with the
/// swap initiator until the reveal step publishes it on-chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecretHashlockPair {
    pub secret: Secret,
    pub hashlock: Hashlock,
}

impl SecretHashlockPair {
    /// Generate a new pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut secret = [0u8; SECRET_LEN];
        OsRng.fill_bytes(&mut secret);
        let hashlock = commit(&secret);
        Self { secret, hashlock }
    }
}

/// Keccak-256 commitment of a secret.
pub fn commit(secret: &Secret) -> Hashlock {
    let mut hasher = Keccak256::new();
    hasher.update(secret);
    hasher.finalize().into()
}

/// Verify that a candidate preimage satisfies a hashlock.
///
/// Comparison is constant-time over the full digest so verification latency
/// leaks nothing about how many leading bytes matched.
pub fn verify(candidate: &[u8], hashlock: &Hashlock) -> Result<bool, SecretError> {
    if candidate.len() != SECRET_LEN {
        return Err(SecretError::InvalidSecretLength(candidate.len()));
    }
    let mut secret = [0u8; SECRET_LEN];
    secret.copy_from_slice(candidate);

    let digest = commit(&secret);
    let mut diff = 0u8;
    for (a, b) in digest.iter().zip(hashlock.iter()) {
        diff |= a ^ b;
    }
    Ok(diff == 0)
}

/// Hex rendering for logs and store rows.
pub fn to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_verifies() {
        let pair = SecretHashlockPair::generate();
        assert!(verify(&pair.secret, &pair.hashlock).unwrap());
    }

    #[test]
    fn wrong_secret_fails() {
        let pair = SecretHashlockPair::generate();
        let mut other = pair.secret;
        other[0] ^= 0x01;
        assert!(!verify(&other, &pair.hashlock).unwrap());
    }

    #[test]
    fn distinct_pairs_have_distinct_hashlocks() {
        let a = SecretHashlockPair::generate();
        let b = SecretHashlockPair::generate();
        assert_ne!(a.secret, b.secret);
        assert_ne!(a.hashlock, b.hashlock);
    }

    #[test]
    fn short_preimage_is_rejected() {
        let pair = SecretHashlockPair::generate();
        let err = verify(&pair.secret[..16], &pair.hashlock).unwrap_err();
        assert_eq!(err, SecretError::InvalidSecretLength(16));
    }

    #[test]
    fn known_vector() {
        // keccak256(0x00 * 32)
        let secret = [0u8; 32];
        let hash = commit(&secret);
        assert_eq!(
            to_hex(&hash),
            "0x290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
        );
    }
}
