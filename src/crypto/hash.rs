//! Digest helpers used by the signing handlers.

use sha2::Sha256;
use sha3::{Digest, Keccak256};

/// Size of a hash output in bytes
pub const HASH_SIZE: usize = 32;

/// A hash output
pub type HashOutput = [u8; HASH_SIZE];

/// Hashing operations
pub struct Hash;

impl Hash {
    /// Keccak-256 (the pre-standard SHA-3 variant used by Ethereum)
    pub fn keccak256(data: &[u8]) -> HashOutput {
        to_output(&Keccak256::digest(data))
    }

    /// Keccak-256 over several slices without concatenating them first
    pub fn keccak256_parts(parts: &[&[u8]]) -> HashOutput {
        let mut hasher = Keccak256::new();
        for part in parts {
            hasher.update(part);
        }
        to_output(&hasher.finalize())
    }

    /// SHA-256
    pub fn sha256(data: &[u8]) -> HashOutput {
        to_output(&Sha256::digest(data))
    }
}

fn to_output(digest: &[u8]) -> HashOutput {
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(digest);
    out
}
