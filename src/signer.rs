//! Signer capability
//!
//! Key custody stays with the host application. The protocol engine hands
//! a fully prepared digest to a [`Signer`] and post-processes the raw
//! signature for the target chain.

use k256::ecdsa::SigningKey;
use thiserror::Error;
use zeroize::Zeroizing;

/// Size of a recoverable secp256k1 signature: `r || s || recovery_id`
pub const RECOVERABLE_SIGNATURE_SIZE: usize = 65;

/// Curve / scheme requested from the signer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Curve {
    /// ECDSA over secp256k1, 32 byte prehash input, 65 byte recoverable output
    Secp256k1,
    /// Ed25519 over the raw message
    Ed25519,
}

/// Signer failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// The signer does not hold a key for this curve
    #[error("unsupported curve {0:?}")]
    UnsupportedCurve(Curve),
    /// Input of the wrong shape (e.g. a digest that is not 32 bytes)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The signing operation itself failed
    #[error("signing failed: {0}")]
    Failed(String),
}

impl From<SignerError> for crate::InteractorError {
    fn from(err: SignerError) -> Self {
        crate::InteractorError::Signer(err.to_string())
    }
}

/// Host-provided signing capability
pub trait Signer: Send + Sync {
    /// Sign `digest` on `curve`.
    ///
    /// For [`Curve::Secp256k1`] the digest is a 32 byte hash and the result
    /// is `r || s || recovery_id` with a recovery id of 0 or 1.
    fn sign(&self, digest: &[u8], curve: Curve) -> Result<Vec<u8>, SignerError>;

    /// Public key for `curve`, SEC1 encoded for secp256k1
    fn public_key(&self, curve: Curve, compressed: bool) -> Result<Vec<u8>, SignerError>;
}

/// In-process secp256k1 signer holding a raw private key
pub struct LocalKeySigner {
    key: SigningKey,
}

impl LocalKeySigner {
    /// Build from 32 raw private key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        let key = SigningKey::from_slice(bytes)
            .map_err(|e| SignerError::InvalidInput(format!("invalid private key: {e}")))?;
        Ok(LocalKeySigner { key })
    }

    /// Build from a hex private key (optional `0x` prefix)
    pub fn from_hex(s: &str) -> Result<Self, SignerError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = Zeroizing::new(
            hex::decode(s).map_err(|e| SignerError::InvalidInput(format!("invalid hex: {e}")))?,
        );
        Self::from_bytes(&bytes)
    }

    /// A random key, for demos and tests
    pub fn random() -> Self {
        LocalKeySigner {
            key: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Ethereum address (`0x` + 40 lower-case hex) of this key
    pub fn eth_address(&self) -> String {
        let encoded = self.key.verifying_key().to_encoded_point(false);
        let hash = crate::crypto::Hash::keccak256(&encoded.as_bytes()[1..]);
        format!("0x{}", hex::encode(&hash[12..]))
    }
}

impl std::fmt::Debug for LocalKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeySigner")
            .field("address", &self.eth_address())
            .finish()
    }
}

impl Signer for LocalKeySigner {
    fn sign(&self, digest: &[u8], curve: Curve) -> Result<Vec<u8>, SignerError> {
        if curve != Curve::Secp256k1 {
            return Err(SignerError::UnsupportedCurve(curve));
        }
        if digest.len() != 32 {
            return Err(SignerError::InvalidInput(format!(
                "expected a 32 byte digest, got {}",
                digest.len()
            )));
        }

        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest)
            .map_err(|e| SignerError::Failed(e.to_string()))?;

        let mut out = signature.to_bytes().to_vec();
        out.push(recovery_id.to_byte());
        Ok(out)
    }

    fn public_key(&self, curve: Curve, compressed: bool) -> Result<Vec<u8>, SignerError> {
        if curve != Curve::Secp256k1 {
            return Err(SignerError::UnsupportedCurve(curve));
        }
        Ok(self
            .key
            .verifying_key()
            .to_encoded_point(compressed)
            .as_bytes()
            .to_vec())
    }
}
