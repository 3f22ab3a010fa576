//! ChaCha20-Poly1305 AEAD Encryption
//!
//! Every payload exchanged over the bridge is sealed with the session's
//! symmetric key. The wire form is a small JSON object carrying the hex
//! encoded ciphertext (with the Poly1305 tag appended) and the nonce.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::error::{CryptoError, CryptoResult};

/// Size of the encryption key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// The per-session shared key, as exchanged in the pairing URI.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Wrap raw key bytes
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        SymmetricKey(bytes)
    }

    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        SymmetricKey(bytes)
    }

    /// Create from a slice, checking its length
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(SymmetricKey(arr))
    }

    /// Parse a hex encoded key (an optional `0x` prefix is accepted)
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Lower-case hex encoding, as used in pairing URIs
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(********)")
    }
}

impl Serialize for SymmetricKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SymmetricKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Sealed payload as carried inside a bridge frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// hex(ciphertext || tag)
    pub data: String,
    /// hex(nonce)
    pub iv: String,
}

impl EncryptedPayload {
    /// Serialize to the JSON text published on the bridge
    pub fn to_json(&self) -> String {
        // a struct of two strings always serializes
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse the JSON text received from the bridge
    pub fn from_json(s: &str) -> CryptoResult<Self> {
        serde_json::from_str(s).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))
    }
}

/// A sealed payload addressed to a topic
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Destination topic on the relay
    pub topic: String,
    /// The sealed message
    pub payload: EncryptedPayload,
}

impl Envelope {
    /// Encrypt `plaintext` for `topic`
    pub fn seal(topic: impl Into<String>, key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<Self> {
        Ok(Envelope {
            topic: topic.into(),
            payload: Cipher::encrypt(key, plaintext)?,
        })
    }

    /// Verify and decrypt the payload
    pub fn open(&self, key: &SymmetricKey) -> CryptoResult<Vec<u8>> {
        Cipher::decrypt(key, &self.payload)
    }
}

/// Symmetric cipher for encryption/decryption
pub struct Cipher;

impl Cipher {
    /// Encrypt with a fresh random nonce
    pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<EncryptedPayload> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::encrypt_with_nonce(key, &nonce, plaintext)
    }

    /// Encrypt with a caller supplied nonce
    ///
    /// WARNING: Using the same nonce twice with the same key is catastrophic!
    /// Only exposed for known-answer tests.
    pub fn encrypt_with_nonce(
        key: &SymmetricKey,
        nonce: &[u8; NONCE_SIZE],
        plaintext: &[u8],
    ) -> CryptoResult<EncryptedPayload> {
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(format!("{e:?}")))?;

        Ok(EncryptedPayload {
            data: hex::encode(sealed),
            iv: hex::encode(nonce),
        })
    }

    /// Verify the tag and decrypt. No plaintext is released on failure.
    pub fn decrypt(key: &SymmetricKey, payload: &EncryptedPayload) -> CryptoResult<Vec<u8>> {
        let sealed =
            hex::decode(&payload.data).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let iv = hex::decode(&payload.iv).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

        if iv.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: iv.len(),
            });
        }
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        cipher
            .decrypt(
                Nonce::from_slice(&iv),
                Payload {
                    msg: &sealed,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
