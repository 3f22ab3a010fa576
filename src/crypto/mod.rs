//! Cryptographic primitives for the interactor
//!
//! This module provides the building blocks the protocol engine needs:
//! - `cipher`: ChaCha20-Poly1305 sealing of bridge payloads
//! - `hash`: Keccak-256 / SHA-256 digests for the signing handlers

pub mod cipher;
pub mod error;
pub mod hash;

// Re-export commonly used types
pub use cipher::{Cipher, EncryptedPayload, Envelope, SymmetricKey};
pub use error::{CryptoError, CryptoResult};
pub use hash::Hash;
