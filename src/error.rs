//! Interactor error taxonomy

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::transport::TransportError;

/// Errors surfaced by the protocol engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InteractorError {
    /// Malformed pairing URI or message body
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Integrity check failed on an inbound envelope
    #[error("Decryption failed: {0}")]
    Decryption(CryptoError),

    /// Connection or publish failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Request payload does not have the expected shape
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation is not legal in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The session has been torn down
    #[error("Session closed")]
    SessionClosed,

    /// The peer answered a request with a JSON-RPC error
    #[error("Peer returned error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message from the peer
        message: String,
    },

    /// The signer capability failed
    #[error("Signer error: {0}")]
    Signer(String),

    /// Session store I/O failure
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<CryptoError> for InteractorError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => InteractorError::Decryption(err),
            other => InteractorError::Protocol(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for InteractorError {
    fn from(err: serde_json::Error) -> Self {
        InteractorError::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for InteractorError {
    fn from(err: std::io::Error) -> Self {
        InteractorError::Io(err.to_string())
    }
}

/// Result type for interactor operations
pub type Result<T> = std::result::Result<T, InteractorError>;
