//! Interactor configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{InteractorError, Result};
use crate::session::PeerMeta;

/// Tunables for an [`Interactor`](crate::Interactor)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractorConfig {
    /// Upper bound for opening the bridge connection, in milliseconds
    pub connect_timeout_ms: u64,
    /// Consecutive undecryptable envelopes tolerated before the session is
    /// treated as compromised and torn down
    pub max_decrypt_failures: u32,
    /// Mark outbound responses as silent (no push notification at the bridge)
    pub silent_responses: bool,
    /// Metadata presented to dApps during the handshake
    pub client_meta: PeerMeta,
}

impl Default for InteractorConfig {
    fn default() -> Self {
        InteractorConfig {
            connect_timeout_ms: 10_000,
            max_decrypt_failures: 3,
            silent_responses: true,
            client_meta: PeerMeta {
                name: "wc-interactor".to_string(),
                description: "Wallet session interactor".to_string(),
                url: "https://github.com/wc-interactor".to_string(),
                icons: Vec::new(),
            },
        }
    }
}

impl InteractorConfig {
    /// Connect timeout as a [`Duration`]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|err| InteractorError::Protocol(format!("unable to parse config: {err}")))
    }

    /// Load a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}
