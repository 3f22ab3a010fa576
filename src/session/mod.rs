//! Session descriptors, peer metadata and the persisted session record
//!
//! A pairing starts from a [`SessionDescriptor`] decoded from the pairing
//! URI. Once the handshake has been approved the interactor can snapshot a
//! [`SessionRecord`], the single piece of state needed to rejoin the same
//! session after the host lost execution time.

pub mod store;
pub mod uri;

pub use store::SessionStore;
pub use uri::{SessionDescriptor, PROTOCOL_VERSION, URI_SCHEME};

use serde::{Deserialize, Serialize};

/// Descriptive metadata exchanged by both peers during the handshake
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerMeta {
    /// Display name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Home page
    pub url: String,
    /// Icon URLs
    #[serde(default)]
    pub icons: Vec<String>,
}

impl PeerMeta {
    /// Metadata with just a name and url
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        PeerMeta {
            name: name.into(),
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Everything required to recover an approved session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// The pairing this session was created from
    pub descriptor: SessionDescriptor,
    /// Our own peer id (the topic we listen on)
    pub client_id: String,
    /// The dApp's peer id
    pub peer_id: String,
    /// The dApp's metadata
    pub peer_meta: PeerMeta,
    /// Accounts approved for the session
    pub accounts: Vec<String>,
    /// Chain id approved for the session
    pub chain_id: u64,
}
