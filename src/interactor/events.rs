//! What the interactor reports to the host application

use serde::{Deserialize, Serialize};

use crate::error::InteractorError;
use crate::handlers::WcRequest;
use crate::session::PeerMeta;

/// Lifecycle state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected; terminal once the session has been torn down
    Disconnected,
    /// Transport open, handshake not yet approved
    Connecting,
    /// Approved and exchanging requests
    Connected,
    /// Approved, but outbound frames are held back until resumed
    Paused,
}

/// Parameters of the dApp's `wc_sessionRequest`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    /// The dApp's peer id; responses are published to this topic
    pub peer_id: String,
    /// The dApp's metadata
    pub peer_meta: PeerMeta,
    /// Chain the dApp would like to use
    #[serde(default)]
    pub chain_id: Option<u64>,
}

/// Parameters of a `wc_sessionUpdate`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdateParams {
    /// `false` ends the session
    pub approved: bool,
    /// New chain id
    pub chain_id: Option<u64>,
    /// New account list
    pub accounts: Option<Vec<String>>,
}

/// Notifications delivered on the interactor's event channel
#[derive(Clone, Debug, PartialEq)]
pub enum InteractorEvent {
    /// A dApp asked to open a session. Answer with
    /// [`approve_session`](super::Interactor::approve_session) or
    /// [`reject_session`](super::Interactor::reject_session).
    SessionRequest {
        /// Id of the handshake request
        id: u64,
        /// What the dApp sent
        params: SessionRequestParams,
    },
    /// A supported request awaiting the user's decision. Answer once with
    /// [`approve_request`](super::Interactor::approve_request) or
    /// [`reject_request`](super::Interactor::reject_request).
    Request {
        /// Request id
        id: u64,
        /// Decoded request
        request: WcRequest,
    },
    /// A request for a method with no handler; it has already been rejected
    UnsupportedMethod {
        /// Request id
        id: u64,
        /// Method name
        method: String,
    },
    /// The dApp changed the session's accounts or chain
    SessionUpdated {
        /// Accounts now in effect
        accounts: Vec<String>,
        /// Chain id now in effect
        chain_id: u64,
    },
    /// The session ended. No further events follow.
    Disconnected {
        /// Why, when known
        cause: Option<String>,
    },
    /// A non fatal fault while processing inbound traffic
    Error(InteractorError),
}
