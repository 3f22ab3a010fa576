//! JSON-RPC framing shared by both peers
//!
//! Every sealed bridge payload decrypts to one JSON-RPC 2.0 object: either a
//! request (carries `method`) or a response (carries `result` or `error`).

pub mod router;

pub use router::{IdGenerator, PendingRequest, Resolution, Router};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{InteractorError, Result};

/// Version of the JSON-RPC protocol spoken over the bridge
pub const JSON_RPC_VERSION: &str = "2.0";

/// Standard and protocol specific JSON-RPC error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i64 = -32700;
    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i64 = -32602;
    /// Generic rejection (user declined, session rejected, ...)
    pub const SERVER_ERROR: i64 = -32000;
}

/// Data structure representing a JSON RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// ID this message corresponds to.
    pub id: u64,

    /// The JSON RPC version.
    pub jsonrpc: String,

    /// Method name used for handler dispatch.
    pub method: String,

    /// Opaque parameters, interpreted by the method handler.
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Create a new instance.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Request {
            id,
            jsonrpc: JSON_RPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// The error member of a failed response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Error code
    pub code: i64,
    /// Human readable message
    pub message: String,
}

/// Either the `result` or the `error` member of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// A response with a result.
    #[serde(rename = "result")]
    Success(Value),

    /// A response for a failed request.
    #[serde(rename = "error")]
    Failure(ErrorObject),
}

/// Data structure representing a JSON RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// ID of the request this answers.
    pub id: u64,

    /// RPC version.
    pub jsonrpc: String,

    /// Result or error.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// A successful response
    pub fn success(id: u64, result: Value) -> Self {
        Response {
            id,
            jsonrpc: JSON_RPC_VERSION.to_string(),
            outcome: Outcome::Success(result),
        }
    }

    /// An error response
    pub fn error(id: u64, code: i64, message: impl Into<String>) -> Self {
        Response {
            id,
            jsonrpc: JSON_RPC_VERSION.to_string(),
            outcome: Outcome::Failure(ErrorObject {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Enum representing a JSON RPC payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// An inbound or outbound call
    Request(Request),
    /// The answer to a call
    Response(Response),
}

impl From<Request> for Payload {
    fn from(value: Request) -> Self {
        Payload::Request(value)
    }
}

impl From<Response> for Payload {
    fn from(value: Response) -> Self {
        Payload::Response(value)
    }
}

impl Payload {
    /// Returns the message ID contained within the payload.
    pub fn id(&self) -> u64 {
        match self {
            Self::Request(req) => req.id,
            Self::Response(res) => res.id,
        }
    }

    fn jsonrpc(&self) -> &str {
        match self {
            Self::Request(req) => &req.jsonrpc,
            Self::Response(res) => &res.jsonrpc,
        }
    }

    /// Decode and validate a decrypted payload
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let payload: Payload = serde_json::from_slice(bytes)
            .map_err(|e| InteractorError::Protocol(format!("undecodable message: {e}")))?;
        if payload.jsonrpc() != JSON_RPC_VERSION {
            return Err(InteractorError::Protocol(format!(
                "unsupported jsonrpc version {:?}",
                payload.jsonrpc()
            )));
        }
        Ok(payload)
    }

    /// Encode to the JSON bytes that get sealed
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
