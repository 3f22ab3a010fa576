//! Ethereum methods: message signing and transactions

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::typed_data::TypedData;
use super::{first_param, params_array, HandlerError, HandlerResult, WcRequest};
use crate::crypto::Hash;
use crate::error::{InteractorError, Result};
use crate::signer::{Curve, Signer, RECOVERABLE_SIGNATURE_SIZE};

/// `eth_sign`
pub const ETH_SIGN: &str = "eth_sign";
/// `personal_sign`
pub const PERSONAL_SIGN: &str = "personal_sign";
/// `eth_signTypedData`
pub const ETH_SIGN_TYPED_DATA: &str = "eth_signTypedData";
/// `eth_signTypedData_v4`
pub const ETH_SIGN_TYPED_DATA_V4: &str = "eth_signTypedData_v4";
/// `eth_signTransaction`
pub const ETH_SIGN_TRANSACTION: &str = "eth_signTransaction";
/// `eth_sendTransaction`
pub const ETH_SEND_TRANSACTION: &str = "eth_sendTransaction";

const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// A message signing request
#[derive(Clone, Debug, PartialEq)]
pub enum EthSignPayload {
    /// `eth_sign [address, data]`: the data is hashed without a prefix
    Sign {
        /// Requested signing account
        address: String,
        /// Raw message bytes
        data: Vec<u8>,
    },
    /// `personal_sign [data, address]`
    PersonalSign {
        /// Requested signing account
        address: String,
        /// Raw message bytes
        data: Vec<u8>,
    },
    /// `eth_signTypedData(_v4) [address, typedData]`
    SignTypedData {
        /// Requested signing account
        address: String,
        /// Parsed EIP-712 document
        typed_data: TypedData,
        /// The document as received, for display
        raw: String,
        /// Arrived as `eth_signTypedData_v4`
        v4: bool,
    },
}

impl EthSignPayload {
    /// Method name this payload was decoded from
    pub fn method(&self) -> &'static str {
        match self {
            EthSignPayload::Sign { .. } => ETH_SIGN,
            EthSignPayload::PersonalSign { .. } => PERSONAL_SIGN,
            EthSignPayload::SignTypedData { v4: false, .. } => ETH_SIGN_TYPED_DATA,
            EthSignPayload::SignTypedData { v4: true, .. } => ETH_SIGN_TYPED_DATA_V4,
        }
    }

    /// Account the dApp asked to sign with
    pub fn address(&self) -> &str {
        match self {
            EthSignPayload::Sign { address, .. }
            | EthSignPayload::PersonalSign { address, .. }
            | EthSignPayload::SignTypedData { address, .. } => address,
        }
    }

    /// Human readable form of what is being signed
    pub fn message(&self) -> String {
        match self {
            EthSignPayload::Sign { data, .. } => format!("0x{}", hex::encode(data)),
            EthSignPayload::PersonalSign { data, .. } => match std::str::from_utf8(data) {
                Ok(text) => text.to_string(),
                Err(_) => format!("0x{}", hex::encode(data)),
            },
            EthSignPayload::SignTypedData { raw, .. } => raw.clone(),
        }
    }
}

/// Transaction methods
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EthEvent {
    /// `eth_signTransaction`
    SignTransaction,
    /// `eth_sendTransaction`
    SendTransaction,
}

impl EthEvent {
    /// JSON-RPC method name
    pub fn method(&self) -> &'static str {
        match self {
            EthEvent::SignTransaction => ETH_SIGN_TRANSACTION,
            EthEvent::SendTransaction => ETH_SEND_TRANSACTION,
        }
    }
}

/// Transaction parameters as sent by the dApp; quantities stay hex strings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthTransaction {
    /// Sender
    pub from: String,
    /// Recipient, absent for contract creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Sender nonce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// Gas price in wei
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    /// Gas limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<String>,
    /// Gas limit, as sent by some dApps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<String>,
    /// Value in wei
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Call data
    #[serde(default)]
    pub data: String,
}

pub(crate) fn parse(method: &str, params: &Value) -> HandlerResult<Option<WcRequest>> {
    let request = match method {
        ETH_SIGN => {
            let items = params_array(method, params, 2)?;
            WcRequest::EthSign(EthSignPayload::Sign {
                address: string_param(method, &items[0])?,
                data: hex_param(method, &string_param(method, &items[1])?)?,
            })
        }
        PERSONAL_SIGN => {
            let items = params_array(method, params, 2)?;
            WcRequest::EthSign(EthSignPayload::PersonalSign {
                data: decode_message(method, &string_param(method, &items[0])?)?,
                address: string_param(method, &items[1])?,
            })
        }
        ETH_SIGN_TYPED_DATA | ETH_SIGN_TYPED_DATA_V4 => {
            let items = params_array(method, params, 2)?;
            let address = string_param(method, &items[0])?;
            // either a JSON document in a string or the object itself
            let raw = match &items[1] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let typed_data = TypedData::from_json(&raw)?;
            WcRequest::EthSign(EthSignPayload::SignTypedData {
                address,
                typed_data,
                raw,
                v4: method == ETH_SIGN_TYPED_DATA_V4,
            })
        }
        ETH_SIGN_TRANSACTION | ETH_SEND_TRANSACTION => {
            let transaction: EthTransaction = first_param(method, params)?;
            if transaction.from.is_empty() {
                return Err(HandlerError::Validation(format!(
                    "{method}: missing sender"
                )));
            }
            let event = if method == ETH_SIGN_TRANSACTION {
                EthEvent::SignTransaction
            } else {
                EthEvent::SendTransaction
            };
            WcRequest::EthTransaction { event, transaction }
        }
        _ => return Ok(None),
    };
    Ok(Some(request))
}

fn string_param(method: &str, value: &Value) -> HandlerResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| HandlerError::Validation(format!("{method}: expected a string, got {value}")))
}

/// Hex bytes with an optional `0x` prefix
fn hex_param(method: &str, s: &str) -> HandlerResult<Vec<u8>> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| HandlerError::Validation(format!("{method}: malformed hex data: {e}")))
}

/// `0x` prefixed strings must be valid hex, anything else is UTF-8 text
fn decode_message(method: &str, s: &str) -> HandlerResult<Vec<u8>> {
    if s.starts_with("0x") {
        hex_param(method, s)
    } else {
        Ok(s.as_bytes().to_vec())
    }
}

/// The 32 byte digest handed to the signer for `payload`
pub fn signing_digest(payload: &EthSignPayload) -> HandlerResult<[u8; 32]> {
    match payload {
        EthSignPayload::Sign { data, .. } => Ok(Hash::keccak256(data)),
        EthSignPayload::PersonalSign { data, .. } => {
            let prefix = format!("{PERSONAL_MESSAGE_PREFIX}{}", data.len());
            Ok(Hash::keccak256_parts(&[prefix.as_bytes(), data.as_slice()]))
        }
        EthSignPayload::SignTypedData { typed_data, .. } => typed_data.signing_digest(),
    }
}

/// Sign `payload` and format the result as `0x || r || s || v`, with
/// `v = recovery_id + 27`
pub fn sign_message(signer: &dyn Signer, payload: &EthSignPayload) -> Result<String> {
    let digest = signing_digest(payload)?;
    let mut signature = signer.sign(&digest, Curve::Secp256k1)?;
    if signature.len() != RECOVERABLE_SIGNATURE_SIZE {
        return Err(InteractorError::Signer(format!(
            "expected a {RECOVERABLE_SIGNATURE_SIZE} byte signature, got {}",
            signature.len()
        )));
    }
    let recovery_id = signature[64];
    if recovery_id > 1 {
        return Err(InteractorError::Signer(format!(
            "recovery id must be 0 or 1, got {recovery_id}"
        )));
    }
    signature[64] = recovery_id + 27;
    Ok(format!("0x{}", hex::encode(signature)))
}
