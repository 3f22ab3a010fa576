//! Chain specific method handlers
//!
//! Inbound JSON-RPC requests are dispatched by method name into a
//! [`WcRequest`]. Each chain family lives in its own module and owns:
//! - the parameter shapes it accepts and their validation
//! - the signing helpers that turn an approved request into a result
//!
//! Parsing is pure; nothing here touches the network.

pub mod bnb;
pub mod eth;
pub mod okt;
pub mod typed_data;

use serde_json::Value;
use thiserror::Error;

pub use bnb::{BinanceOrder, BinanceTxConfirmation, OrderSignature};
pub use eth::{EthEvent, EthSignPayload, EthTransaction};
pub use okt::{OktEvent, OktTransaction};
pub use typed_data::TypedData;

use crate::error::InteractorError;

/// Handler failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// No handler is registered for the method
    #[error("unsupported method: {0}")]
    Unsupported(String),
    /// The parameters do not have the expected shape
    #[error("invalid params: {0}")]
    Validation(String),
}

impl From<HandlerError> for InteractorError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Unsupported(method) => {
                InteractorError::Protocol(format!("unsupported method: {method}"))
            }
            HandlerError::Validation(msg) => InteractorError::Validation(msg),
        }
    }
}

/// Result type for handler operations
pub type HandlerResult<T> = Result<T, HandlerError>;

/// A decoded inbound request, ready to be shown to the user
#[derive(Clone, Debug, PartialEq)]
pub enum WcRequest {
    /// `eth_sign`, `personal_sign`, `eth_signTypedData(_v4)`
    EthSign(EthSignPayload),
    /// `eth_signTransaction`, `eth_sendTransaction`
    EthTransaction {
        /// Which of the two methods was called
        event: EthEvent,
        /// The transaction to sign or send
        transaction: EthTransaction,
    },
    /// `bnb_sign`
    BnbSign(BinanceOrder),
    /// `bnb_tx_confirmation`
    BnbTxConfirmation(BinanceTxConfirmation),
    /// `okt_signTransaction`, `okt_sendTransaction`
    OktTransaction {
        /// Which of the two methods was called
        event: OktEvent,
        /// The transaction to sign or send
        transaction: OktTransaction,
    },
}

impl WcRequest {
    /// The JSON-RPC method this request arrived as
    pub fn method(&self) -> &'static str {
        match self {
            WcRequest::EthSign(payload) => payload.method(),
            WcRequest::EthTransaction { event, .. } => event.method(),
            WcRequest::BnbSign(_) => bnb::BNB_SIGN,
            WcRequest::BnbTxConfirmation(_) => bnb::BNB_TX_CONFIRMATION,
            WcRequest::OktTransaction { event, .. } => event.method(),
        }
    }
}

/// Decode an inbound request by method name
pub fn parse(method: &str, params: &Value) -> HandlerResult<WcRequest> {
    if let Some(request) = eth::parse(method, params)? {
        return Ok(request);
    }
    if let Some(request) = bnb::parse(method, params)? {
        return Ok(request);
    }
    if let Some(request) = okt::parse(method, params)? {
        return Ok(request);
    }
    Err(HandlerError::Unsupported(method.to_string()))
}

/// `params` as an array with at least `min` elements
pub(crate) fn params_array<'a>(
    method: &str,
    params: &'a Value,
    min: usize,
) -> HandlerResult<&'a [Value]> {
    let items = params
        .as_array()
        .ok_or_else(|| HandlerError::Validation(format!("{method}: params must be an array")))?;
    if items.len() < min {
        return Err(HandlerError::Validation(format!(
            "{method}: expected at least {min} params, got {}",
            items.len()
        )));
    }
    Ok(items)
}

/// Deserialize the first element of `params`
pub(crate) fn first_param<T: serde::de::DeserializeOwned>(
    method: &str,
    params: &Value,
) -> HandlerResult<T> {
    let items = params_array(method, params, 1)?;
    serde_json::from_value(items[0].clone())
        .map_err(|e| HandlerError::Validation(format!("{method}: {e}")))
}
