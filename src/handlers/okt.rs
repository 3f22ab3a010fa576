//! OKExChain methods

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{first_param, HandlerError, HandlerResult, WcRequest};

/// `okt_signTransaction`
pub const OKT_SIGN_TRANSACTION: &str = "okt_signTransaction";
/// `okt_sendTransaction`
pub const OKT_SEND_TRANSACTION: &str = "okt_sendTransaction";

/// Transaction methods
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OktEvent {
    /// `okt_signTransaction`
    SignTransaction,
    /// `okt_sendTransaction`
    SendTransaction,
}

impl OktEvent {
    /// JSON-RPC method name
    pub fn method(&self) -> &'static str {
        match self {
            OktEvent::SignTransaction => OKT_SIGN_TRANSACTION,
            OktEvent::SendTransaction => OKT_SEND_TRANSACTION,
        }
    }
}

/// An OKExChain transfer or contract call
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OktTransaction {
    /// Sender
    pub from: String,
    /// Recipient
    pub to: String,
    /// Amount
    pub value: String,
    /// Gas limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<String>,
    /// Gas price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    /// Account number of the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    /// Account sequence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<String>,
    /// Token symbol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Memo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Token decimals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_num: Option<String>,
    /// Token contract for KIP-20 transfers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    /// Call data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

pub(crate) fn parse(method: &str, params: &Value) -> HandlerResult<Option<WcRequest>> {
    let event = match method {
        OKT_SIGN_TRANSACTION => OktEvent::SignTransaction,
        OKT_SEND_TRANSACTION => OktEvent::SendTransaction,
        _ => return Ok(None),
    };
    let transaction: OktTransaction = first_param(method, params)?;
    if transaction.from.is_empty() || transaction.to.is_empty() {
        return Err(HandlerError::Validation(format!(
            "{method}: sender and recipient are required"
        )));
    }
    Ok(Some(WcRequest::OktTransaction { event, transaction }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use serde_json::json;

    #[test]
    fn test_parse_transfer() {
        let request = handlers::parse(
            OKT_SEND_TRANSACTION,
            &json!([{
                "from": "0xd1c8a9cc2ee9c6bd8e8a9e5d2a0e27e8e1a45f39",
                "to": "0x5e1c2e7bdb8b8d5d3b4bb1c59ea8fbd8c2ca0f2e",
                "value": "1.5",
                "symbol": "okt",
                "decimalNum": "18"
            }]),
        )
        .unwrap();

        match request {
            WcRequest::OktTransaction { event, transaction } => {
                assert_eq!(event, OktEvent::SendTransaction);
                assert_eq!(event.method(), "okt_sendTransaction");
                assert_eq!(transaction.symbol.as_deref(), Some("okt"));
                assert_eq!(transaction.decimal_num.as_deref(), Some("18"));
                assert_eq!(transaction.contract_address, None);
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_requires_recipient() {
        assert!(matches!(
            handlers::parse(
                OKT_SIGN_TRANSACTION,
                &json!([{"from": "0xd1c8", "to": "", "value": "1"}])
            ),
            Err(HandlerError::Validation(_))
        ));
    }
}
