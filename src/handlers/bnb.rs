//! Binance Chain methods

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{first_param, HandlerError, HandlerResult, WcRequest};
use crate::crypto::Hash;
use crate::error::{InteractorError, Result};
use crate::signer::{Curve, Signer, RECOVERABLE_SIGNATURE_SIZE};

/// `bnb_sign`
pub const BNB_SIGN: &str = "bnb_sign";
/// `bnb_tx_confirmation`
pub const BNB_TX_CONFIRMATION: &str = "bnb_tx_confirmation";

/// A Binance Chain order to sign
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinanceOrder {
    /// Account number of the signer
    pub account_number: String,
    /// Chain id, e.g. `Binance-Chain-Tigris`
    pub chain_id: String,
    /// Extra data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Memo
    #[serde(default)]
    pub memo: String,
    /// Order messages, kept as sent
    pub msgs: Vec<Value>,
    /// Account sequence
    pub sequence: String,
    /// Source id
    pub source: String,
}

impl BinanceOrder {
    /// Canonical JSON: object keys sorted at every level, no whitespace.
    /// This is the exact byte string that gets signed.
    pub fn encoded(&self) -> Result<Vec<u8>> {
        let value = sort_keys(serde_json::to_value(self)?);
        Ok(serde_json::to_vec(&value)?)
    }

    /// [`encoded`](Self::encoded) as text, for display
    pub fn encoded_string(&self) -> Result<String> {
        let bytes = self.encoded()?;
        String::from_utf8(bytes).map_err(|e| InteractorError::Protocol(e.to_string()))
    }
}

/// Rebuild every object with its keys inserted in sorted order
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, sort_keys(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// The signed order returned to the dApp
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSignature {
    /// `hex(r || s)`, no recovery byte, no `0x`
    pub signature: String,
    /// Uncompressed secp256k1 public key in hex
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

/// Broadcast outcome reported by the dApp after a `bnb_sign`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinanceTxConfirmation {
    /// Whether the transaction was accepted
    pub ok: bool,
    /// Failure reason
    #[serde(rename = "errorMsg", default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
}

pub(crate) fn parse(method: &str, params: &Value) -> HandlerResult<Option<WcRequest>> {
    let request = match method {
        BNB_SIGN => {
            let order: BinanceOrder = first_param(method, params)?;
            if order.msgs.is_empty() {
                return Err(HandlerError::Validation(format!("{method}: order has no msgs")));
            }
            WcRequest::BnbSign(order)
        }
        BNB_TX_CONFIRMATION => WcRequest::BnbTxConfirmation(first_param(method, params)?),
        _ => return Ok(None),
    };
    Ok(Some(request))
}

/// Sign `sha256(order.encoded())`
pub fn sign_order(signer: &dyn Signer, order: &BinanceOrder) -> Result<OrderSignature> {
    let digest = Hash::sha256(&order.encoded()?);
    let signature = signer.sign(&digest, Curve::Secp256k1)?;
    if signature.len() != RECOVERABLE_SIGNATURE_SIZE {
        return Err(InteractorError::Signer(format!(
            "expected a {RECOVERABLE_SIGNATURE_SIZE} byte signature, got {}",
            signature.len()
        )));
    }
    let public_key = signer.public_key(Curve::Secp256k1, false)?;

    Ok(OrderSignature {
        signature: hex::encode(&signature[..64]),
        public_key: hex::encode(public_key),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use crate::signer::LocalKeySigner;
    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    use k256::ecdsa::{Signature, VerifyingKey};
    use serde_json::json;

    fn order_params() -> Value {
        // keys deliberately out of order
        json!([{
            "sequence": "0",
            "source": "1",
            "msgs": [{
                "outputs": [{"coins": [{"denom": "BNB", "amount": 100}], "address": "bnb1b"}],
                "inputs": [{"address": "bnb1a", "coins": [{"amount": 100, "denom": "BNB"}]}]
            }],
            "memo": "",
            "data": null,
            "chain_id": "Binance-Chain-Tigris",
            "account_number": "1"
        }])
    }

    fn order() -> BinanceOrder {
        match handlers::parse(BNB_SIGN, &order_params()).unwrap() {
            WcRequest::BnbSign(order) => order,
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_encoding_sorts_keys() {
        assert_eq!(
            order().encoded_string().unwrap(),
            concat!(
                r#"{"account_number":"1","chain_id":"Binance-Chain-Tigris","memo":"","#,
                r#""msgs":[{"inputs":[{"address":"bnb1a","coins":[{"amount":100,"denom":"BNB"}]}],"#,
                r#""outputs":[{"address":"bnb1b","coins":[{"amount":100,"denom":"BNB"}]}]}],"#,
                r#""sequence":"0","source":"1"}"#
            )
        );
    }

    #[test]
    fn test_sign_order() {
        let signer = LocalKeySigner::random();
        let order = order();
        let signed = sign_order(&signer, &order).unwrap();

        assert_eq!(signed.signature.len(), 128);
        assert!(!signed.signature.starts_with("0x"));
        assert_eq!(signed.public_key.len(), 130);
        assert!(signed.public_key.starts_with("04"));

        let key = VerifyingKey::from_sec1_bytes(&hex::decode(&signed.public_key).unwrap()).unwrap();
        let signature = Signature::try_from(hex::decode(&signed.signature).unwrap().as_slice()).unwrap();
        let digest = Hash::sha256(&order.encoded().unwrap());
        assert!(key.verify_prehash(&digest, &signature).is_ok());

        let wire = serde_json::to_value(&signed).unwrap();
        assert!(wire.get("publicKey").is_some());
    }

    #[test]
    fn test_parse_confirmation() {
        let request = handlers::parse(
            BNB_TX_CONFIRMATION,
            &json!([{"ok": false, "errorMsg": "insufficient fund"}]),
        )
        .unwrap();
        assert_eq!(
            request,
            WcRequest::BnbTxConfirmation(BinanceTxConfirmation {
                ok: false,
                error_msg: Some("insufficient fund".to_string())
            })
        );
    }

    #[test]
    fn test_rejects_empty_order() {
        let mut params = order_params();
        params[0]["msgs"] = json!([]);
        assert!(matches!(
            handlers::parse(BNB_SIGN, &params),
            Err(HandlerError::Validation(_))
        ));
    }
}
