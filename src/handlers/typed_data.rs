//! EIP-712 typed structured data hashing
//!
//! The digest signed for `eth_signTypedData` is
//! `keccak256(0x19 || 0x01 || domainSeparator || hashStruct(message))` where
//! `hashStruct(s) = keccak256(typeHash || encodeData(s))`.
//!
//! Integers are range checked against their declared width and may arrive as
//! JSON numbers, decimal strings or `0x` hex strings.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::{BigInt, Sign};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{HandlerError, HandlerResult};
use crate::crypto::hash::{HashOutput, HASH_SIZE};
use crate::crypto::Hash;

/// Name of the domain struct every document must declare
pub const DOMAIN_TYPE: &str = "EIP712Domain";

const DIGEST_PREFIX: [u8; 2] = [0x19, 0x01];

/// One member of a struct type
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedField {
    /// Member name
    pub name: String,
    /// Solidity type of the member
    #[serde(rename = "type")]
    pub kind: String,
}

/// An `eth_signTypedData` document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedData {
    /// Struct definitions by name
    pub types: BTreeMap<String, Vec<TypedField>>,
    /// Struct type of `message`
    pub primary_type: String,
    /// Domain values, typed by `EIP712Domain`
    #[serde(default)]
    pub domain: Value,
    /// The message itself
    #[serde(default)]
    pub message: Value,
}

fn invalid(msg: impl Into<String>) -> HandlerError {
    HandlerError::Validation(format!("typed data: {}", msg.into()))
}

impl TypedData {
    /// Parse and sanity check a JSON document
    pub fn from_json(raw: &str) -> HandlerResult<Self> {
        let doc: TypedData = serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        if !doc.types.contains_key(DOMAIN_TYPE) {
            return Err(invalid(format!("missing {DOMAIN_TYPE} type")));
        }
        if !doc.types.contains_key(&doc.primary_type) {
            return Err(invalid(format!(
                "primary type {} is not defined",
                doc.primary_type
            )));
        }
        Ok(doc)
    }

    fn fields(&self, name: &str) -> HandlerResult<&[TypedField]> {
        self.types
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| invalid(format!("undefined type {name}")))
    }

    fn collect_dependencies(&self, name: &str, found: &mut BTreeSet<String>) -> HandlerResult<()> {
        for field in self.fields(name)? {
            let base = base_type(&field.kind);
            if self.types.contains_key(base) && found.insert(base.to_string()) {
                self.collect_dependencies(base, found)?;
            }
        }
        Ok(())
    }

    /// `encodeType`: the struct signature followed by its referenced structs
    /// in alphabetical order
    pub fn encode_type(&self, name: &str) -> HandlerResult<String> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(name, &mut deps)?;
        deps.remove(name);

        let mut out = String::new();
        for ty in std::iter::once(name).chain(deps.iter().map(String::as_str)) {
            let members: Vec<String> = self
                .fields(ty)?
                .iter()
                .map(|f| format!("{} {}", f.kind, f.name))
                .collect();
            out.push_str(&format!("{ty}({})", members.join(",")));
        }
        Ok(out)
    }

    /// `typeHash`
    pub fn type_hash(&self, name: &str) -> HandlerResult<HashOutput> {
        Ok(Hash::keccak256(self.encode_type(name)?.as_bytes()))
    }

    /// `hashStruct` of `data` as an instance of struct `name`
    pub fn hash_struct(&self, name: &str, data: &Value) -> HandlerResult<HashOutput> {
        let object = data
            .as_object()
            .ok_or_else(|| invalid(format!("{name} value must be an object")))?;
        let fields = self.fields(name)?;

        let mut encoded = Vec::with_capacity(HASH_SIZE * (fields.len() + 1));
        encoded.extend_from_slice(&self.type_hash(name)?);
        for field in fields {
            let value = object.get(&field.name).unwrap_or(&Value::Null);
            let word = self
                .encode_value(&field.kind, value)
                .map_err(|e| invalid(format!("{name}.{}: {e}", field.name)))?;
            encoded.extend_from_slice(&word);
        }
        Ok(Hash::keccak256(&encoded))
    }

    /// `hashStruct(domain)`
    pub fn domain_separator(&self) -> HandlerResult<HashOutput> {
        self.hash_struct(DOMAIN_TYPE, &self.domain)
    }

    /// The digest handed to the signer
    pub fn signing_digest(&self) -> HandlerResult<HashOutput> {
        let domain = self.domain_separator()?;
        if self.primary_type == DOMAIN_TYPE {
            return Ok(Hash::keccak256_parts(&[DIGEST_PREFIX.as_slice(), domain.as_slice()]));
        }
        let message = self.hash_struct(&self.primary_type, &self.message)?;
        Ok(Hash::keccak256_parts(&[
            DIGEST_PREFIX.as_slice(),
            domain.as_slice(),
            message.as_slice(),
        ]))
    }

    fn encode_value(&self, kind: &str, value: &Value) -> Result<HashOutput, String> {
        if let Some(element) = array_element(kind) {
            let items = value.as_array().ok_or("expected an array")?;
            let mut encoded = Vec::with_capacity(HASH_SIZE * items.len());
            for item in items {
                encoded.extend_from_slice(&self.encode_value(element, item)?);
            }
            return Ok(Hash::keccak256(&encoded));
        }

        if self.types.contains_key(kind) {
            if value.is_null() {
                return Ok([0u8; HASH_SIZE]);
            }
            return self.hash_struct(kind, value).map_err(|e| e.to_string());
        }

        if value.is_null() {
            return Err("missing value".to_string());
        }

        match kind {
            "string" => {
                let s = value.as_str().ok_or("expected a string")?;
                Ok(Hash::keccak256(s.as_bytes()))
            }
            "bytes" => Ok(Hash::keccak256(&decode_hex(value)?)),
            "bool" => {
                let b = value.as_bool().ok_or("expected a bool")?;
                let mut word = [0u8; HASH_SIZE];
                word[HASH_SIZE - 1] = b as u8;
                Ok(word)
            }
            "address" => {
                let bytes = decode_hex(value)?;
                if bytes.len() != 20 {
                    return Err(format!("address must be 20 bytes, got {}", bytes.len()));
                }
                let mut word = [0u8; HASH_SIZE];
                word[12..].copy_from_slice(&bytes);
                Ok(word)
            }
            k if k.starts_with("uint") => {
                let width = integer_width(&k[4..])?;
                let n = parse_integer(value)?;
                let (sign, magnitude) = n.to_bytes_be();
                if sign == Sign::Minus || magnitude.len() > width / 8 {
                    return Err(format!("{n} does not fit {k}"));
                }
                Ok(left_pad(&magnitude, 0x00))
            }
            k if k.starts_with("int") => {
                let width = integer_width(&k[3..])?;
                let n = parse_integer(value)?;
                let bytes = n.to_signed_bytes_be();
                if bytes.len() > width / 8 {
                    return Err(format!("{n} does not fit {k}"));
                }
                let fill = if n.sign() == Sign::Minus { 0xff } else { 0x00 };
                Ok(left_pad(&bytes, fill))
            }
            k if k.starts_with("bytes") => {
                let size: usize = k[5..].parse().map_err(|_| format!("unknown type {k}"))?;
                if !(1..=HASH_SIZE).contains(&size) {
                    return Err(format!("unknown type {k}"));
                }
                let bytes = decode_hex(value)?;
                if bytes.len() > size {
                    return Err(format!("{} bytes do not fit {k}", bytes.len()));
                }
                let mut word = [0u8; HASH_SIZE];
                word[..bytes.len()].copy_from_slice(&bytes);
                Ok(word)
            }
            other => Err(format!("unknown type {other}")),
        }
    }
}

/// `Person[]` / `uint256[3]` -> element type
fn array_element(kind: &str) -> Option<&str> {
    if !kind.ends_with(']') {
        return None;
    }
    kind.rfind('[').map(|pos| &kind[..pos])
}

/// Struct name with any array suffixes removed
fn base_type(kind: &str) -> &str {
    kind.split('[').next().unwrap_or(kind)
}

fn integer_width(suffix: &str) -> Result<usize, String> {
    if suffix.is_empty() {
        return Ok(256);
    }
    match suffix.parse::<usize>() {
        Ok(bits) if bits % 8 == 0 && (8..=256).contains(&bits) => Ok(bits),
        _ => Err(format!("invalid integer width {suffix}")),
    }
}

fn parse_integer(value: &Value) -> Result<BigInt, String> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(BigInt::from(u))
            } else if let Some(i) = n.as_i64() {
                Ok(BigInt::from(i))
            } else {
                Err(format!("{n} is not an integer"))
            }
        }
        Value::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(digits) => BigInt::parse_bytes(digits.as_bytes(), 16),
                None => BigInt::parse_bytes(s.as_bytes(), 10),
            };
            parsed.ok_or_else(|| format!("{s:?} is not an integer"))
        }
        other => Err(format!("expected an integer, got {other}")),
    }
}

fn decode_hex(value: &Value) -> Result<Vec<u8>, String> {
    let s = value.as_str().ok_or("expected a hex string")?;
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| format!("invalid hex {s:?}: {e}"))
}

fn left_pad(bytes: &[u8], fill: u8) -> HashOutput {
    let mut word = [fill; HASH_SIZE];
    word[HASH_SIZE - bytes.len()..].copy_from_slice(bytes);
    word
}
