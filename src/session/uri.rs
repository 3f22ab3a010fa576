//! Pairing URI codec
//!
//! `wc:<topic>@<version>?bridge=<percent-encoded url>&key=<hex key>`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::crypto::SymmetricKey;
use crate::error::{InteractorError, Result};

/// Scheme emitted when serializing a descriptor
pub const URI_SCHEME: &str = "wc";

/// Protocol version emitted by [`SessionDescriptor::generate`]
pub const PROTOCOL_VERSION: u32 = 1;

/// Everything a wallet needs to join a pairing: topic, bridge and key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Handshake topic, unique per pairing attempt
    pub topic: String,
    /// Protocol version
    pub version: u32,
    /// Bridge server address
    pub relay_url: String,
    /// Shared symmetric key
    pub key: SymmetricKey,
}

impl SessionDescriptor {
    /// A fresh descriptor with a random topic and key
    pub fn generate(relay_url: impl Into<String>) -> Self {
        SessionDescriptor {
            topic: uuid::Uuid::new_v4().to_string(),
            version: PROTOCOL_VERSION,
            relay_url: relay_url.into(),
            key: SymmetricKey::generate(),
        }
    }

    /// Parse a pairing URI.
    ///
    /// Any scheme is accepted; the bridge address is percent-decoded. The
    /// topic is limited to unreserved characters (ASCII alphanumerics and
    /// `-._~`), so every parsed descriptor serializes back unchanged.
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let (scheme, rest) = uri
            .split_once(':')
            .ok_or_else(|| malformed("missing scheme"))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed("invalid scheme"));
        }

        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| malformed("missing query"))?;
        let (topic, version) = path
            .split_once('@')
            .ok_or_else(|| malformed("missing version"))?;
        if topic.is_empty() {
            return Err(malformed("empty topic"));
        }
        if !topic.chars().all(is_topic_char) {
            return Err(malformed(&format!("invalid topic {topic:?}")));
        }
        let version: u32 = version
            .parse()
            .map_err(|_| malformed(&format!("invalid version {version:?}")))?;

        let mut relay_url = None;
        let mut key = None;
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            match name.as_ref() {
                "bridge" => relay_url = Some(value.into_owned()),
                "key" => key = Some(value.into_owned()),
                _ => {}
            }
        }

        let relay_url = relay_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| malformed("missing bridge"))?;
        let key = key.ok_or_else(|| malformed("missing key"))?;
        let key = SymmetricKey::from_hex(&key).map_err(|e| malformed(&format!("bad key: {e}")))?;

        Ok(SessionDescriptor {
            topic: topic.to_string(),
            version,
            relay_url,
            key,
        })
    }

    /// Serialize to a pairing URI
    pub fn to_uri(&self) -> String {
        let bridge: String = form_urlencoded::byte_serialize(self.relay_url.as_bytes()).collect();
        format!(
            "{}:{}@{}?bridge={}&key={}",
            URI_SCHEME,
            self.topic,
            self.version,
            bridge,
            self.key.to_hex()
        )
    }
}

fn is_topic_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn malformed(reason: &str) -> InteractorError {
    InteractorError::Protocol(format!("malformed pairing uri: {reason}"))
}

impl FromStr for SessionDescriptor {
    type Err = InteractorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SessionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uri())
    }
}
