//! Envelope
//!
//! The JSON unit exchanged between clients through the hub:
//!
//! ```json
//! {"type":"private_message","from_user_id":1,"to_user_id":2,"content":"hi","timestamp":"..."}
//! ```
//!
//! Decoding is lenient the same way the storefront's other JSON surfaces are:
//! missing fields take their defaults and unknown fields are ignored. Only
//! input that is not an object of this shape is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EnvelopeError;

const PRIVATE_MESSAGE: &str = "private_message";

/// Storefront user id, as asserted by the authenticating layer.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user-{}", self.0)
    }
}

/// Envelope purpose. Clients may send any tag; only `private_message` is routed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeKind {
    PrivateMessage,
    Other(String),
}

impl Default for EnvelopeKind {
    fn default() -> Self {
        EnvelopeKind::Other(String::new())
    }
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &str {
        match self {
            EnvelopeKind::PrivateMessage => PRIVATE_MESSAGE,
            EnvelopeKind::Other(tag) => tag,
        }
    }
}

impl From<String> for EnvelopeKind {
    fn from(tag: String) -> Self {
        if tag == PRIVATE_MESSAGE {
            EnvelopeKind::PrivateMessage
        } else {
            EnvelopeKind::Other(tag)
        }
    }
}

impl From<EnvelopeKind> for String {
    fn from(kind: EnvelopeKind) -> Self {
        match kind {
            EnvelopeKind::PrivateMessage => PRIVATE_MESSAGE.to_string(),
            EnvelopeKind::Other(tag) => tag,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub content: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    /// Build a `private_message` stamped with the current time (RFC 3339).
    pub fn private_message(from: UserId, to: UserId, content: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::PrivateMessage,
            from_user_id: from,
            to_user_id: to,
            content: content.into(),
            timestamp: now_rfc3339(),
            data: None,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(EnvelopeError::Decode)
    }

    pub fn encode(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Encode)
    }

    /// Replace whatever sender the wire claimed with the connection's own identity.
    pub fn with_sender(mut self, sender: UserId) -> Self {
        self.from_user_id = sender;
        self
    }

    /// Fill in the receive time when the client left the timestamp empty.
    pub(crate) fn stamped(mut self) -> Self {
        if self.timestamp.is_empty() {
            self.timestamp = now_rfc3339();
        }
        self
    }

    pub fn is_private_message(&self) -> bool {
        self.kind == EnvelopeKind::PrivateMessage
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
