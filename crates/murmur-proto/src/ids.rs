//! Identifier newtypes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Conversation (group) identifier assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub u64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identifier assigned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved message identity.
///
/// A message is `Local` between an optimistic send and the server's
/// confirmation, and `Server` from then on. The derived ordering is only used
/// to break timestamp ties deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageId {
    /// Server-assigned id.
    Server(String),
    /// Temporary id assigned by the timeline for a pending send.
    Local(u64),
}

impl MessageId {
    /// Server-assigned id.
    pub fn server(id: impl Into<String>) -> Self {
        Self::Server(id.into())
    }

    /// True until the server has confirmed this message.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => f.write_str(id),
            Self::Local(n) => write!(f, "local-{n}"),
        }
    }
}

/// Client-generated nonce linking a pending send to its server echo.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Wrap an existing nonce.
    pub fn new(nonce: impl Into<String>) -> Self {
        Self(nonce.into())
    }

    /// Build a key from 64 random bits.
    pub fn from_u64(bits: u64) -> Self {
        Self(format!("{bits:016x}"))
    }

    /// Nonce as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Accept ids sent either as JSON strings or as JSON numbers.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(n) => n.to_string(),
    })
}

/// Read an explicit JSON `null` as the type's default.
///
/// `#[serde(default)]` only covers a missing field; servers also send `null`
/// for empty lists and unset kinds.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
