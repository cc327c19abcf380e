//! Conversation messages as stored by the engine.

use serde::{Deserialize, Serialize};

use crate::{ConversationId, CorrelationKey, MessageId, Timestamp, UserId};

/// What a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Image attachment.
    Image,
    /// Video attachment.
    Video,
    /// Audio attachment.
    Audio,
    /// Generic file attachment.
    File,
    /// Shared location.
    Location,
    /// Server-generated notice.
    System,
    /// Any kind this client does not know about.
    #[serde(other)]
    Other,
}

/// Delivery state of a message.
///
/// Messages are created `Pending` by an optimistic send, or `Delivered` when
/// they come from the server. Only reconciliation moves a message forward, and
/// `Delivered`/`Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Shown optimistically, not yet acknowledged.
    Pending,
    /// Accepted by the server, not yet confirmed as delivered.
    Sent,
    /// Confirmed by the server.
    #[default]
    Delivered,
    /// Send failed; the caller may resend.
    Failed,
}

impl DeliveryStatus {
    /// True for states that never change again.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Whether an entry in state `self` may be replaced by one in `incoming`.
    ///
    /// Final states are never replaced. A pending entry yields to any server
    /// state, and `Sent` yields to a final state.
    pub fn superseded_by(self, incoming: Self) -> bool {
        match self {
            Self::Pending => incoming != Self::Pending,
            Self::Sent => incoming.is_final(),
            Self::Delivered | Self::Failed => false,
        }
    }

    /// Map a server status string, treating anything unknown as delivered.
    pub fn from_wire(status: Option<&str>) -> Self {
        match status.map(str::to_ascii_uppercase).as_deref() {
            Some("PENDING") => Self::Pending,
            Some("SENT") => Self::Sent,
            Some("FAILED") => Self::Failed,
            _ => Self::Delivered,
        }
    }
}

/// File attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Original file name.
    #[serde(alias = "fileName")]
    pub filename: String,
    /// Download URL. Empty while the upload is still pending.
    #[serde(default)]
    pub url: String,
    /// MIME type, if the server reported one.
    #[serde(default, alias = "fileType", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Size in bytes, if the server reported one.
    #[serde(default, alias = "fileSize", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A message in a conversation timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Resolved identity.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender_id: UserId,
    /// Author display name, when the server includes it.
    pub sender_name: Option<String>,
    /// Text body.
    pub content: Option<String>,
    /// Message kind.
    pub kind: MessageKind,
    /// Attachments in display order.
    pub attachments: Vec<Attachment>,
    /// Server timestamp, or local wall clock for pending sends.
    pub timestamp: Timestamp,
    /// Delivery state.
    pub status: DeliveryStatus,
    /// Nonce of the originating optimistic send, if any.
    pub correlation: Option<CorrelationKey>,
}

impl Message {
    /// Ordering key of the timeline. Ties on timestamp break on id.
    pub fn sort_key(&self) -> (Timestamp, &MessageId) {
        (self.timestamp, &self.id)
    }

    /// Whether this message is still awaiting confirmation.
    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }

    /// Text body, or an empty string.
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}
