//! Payloads of the history and send endpoints.

use serde::{Deserialize, Serialize};

use crate::{
    Attachment, ConversationId, CorrelationKey, DeliveryStatus, Message, MessageId, MessageKind,
    Timestamp, UserId,
    errors::{ProtocolError, Result},
    ids::{null_as_default, string_or_number},
};

/// One page of `GET /messages/group/{id}?page=&size=`.
///
/// Items arrive newest first. Only `content` is required; the paging metadata
/// is informational since exhaustion is derived from the item count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// Messages on this page, newest first.
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: Vec<WireMessage>,
    /// Total number of pages, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    /// Whether this is the last page, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last: Option<bool>,
}

impl HistoryPage {
    /// Number of items the server returned.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// True if the page has no items.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Validate each item on its own, keeping the server's newest-first order.
    ///
    /// An invalid item yields its error without affecting the others, so the
    /// caller can drop it and still advance past the page.
    pub fn into_messages(self) -> impl Iterator<Item = Result<Message>> {
        self.content.into_iter().map(WireMessage::into_message)
    }
}

/// A message as returned by the history and send endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Server message id.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Conversation id.
    #[serde(alias = "conversationId")]
    pub group_id: ConversationId,
    /// Author id.
    pub sender_id: UserId,
    /// Author display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Message kind.
    #[serde(rename = "type", alias = "messageType", default, deserialize_with = "null_as_default")]
    pub kind: MessageKind,
    /// Attachments.
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Server timestamp.
    #[serde(alias = "sentAt")]
    pub timestamp: Timestamp,
    /// Server delivery status, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Echo of the sender's nonce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_nonce: Option<CorrelationKey>,
}

impl WireMessage {
    /// Validate and convert into an engine [`Message`].
    ///
    /// A message the server still reports as pending is stored as `Sent`:
    /// once the server has it, it is no longer a local optimistic entry.
    ///
    /// # Errors
    ///
    /// `InvalidField` if the id is empty.
    pub fn into_message(self) -> Result<Message> {
        if self.id.trim().is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "id",
                reason: "must not be empty".to_string(),
            });
        }

        let status = match DeliveryStatus::from_wire(self.status.as_deref()) {
            DeliveryStatus::Pending => DeliveryStatus::Sent,
            other => other,
        };

        Ok(Message {
            id: MessageId::Server(self.id),
            conversation_id: self.group_id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            content: self.content,
            kind: self.kind,
            attachments: self.attachments,
            timestamp: self.timestamp,
            status,
            correlation: self.client_nonce,
        })
    }

    /// Build the wire form of a confirmed message.
    ///
    /// # Errors
    ///
    /// `InvalidField` if the message still has a local id.
    pub fn from_message(message: &Message) -> Result<Self> {
        let MessageId::Server(id) = &message.id else {
            return Err(ProtocolError::InvalidField {
                field: "id",
                reason: format!("{} is not server-assigned", message.id),
            });
        };

        Ok(Self {
            id: id.clone(),
            group_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_name: message.sender_name.clone(),
            content: message.content.clone(),
            kind: message.kind,
            attachments: message.attachments.clone(),
            timestamp: message.timestamp,
            status: None,
            client_nonce: message.correlation.clone(),
        })
    }
}

/// Body of `POST /messages/group/{id}/text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTextRequest {
    /// Text to send.
    pub content: String,
    /// Nonce echoed back on the resulting message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_nonce: Option<CorrelationKey>,
}
