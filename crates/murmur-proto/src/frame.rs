//! Push-channel frames.
//!
//! Every frame is a JSON object with a `type` discriminator. The set of frame
//! types is closed: anything else is rejected by [`Frame::decode`] before it
//! can reach a listener.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    Attachment, ConversationId, CorrelationKey, DeliveryStatus, Message, MessageId, MessageKind,
    Timestamp, UserId,
    errors::{ProtocolError, Result},
    ids::{null_as_default, string_or_number},
};

/// Largest inbound text frame accepted (1 MiB).
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Discriminator of a [`Frame`], used for topic routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Keepalive request.
    Ping,
    /// Keepalive reply.
    Pong,
    /// A message was posted to a conversation.
    NewMessage,
}

impl FrameKind {
    /// Wire discriminator.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::NewMessage => "NEW_MESSAGE",
        }
    }

    fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "PING" => Some(Self::Ping),
            "PONG" => Some(Self::Pong),
            "NEW_MESSAGE" => Some(Self::NewMessage),
            _ => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated push-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Keepalive request.
    Ping,
    /// Keepalive reply.
    Pong,
    /// A message was posted to a conversation.
    NewMessage {
        /// Conversation the message was posted to.
        conversation_id: ConversationId,
        /// The message, always [`DeliveryStatus::Delivered`].
        message: Message,
    },
}

impl Frame {
    /// Wrap a server message in a `NEW_MESSAGE` frame.
    pub fn new_message(message: Message) -> Self {
        Self::NewMessage { conversation_id: message.conversation_id, message }
    }

    /// Discriminator of this frame.
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Ping => FrameKind::Ping,
            Self::Pong => FrameKind::Pong,
            Self::NewMessage { .. } => FrameKind::NewMessage,
        }
    }

    /// Conversation this frame concerns, if any.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::NewMessage { conversation_id, .. } => Some(*conversation_id),
            Self::Ping | Self::Pong => None,
        }
    }

    /// Decode and validate a text frame.
    ///
    /// # Errors
    ///
    /// - `TooLarge` if `text` exceeds [`MAX_FRAME_LEN`]
    /// - `Malformed` if it is not a JSON object of the expected shape
    /// - `MissingType` / `UnknownType` for a bad discriminator
    /// - `InvalidField` for empty ids
    pub fn decode(text: &str) -> Result<Self> {
        if text.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::TooLarge { size: text.len(), max: MAX_FRAME_LEN });
        }

        let value: serde_json::Value = serde_json::from_str(text)?;
        let tag = value
            .as_object()
            .ok_or_else(|| ProtocolError::Malformed("frame is not a JSON object".to_string()))?
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingType)?;

        if FrameKind::from_wire(tag).is_none() {
            return Err(ProtocolError::UnknownType(tag.to_string()));
        }

        match WireFrame::deserialize(value)? {
            WireFrame::Ping => Ok(Self::Ping),
            WireFrame::Pong => Ok(Self::Pong),
            WireFrame::NewMessage(payload) => {
                let message = payload.into_message()?;
                Ok(Self::new_message(message))
            },
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// `InvalidField` if a `NEW_MESSAGE` carries an unconfirmed local id.
    pub fn encode(&self) -> Result<String> {
        let wire = match self {
            Self::Ping => WireFrame::Ping,
            Self::Pong => WireFrame::Pong,
            Self::NewMessage { message, .. } => {
                WireFrame::NewMessage(NewMessagePayload::from_message(message)?)
            },
        };
        Ok(serde_json::to_string(&wire)?)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum WireFrame {
    Ping,
    Pong,
    NewMessage(NewMessagePayload),
}

/// Body of a `NEW_MESSAGE` frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    /// Conversation id.
    pub group_id: ConversationId,
    /// Server message id; numbers are accepted and kept as text.
    #[serde(deserialize_with = "string_or_number")]
    pub message_id: String,
    /// Author id.
    pub sender_id: UserId,
    /// Author display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Message kind; defaults to text.
    #[serde(default, deserialize_with = "null_as_default")]
    pub message_type: MessageKind,
    /// Attachments.
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Server timestamp.
    pub timestamp: Timestamp,
    /// Echo of the sender's nonce, present only on the sender's own messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_nonce: Option<CorrelationKey>,
}

impl NewMessagePayload {
    /// Validate and convert into an engine [`Message`].
    ///
    /// # Errors
    ///
    /// `InvalidField` if `messageId` is empty.
    pub fn into_message(self) -> Result<Message> {
        if self.message_id.trim().is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "messageId",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(Message {
            id: MessageId::Server(self.message_id),
            conversation_id: self.group_id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            content: self.content,
            kind: self.message_type,
            attachments: self.attachments,
            timestamp: self.timestamp,
            status: DeliveryStatus::Delivered,
            correlation: self.client_nonce,
        })
    }

    /// Build the wire payload for a confirmed message.
    ///
    /// # Errors
    ///
    /// `InvalidField` if the message still has a local id.
    pub fn from_message(message: &Message) -> Result<Self> {
        let MessageId::Server(id) = &message.id else {
            return Err(ProtocolError::InvalidField {
                field: "messageId",
                reason: format!("{} is not server-assigned", message.id),
            });
        };

        Ok(Self {
            group_id: message.conversation_id,
            message_id: id.clone(),
            sender_id: message.sender_id,
            sender_name: message.sender_name.clone(),
            content: message.content.clone(),
            message_type: message.kind,
            attachments: message.attachments.clone(),
            timestamp: message.timestamp,
            client_nonce: message.correlation.clone(),
        })
    }
}
