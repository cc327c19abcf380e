//! Client errors.

use murmur_core::ConnectionError;
use murmur_proto::{ConversationId, MessageId};
use thiserror::Error;

/// Errors returned from [`SyncClient::handle`](crate::SyncClient::handle).
///
/// These are caller mistakes. Network failures never surface here: they
/// become [`ClientAction::Error`](crate::ClientAction::Error) or a failed
/// message instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No open view for this conversation.
    #[error("conversation {conversation_id} is not open")]
    UnknownConversation {
        /// Conversation the caller named
        conversation_id: ConversationId,
    },

    /// No message with this id in the conversation's timeline.
    #[error("message {message_id} not found")]
    UnknownMessage {
        /// Message the caller named
        message_id: MessageId,
    },

    /// Only failed local sends can be re-sent.
    #[error("message {message_id} is not a failed send")]
    NotResendable {
        /// Message the caller named
        message_id: MessageId,
    },

    /// Send with neither text nor file content.
    #[error("message is empty")]
    EmptyMessage,

    /// Client could not be configured.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
