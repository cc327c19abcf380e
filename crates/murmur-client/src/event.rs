//! Client events and actions.

use murmur_core::{
    CloseEvent, ConnectionError, ConnectionState, FetchedPage, HistoryError, PageRequest, SendError,
};
use murmur_proto::{ConversationId, CorrelationKey, Frame, Message, MessageId, MessageKind};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Reporting channel open/close/error and inbound text
/// - Completing history fetches and sends it was asked to perform
/// - Driving time forward via ticks
/// - Forwarding user intents (switch conversation, send, load more)
///
/// Generic over `I` (Instant type) to support both production and
/// simulation environments.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// User wants the push channel up.
    Connect {
        /// Credential appended to the channel URL.
        token: String,
    },

    /// User wants the push channel down. Stops reconnection.
    Disconnect,

    /// Transport finished the channel handshake.
    ChannelOpened,

    /// Transport reported the channel closed.
    ChannelClosed(CloseEvent),

    /// Transport reported an error on the channel.
    ChannelError {
        /// Error description.
        reason: String,
    },

    /// Server refused the handshake (HTTP 401/403).
    ChannelRejected {
        /// Status or reason text.
        reason: String,
    },

    /// Text frame received on the channel.
    TextReceived(String),

    /// Time tick for keepalive and reconnect timers.
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// Show `conversation_id`, replacing the active conversation.
    SetActiveConversation {
        /// Conversation to show.
        conversation_id: ConversationId,
    },

    /// Open a background view without changing the active conversation.
    OpenConversation {
        /// Conversation to open.
        conversation_id: ConversationId,
    },

    /// Tear down the view of `conversation_id`.
    CloseConversation {
        /// Conversation to close.
        conversation_id: ConversationId,
    },

    /// Fetch the next older history page.
    LoadNextPage {
        /// Conversation to page.
        conversation_id: ConversationId,
    },

    /// A [`ClientAction::FetchHistory`] completed.
    HistoryLoaded {
        /// The request as issued.
        request: PageRequest,
        /// Page items in server order (newest first), or the failure.
        result: Result<FetchedPage, HistoryError>,
    },

    /// Send a text message.
    SendText {
        /// Target conversation.
        conversation_id: ConversationId,
        /// Message text.
        content: String,
    },

    /// Send a file as an attachment message.
    SendFile {
        /// Target conversation.
        conversation_id: ConversationId,
        /// File to upload.
        file: FileUpload,
    },

    /// Re-submit a failed send.
    Resend {
        /// Conversation holding the failed message.
        conversation_id: ConversationId,
        /// Local id of the failed message.
        message_id: MessageId,
    },

    /// A [`ClientAction::SubmitMessage`] completed.
    SendCompleted {
        /// Conversation the message was sent to.
        conversation_id: ConversationId,
        /// Correlation key of the submission.
        correlation: CorrelationKey,
        /// The server's copy of the message, or the failure.
        result: Result<Message, SendError>,
    },
}

/// A file to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// File name shown to recipients.
    pub filename: String,
    /// MIME type, if known.
    pub content_type: Option<String>,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// Message kind implied by the MIME type.
    pub fn kind(&self) -> MessageKind {
        match self.content_type.as_deref().and_then(|ct| ct.split('/').next()) {
            Some("image") => MessageKind::Image,
            Some("video") => MessageKind::Video,
            Some("audio") => MessageKind::Audio,
            _ => MessageKind::File,
        }
    }
}

/// Content of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingBody {
    /// Text message.
    Text(String),
    /// Attachment message.
    File(FileUpload),
}

/// A message for the driver to deliver through the send endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Nonce to echo back; also identifies the completion.
    pub correlation: CorrelationKey,
    /// What to send.
    pub body: OutgoingBody,
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Open the push channel to this URL.
    OpenChannel {
        /// Full channel URL, credential included.
        url: String,
    },

    /// Write a frame to the open channel.
    SendFrame(Frame),

    /// Close the current channel.
    CloseChannel {
        /// Reason for closing.
        reason: String,
    },

    /// Fetch a history page, then report [`ClientEvent::HistoryLoaded`].
    FetchHistory(PageRequest),

    /// Deliver a message, then report [`ClientEvent::SendCompleted`].
    SubmitMessage(Submission),

    /// A conversation timeline changed; re-read it.
    TimelineChanged {
        /// Conversation whose timeline changed.
        conversation_id: ConversationId,
    },

    /// An unread count changed.
    UnreadChanged {
        /// Conversation whose count changed.
        conversation_id: ConversationId,
        /// New count.
        count: u32,
    },

    /// Connection state changed.
    ConnectionChanged {
        /// New state.
        state: ConnectionState,
        /// Most recent failure, if any.
        error: Option<ConnectionError>,
    },

    /// Something failed that the user should know about.
    Error {
        /// Conversation concerned, if any.
        conversation_id: Option<ConversationId>,
        /// Description.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(content_type: Option<&str>) -> FileUpload {
        FileUpload {
            filename: "f".to_string(),
            content_type: content_type.map(str::to_string),
            bytes: Vec::new(),
        }
    }

    #[test]
    fn kind_follows_mime_type() {
        assert_eq!(upload(Some("image/png")).kind(), MessageKind::Image);
        assert_eq!(upload(Some("video/mp4")).kind(), MessageKind::Video);
        assert_eq!(upload(Some("audio/ogg")).kind(), MessageKind::Audio);
        assert_eq!(upload(Some("application/pdf")).kind(), MessageKind::File);
        assert_eq!(upload(None).kind(), MessageKind::File);
    }
}
