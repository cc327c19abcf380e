//! Plain-text rendering of client state.

use murmur_core::{ConnectionError, ConnectionState};
use murmur_proto::{ConversationId, DeliveryStatus, Message, MessageKind};

/// One timeline entry: `[HH:MM] sender: body`, plus a marker while it is not
/// yet confirmed.
pub fn message_line(message: &Message) -> String {
    let sender = message
        .sender_name
        .clone()
        .unwrap_or_else(|| format!("user {}", message.sender_id));

    let marker = match message.status {
        DeliveryStatus::Pending => " (sending)",
        DeliveryStatus::Failed => " (failed)",
        DeliveryStatus::Sent | DeliveryStatus::Delivered => "",
    };

    format!("[{}] {sender}: {}{marker}", message.timestamp.clock_time(), body(message))
}

fn body(message: &Message) -> String {
    if message.kind == MessageKind::Text || message.attachments.is_empty() {
        return message.text().to_string();
    }

    let files: Vec<&str> = message.attachments.iter().map(|a| a.filename.as_str()).collect();
    let label = format!("<{}: {}>", kind_name(message.kind), files.join(", "));
    match message.content.as_deref() {
        Some(text) if !text.is_empty() => format!("{text} {label}"),
        _ => label,
    }
}

fn kind_name(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::Video => "video",
        MessageKind::Audio => "audio",
        MessageKind::File => "file",
        MessageKind::Location => "location",
        MessageKind::System => "system",
        MessageKind::Other => "attachment",
    }
}

/// Status line for a connection change.
pub fn connection_line(state: ConnectionState, error: Option<&ConnectionError>) -> String {
    match error {
        Some(error) => format!("-- {state} ({error})"),
        None => format!("-- {state}"),
    }
}

/// Notice for messages arriving in a conversation that is not on screen.
pub fn unread_line(conversation_id: ConversationId, count: u32) -> String {
    format!("-- {count} unread in conversation {conversation_id}")
}

#[cfg(test)]
mod tests {
    use murmur_proto::{Attachment, MessageId, Timestamp, UserId};

    use super::*;

    fn message(kind: MessageKind, content: Option<&str>) -> Message {
        Message {
            id: MessageId::server("m1"),
            conversation_id: ConversationId(1),
            sender_id: UserId(7),
            sender_name: None,
            content: content.map(str::to_string),
            kind,
            attachments: Vec::new(),
            timestamp: Timestamp::from_millis(45 * 60 * 1000),
            status: DeliveryStatus::Delivered,
            correlation: None,
        }
    }

    #[test]
    fn text_message() {
        let mut m = message(MessageKind::Text, Some("hi"));
        assert_eq!(message_line(&m), "[00:45] user 7: hi");

        m.sender_name = Some("ada".to_string());
        m.status = DeliveryStatus::Pending;
        assert_eq!(message_line(&m), "[00:45] ada: hi (sending)");

        m.status = DeliveryStatus::Failed;
        assert_eq!(message_line(&m), "[00:45] ada: hi (failed)");
    }

    #[test]
    fn attachments_are_listed() {
        let mut m = message(MessageKind::Image, None);
        m.attachments.push(Attachment {
            filename: "cat.png".to_string(),
            url: String::new(),
            content_type: None,
            size: None,
        });
        assert_eq!(message_line(&m), "[00:45] user 7: <image: cat.png>");

        m.content = Some("look".to_string());
        assert_eq!(message_line(&m), "[00:45] user 7: look <image: cat.png>");
    }

    #[test]
    fn status_lines() {
        assert_eq!(unread_line(ConversationId(3), 2), "-- 2 unread in conversation 3");
        assert!(connection_line(ConnectionState::Connected, None).starts_with("-- "));
    }
}
