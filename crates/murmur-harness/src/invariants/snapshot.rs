//! Copies of client state taken between events.
//!
//! Only what a UI could read through [`SyncClient`]'s public accessors ends
//! up here.

use std::collections::BTreeMap;

use murmur_client::SyncClient;
use murmur_core::Environment;
use murmur_proto::{ConversationId, CorrelationKey, DeliveryStatus, MessageId, Timestamp, UserId};

/// State of every client in the run.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// One entry per client.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// No clients at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Just `client`.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }
}

/// What one client shows.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Local user.
    pub user_id: UserId,
    /// Conversation on screen.
    pub active: Option<ConversationId>,
    /// Open views.
    pub conversations: BTreeMap<ConversationId, ConversationSnapshot>,
    /// Unread counters.
    pub unread: BTreeMap<ConversationId, u32>,
}

impl ClientSnapshot {
    /// Capture a live client.
    pub fn capture<E: Environment>(client: &SyncClient<E>) -> Self {
        let conversations = client
            .open_conversations()
            .filter_map(|id| {
                let timeline = client.timeline(id)?;
                let messages = timeline
                    .messages()
                    .iter()
                    .map(|m| MessageSnapshot {
                        id: m.id.clone(),
                        timestamp: m.timestamp,
                        status: m.status,
                        correlation: m.correlation.clone(),
                    })
                    .collect();
                let snapshot = ConversationSnapshot {
                    messages,
                    loading: client.is_loading(id),
                    has_more: client.has_more(id),
                };
                Some((id, snapshot))
            })
            .collect();

        Self {
            user_id: client.user_id(),
            active: client.active_conversation(),
            conversations,
            unread: client.unread().counts().collect(),
        }
    }
}

/// Snapshot of one open conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationSnapshot {
    /// Timeline entries in display order.
    pub messages: Vec<MessageSnapshot>,
    /// A history fetch is outstanding.
    pub loading: bool,
    /// Older history may exist.
    pub has_more: bool,
}

/// The parts of a timeline entry the invariants look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    /// Message id.
    pub id: MessageId,
    /// Ordering timestamp.
    pub timestamp: Timestamp,
    /// Delivery state.
    pub status: DeliveryStatus,
    /// Send nonce, if any.
    pub correlation: Option<CorrelationKey>,
}
