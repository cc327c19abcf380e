//! Per-conversation unread counters.
//!
//! Counts are derived purely from `NEW_MESSAGE` events seen by this client.
//! A message counts when someone else sent it to a conversation that is not
//! active. Activating a conversation resets its count to zero.

use std::collections::{HashMap, HashSet, VecDeque};

use murmur_proto::{ConversationId, MessageId, UserId};

/// Message ids remembered per conversation for redelivery detection.
///
/// Replays after a reconnect cover recent messages, so the oldest ids are
/// evicted first.
pub const MAX_SEEN_IDS: usize = 1024;

/// Recently observed ids of one conversation, oldest first.
#[derive(Debug, Clone, Default)]
struct SeenIds {
    order: VecDeque<MessageId>,
    ids: HashSet<MessageId>,
}

impl SeenIds {
    /// Remember `id`. Returns false if it is already remembered.
    fn insert(&mut self, id: &MessageId) -> bool {
        if self.ids.contains(id) {
            return false;
        }

        if self.order.len() >= MAX_SEEN_IDS
            && let Some(oldest) = self.order.pop_front()
        {
            self.ids.remove(&oldest);
        }
        self.order.push_back(id.clone());
        self.ids.insert(id.clone());
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Unread bookkeeping for every conversation.
#[derive(Debug, Clone)]
pub struct UnreadTracker {
    current_user: UserId,
    active: Option<ConversationId>,
    counts: HashMap<ConversationId, u32>,
    /// Recent ids observed since each conversation's last reset, at most
    /// [`MAX_SEEN_IDS`] per conversation.
    seen: HashMap<ConversationId, SeenIds>,
}

impl UnreadTracker {
    /// Tracker for `current_user`, with no active conversation.
    pub fn new(current_user: UserId) -> Self {
        Self { current_user, active: None, counts: HashMap::new(), seen: HashMap::new() }
    }

    /// User whose own messages never count.
    pub fn current_user(&self) -> UserId {
        self.current_user
    }

    /// Conversation currently on screen.
    pub fn active(&self) -> Option<ConversationId> {
        self.active
    }

    /// Unread count; 0 for conversations never seen.
    pub fn count(&self, conversation: ConversationId) -> u32 {
        self.counts.get(&conversation).copied().unwrap_or(0)
    }

    /// Sum over all conversations, saturating.
    pub fn total(&self) -> u32 {
        self.counts.values().fold(0u32, |acc, n| acc.saturating_add(*n))
    }

    /// Non-zero counts.
    pub fn counts(&self) -> impl Iterator<Item = (ConversationId, u32)> + '_ {
        self.counts.iter().filter(|(_, n)| **n > 0).map(|(c, n)| (*c, *n))
    }

    /// Record a new message. Returns true if the count changed.
    ///
    /// An id already observed since the conversation's last reset is not
    /// counted again, so replays after a reconnect do not inflate counts.
    pub fn observe(
        &mut self,
        conversation: ConversationId,
        message_id: &MessageId,
        sender: UserId,
    ) -> bool {
        if sender == self.current_user {
            return false;
        }

        let first_sighting = self.seen.entry(conversation).or_default().insert(message_id);
        if !first_sighting || self.active == Some(conversation) {
            return false;
        }

        let count = self.counts.entry(conversation).or_insert(0);
        let before = *count;
        *count = count.saturating_add(1);
        *count != before
    }

    /// Change the active conversation. Returns true if a count was reset.
    pub fn set_active(&mut self, conversation: Option<ConversationId>) -> bool {
        self.active = conversation;
        conversation.is_some_and(|c| self.reset(c))
    }

    /// Number of ids remembered for `conversation`.
    pub fn remembered(&self, conversation: ConversationId) -> usize {
        self.seen.get(&conversation).map_or(0, SeenIds::len)
    }

    /// Zero the count of `conversation`. Returns true if it was non-zero.
    pub fn reset(&mut self, conversation: ConversationId) -> bool {
        self.seen.remove(&conversation);
        self.counts.remove(&conversation).is_some_and(|n| n > 0)
    }
}
