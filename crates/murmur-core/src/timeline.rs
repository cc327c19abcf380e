//! Ordered, deduplicated message store for one conversation.
//!
//! Messages arrive from the push channel, from history pages, and from local
//! optimistic sends, in any order. The timeline keeps exactly one entry per
//! message, sorted by `(timestamp, id)`, and reconciles a pending send with
//! its server echo through the correlation key.
//!
//! # Invariants
//!
//! - Entries are unique by id and non-decreasing by `(timestamp, id)`.
//! - A `Delivered` or `Failed` entry is never modified.
//! - A correlation key refers to at most one entry.

use std::collections::HashMap;

use murmur_proto::{
    Attachment, ConversationId, CorrelationKey, DeliveryStatus, Message, MessageId, MessageKind,
    Timestamp, UserId,
};

/// Result of [`MessageTimeline::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New entry
    Inserted,
    /// An existing entry was superseded
    Replaced,
    /// Duplicate or stale; nothing changed
    Ignored,
}

impl AppendOutcome {
    /// Whether the timeline changed.
    pub fn changed(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Aggregate result of merging a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// New entries
    pub inserted: usize,
    /// Superseded entries
    pub replaced: usize,
    /// Duplicates
    pub ignored: usize,
}

impl MergeSummary {
    /// Whether the batch changed the timeline.
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }

    fn record(&mut self, outcome: AppendOutcome) {
        match outcome {
            AppendOutcome::Inserted => self.inserted += 1,
            AppendOutcome::Replaced => self.replaced += 1,
            AppendOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Content of an optimistic send, before it has an id or status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    /// Author (the local user)
    pub sender_id: UserId,
    /// Text body
    pub content: Option<String>,
    /// Message kind
    pub kind: MessageKind,
    /// Attachments, with empty URLs until uploaded
    pub attachments: Vec<Attachment>,
    /// Local wall-clock time of the send
    pub timestamp: Timestamp,
}

impl Draft {
    /// Plain text draft.
    pub fn text(sender_id: UserId, content: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            sender_id,
            content: Some(content.into()),
            kind: MessageKind::Text,
            attachments: Vec::new(),
            timestamp,
        }
    }
}

/// Per-conversation message timeline.
#[derive(Debug, Clone)]
pub struct MessageTimeline {
    conversation_id: ConversationId,
    entries: Vec<Message>,
    /// Timestamp of every stored id, to locate entries by binary search.
    index: HashMap<MessageId, Timestamp>,
    /// Correlation key of each local send to the id currently holding it.
    correlations: HashMap<CorrelationKey, MessageId>,
    next_local: u64,
}

impl MessageTimeline {
    /// Empty timeline for `conversation_id`.
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            entries: Vec::new(),
            index: HashMap::new(),
            correlations: HashMap::new(),
            next_local: 1,
        }
    }

    /// Conversation this timeline belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Entries in display order.
    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by id.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position(id).map(|pos| &self.entries[pos])
    }

    /// Entry currently holding `correlation`.
    pub fn find_by_correlation(&self, correlation: &CorrelationKey) -> Option<&Message> {
        self.correlations.get(correlation).and_then(|id| self.get(id))
    }

    /// Number of entries still awaiting confirmation.
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|m| m.is_pending()).count()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.correlations.clear();
    }

    /// Insert or reconcile one message.
    ///
    /// A message matching an existing entry by id, or by correlation key with
    /// a local entry, replaces it only if its status supersedes the stored
    /// one. Otherwise it is inserted at its sorted position.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if message.conversation_id != self.conversation_id {
            tracing::debug!(
                expected = %self.conversation_id,
                got = %message.conversation_id,
                id = %message.id,
                "message for another conversation ignored"
            );
            return AppendOutcome::Ignored;
        }

        if let Some(existing) = self.get(&message.id) {
            if !existing.status.superseded_by(message.status) {
                return AppendOutcome::Ignored;
            }
            let id = message.id.clone();
            self.remove(&id);
            self.track_correlation(&message);
            self.insert(message);
            return AppendOutcome::Replaced;
        }

        let local = message
            .correlation
            .as_ref()
            .and_then(|key| self.correlations.get(key))
            .filter(|id| id.is_local())
            .cloned();

        if let Some(local_id) = local {
            let superseded =
                self.get(&local_id).is_some_and(|entry| entry.status.superseded_by(message.status));

            if superseded {
                self.remove(&local_id);
                self.track_correlation(&message);
                self.insert(message);
                return AppendOutcome::Replaced;
            }

            // The local entry already failed: keep it, and store the server
            // copy on its own without stealing the correlation.
            tracing::debug!(%local_id, id = %message.id, "echo for a finalized local entry");
        }

        self.insert(message);
        AppendOutcome::Inserted
    }

    /// Insert an optimistic `Pending` entry and return its local id.
    pub fn append_local_pending(&mut self, draft: Draft, correlation: CorrelationKey) -> MessageId {
        let id = MessageId::Local(self.next_local);
        self.next_local += 1;

        let message = Message {
            id: id.clone(),
            conversation_id: self.conversation_id,
            sender_id: draft.sender_id,
            sender_name: None,
            content: draft.content,
            kind: draft.kind,
            attachments: draft.attachments,
            timestamp: draft.timestamp,
            status: DeliveryStatus::Pending,
            correlation: Some(correlation.clone()),
        };

        self.correlations.insert(correlation, id.clone());
        self.insert(message);
        id
    }

    /// Reconcile the server's echo of the send tagged `correlation`.
    ///
    /// Leaves exactly one entry for the message, whichever of the push echo
    /// and the send response arrives first.
    pub fn confirm(&mut self, correlation: &CorrelationKey, mut echo: Message) -> AppendOutcome {
        echo.correlation = Some(correlation.clone());

        let pending = self
            .correlations
            .get(correlation)
            .filter(|id| id.is_local())
            .filter(|id| self.get(id).is_some_and(Message::is_pending))
            .cloned();

        if let Some(local_id) = pending
            && self.index.contains_key(&echo.id)
        {
            // The echo already landed without its nonce: drop the placeholder.
            self.remove(&local_id);
            self.correlations.insert(correlation.clone(), echo.id.clone());
            self.append(echo);
            return AppendOutcome::Replaced;
        }

        self.append(echo)
    }

    /// Mark the pending send tagged `correlation` as failed.
    ///
    /// Returns false if there is no pending entry for it.
    pub fn fail(&mut self, correlation: &CorrelationKey) -> bool {
        let Some(pos) = self.correlations.get(correlation).and_then(|id| self.position(id)) else {
            return false;
        };

        let entry = &mut self.entries[pos];
        if !entry.status.superseded_by(DeliveryStatus::Failed) || !entry.id.is_local() {
            return false;
        }

        entry.status = DeliveryStatus::Failed;
        true
    }

    /// Remove a failed local entry so it can be re-sent.
    pub fn take_failed(&mut self, id: &MessageId) -> Option<Message> {
        let entry = self.get(id)?;
        if !id.is_local() || entry.status != DeliveryStatus::Failed {
            return None;
        }

        let message = self.remove(id)?;
        if let Some(key) = &message.correlation {
            self.correlations.remove(key);
        }
        Some(message)
    }

    /// Merge a batch (one history page) in one pass.
    pub fn merge_history_page<M>(&mut self, messages: M) -> MergeSummary
    where
        M: IntoIterator<Item = Message>,
    {
        let mut summary = MergeSummary::default();
        for message in messages {
            summary.record(self.append(message));
        }
        summary
    }

    fn track_correlation(&mut self, message: &Message) {
        if let Some(key) = &message.correlation
            && self.correlations.contains_key(key)
        {
            self.correlations.insert(key.clone(), message.id.clone());
        }
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        let timestamp = *self.index.get(id)?;
        self.entries.binary_search_by(|entry| entry.sort_key().cmp(&(timestamp, id))).ok()
    }

    fn insert(&mut self, message: Message) {
        let pos = self.entries.partition_point(|entry| entry.sort_key() < message.sort_key());
        self.index.insert(message.id.clone(), message.timestamp);
        self.entries.insert(pos, message);
    }

    fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let pos = self.position(id)?;
        self.index.remove(id);
        Some(self.entries.remove(pos))
    }
}
