//! Sync client state machine.
//!
//! The `SyncClient` owns one push connection, the subscription registry, a
//! view per open conversation, and the unread tracker. It turns
//! [`ClientEvent`]s into [`ClientAction`]s and never performs I/O itself.

use std::collections::{BTreeMap, HashMap, btree_map::Entry};

use murmur_core::{
    ConnectionAction, ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState,
    Draft, Environment, FetchedPage, HistoryError, HistoryPager, Mailbox, MessageTimeline,
    PageOutcome, PageRequest, SendError, SubscriptionId, SubscriptionRegistry, Topic, UnreadTracker,
    pager::DEFAULT_PAGE_SIZE,
};
use murmur_proto::{
    Attachment, ConversationId, CorrelationKey, DeliveryStatus, Frame, FrameKind, Message,
    MessageId, Timestamp, UserId,
};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent, FileUpload, OutgoingBody, Submission},
};

/// Channel endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Push-channel URL, without the credential.
    pub endpoint: String,
    /// Messages per history page.
    pub page_size: u32,
    /// Keepalive and reconnect tuning.
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Everything held for one open conversation.
struct ConversationView {
    timeline: MessageTimeline,
    pager: HistoryPager,
    subscription: SubscriptionId,
    mailbox: Mailbox,
    /// Bodies of unconfirmed sends, kept so failed ones can be re-sent.
    outbox: HashMap<CorrelationKey, OutgoingBody>,
    /// A reconnect happened while a page was in flight.
    needs_catch_up: bool,
}

impl ConversationView {
    fn new(
        conversation_id: ConversationId,
        pager: HistoryPager,
        subscription: SubscriptionId,
        mailbox: Mailbox,
    ) -> Self {
        Self {
            timeline: MessageTimeline::new(conversation_id),
            pager,
            subscription,
            mailbox,
            outbox: HashMap::new(),
            needs_catch_up: false,
        }
    }

    /// Apply a live message. Returns true if the timeline changed.
    fn apply_push(&mut self, user_id: UserId, message: Message) -> bool {
        if message.sender_id == user_id
            && let Some(key) = message.correlation.clone()
        {
            self.outbox.remove(&key);
            return self.timeline.confirm(&key, message).changed();
        }

        self.timeline.append(message).changed()
    }

    /// Re-read the newest page, or remember to once the current fetch lands.
    fn catch_up(&mut self) -> Option<PageRequest> {
        let request = self.pager.catch_up();
        self.needs_catch_up = request.is_none();
        request
    }
}

/// Realtime conversation sync client.
///
/// Generic over `E` so tests can drive it with a virtual clock. Not `Send`:
/// the registry is shared through `Rc`, so a client lives on one task.
pub struct SyncClient<E: Environment> {
    env: E,
    user_id: UserId,
    config: ClientConfig,
    connection: ConnectionManager<E::Instant>,
    registry: SubscriptionRegistry,
    views: BTreeMap<ConversationId, ConversationView>,
    /// Next pager generation for conversations whose view was torn down.
    retired: HashMap<ConversationId, u64>,
    active: Option<ConversationId>,
    unread: UnreadTracker,
    unread_mailbox: Mailbox,
    /// At least one channel has opened, so the next open is a reconnect.
    connected_before: bool,
}

impl<E: Environment> SyncClient<E> {
    /// Create a client for `user_id`. Does not connect.
    pub fn new(env: E, user_id: UserId, config: ClientConfig) -> Result<Self, ClientError> {
        let connection = ConnectionManager::new(&config.endpoint, config.connection.clone())?;
        let registry = SubscriptionRegistry::new();
        let (_, unread_mailbox) = registry.subscribe_mailbox(Topic::Kind(FrameKind::NewMessage));

        Ok(Self {
            env,
            user_id,
            config,
            connection,
            registry,
            views: BTreeMap::new(),
            retired: HashMap::new(),
            active: None,
            unread: UnreadTracker::new(user_id),
            unread_mailbox,
            connected_before: false,
        })
    }

    /// Local user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Most recent connection failure.
    pub fn connection_error(&self) -> Option<&ConnectionError> {
        self.connection.last_error()
    }

    /// Earliest time a [`ClientEvent::Tick`] has work to do.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        self.connection.next_deadline()
    }

    /// Conversation on screen.
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.active
    }

    /// Conversations with an open view, in id order.
    pub fn open_conversations(&self) -> impl Iterator<Item = ConversationId> + '_ {
        self.views.keys().copied()
    }

    /// Timeline of an open conversation.
    pub fn timeline(&self, conversation_id: ConversationId) -> Option<&MessageTimeline> {
        self.views.get(&conversation_id).map(|v| &v.timeline)
    }

    /// Whether older history may exist. False for conversations not open.
    pub fn has_more(&self, conversation_id: ConversationId) -> bool {
        self.views.get(&conversation_id).is_some_and(|v| v.pager.has_more())
    }

    /// Whether a history fetch is outstanding.
    pub fn is_loading(&self, conversation_id: ConversationId) -> bool {
        self.views.get(&conversation_id).is_some_and(|v| v.pager.is_loading())
    }

    /// Unread counters.
    pub fn unread(&self) -> &UnreadTracker {
        &self.unread
    }

    /// Subscription registry. Extra listeners see every inbound frame.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Write `frame` to the channel.
    ///
    /// Returns `None` when the channel is not connected.
    pub fn send_frame(&self, frame: Frame) -> Option<ClientAction> {
        match self.connection.send(frame) {
            Ok(actions) => actions.into_iter().find_map(|action| match action {
                ConnectionAction::Send(frame) => Some(ClientAction::SendFrame(frame)),
                _ => None,
            }),
            Err(e) => {
                tracing::debug!(error = %e, "frame not sent");
                None
            },
        }
    }

    /// Process an event and return resulting actions.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::Connect { token } => {
                let now = self.env.now();
                Ok(self.step_connection(|c| c.connect(&token, now)))
            },
            ClientEvent::Disconnect => Ok(self.step_connection(ConnectionManager::disconnect)),
            ClientEvent::ChannelOpened => {
                let now = self.env.now();
                Ok(self.step_connection(|c| c.handle_open(now)))
            },
            ClientEvent::ChannelClosed(close) => {
                let now = self.env.now();
                Ok(self.step_connection(|c| c.handle_close(&close, now)))
            },
            ClientEvent::ChannelError { reason } => {
                let now = self.env.now();
                Ok(self.step_connection(|c| c.handle_error(&reason, now)))
            },
            ClientEvent::ChannelRejected { reason } => {
                Ok(self.step_connection(|c| c.handle_rejected(&reason)))
            },
            ClientEvent::TextReceived(text) => Ok(self.handle_text(&text)),
            ClientEvent::Tick { now } => Ok(self.step_connection(|c| c.tick(now))),
            ClientEvent::SetActiveConversation { conversation_id } => {
                Ok(self.handle_set_active(conversation_id))
            },
            ClientEvent::OpenConversation { conversation_id } => {
                if self.views.contains_key(&conversation_id) {
                    return Ok(Vec::new());
                }
                Ok(self.open_view(conversation_id))
            },
            ClientEvent::CloseConversation { conversation_id } => {
                self.handle_close_conversation(conversation_id)
            },
            ClientEvent::LoadNextPage { conversation_id } => {
                let view = self.view_mut(conversation_id)?;
                Ok(view.pager.load_next_page().map(ClientAction::FetchHistory).into_iter().collect())
            },
            ClientEvent::HistoryLoaded { request, result } => {
                Ok(self.handle_history_loaded(&request, result))
            },
            ClientEvent::SendText { conversation_id, content } => {
                self.handle_send_text(conversation_id, content)
            },
            ClientEvent::SendFile { conversation_id, file } => {
                self.handle_send_file(conversation_id, file)
            },
            ClientEvent::Resend { conversation_id, message_id } => {
                self.handle_resend(conversation_id, &message_id)
            },
            ClientEvent::SendCompleted { conversation_id, correlation, result } => {
                Ok(self.handle_send_completed(conversation_id, &correlation, result))
            },
        }
    }

    /// Run one connection transition and translate what it produced.
    fn step_connection<F>(&mut self, step: F) -> Vec<ClientAction>
    where
        F: FnOnce(&mut ConnectionManager<E::Instant>) -> Vec<ConnectionAction>,
    {
        let before = self.connection.state();
        let mut actions: Vec<ClientAction> =
            step(&mut self.connection).into_iter().map(Self::convert_connection_action).collect();

        let after = self.connection.state();
        if after != before {
            actions.push(ClientAction::ConnectionChanged {
                state: after,
                error: self.connection.last_error().cloned(),
            });

            if after == ConnectionState::Connected {
                actions.extend(self.on_connected());
            }
        }

        actions
    }

    fn convert_connection_action(action: ConnectionAction) -> ClientAction {
        match action {
            ConnectionAction::Open { url } => ClientAction::OpenChannel { url },
            ConnectionAction::Send(frame) => ClientAction::SendFrame(frame),
            ConnectionAction::Close { reason } => ClientAction::CloseChannel { reason },
            ConnectionAction::Failed(error) => {
                tracing::error!(%error, "connection failed");
                ClientAction::Error { conversation_id: None, reason: error.to_string() }
            },
        }
    }

    /// After a reconnect every open view re-reads its newest page.
    fn on_connected(&mut self) -> Vec<ClientAction> {
        if !self.connected_before {
            self.connected_before = true;
            return Vec::new();
        }

        tracing::info!(views = self.views.len(), "reconnected, catching up");
        self.views
            .values_mut()
            .filter_map(ConversationView::catch_up)
            .map(ClientAction::FetchHistory)
            .collect()
    }

    fn handle_text(&mut self, text: &str) -> Vec<ClientAction> {
        let now = self.env.now();
        let Some(frame) = self.connection.handle_text(text, now) else {
            return Vec::new();
        };

        self.registry.dispatch(&frame);

        let mut actions = Vec::new();
        if frame == Frame::Ping {
            actions.extend(self.send_frame(Frame::Pong));
        }
        actions.extend(self.drain_mailboxes());
        actions
    }

    /// Apply everything the registry delivered since the last drain.
    fn drain_mailboxes(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        for frame in self.unread_mailbox.drain() {
            if let Frame::NewMessage { conversation_id, message } = &frame
                && self.unread.observe(*conversation_id, &message.id, message.sender_id)
            {
                actions.push(ClientAction::UnreadChanged {
                    conversation_id: *conversation_id,
                    count: self.unread.count(*conversation_id),
                });
            }
        }

        for (&conversation_id, view) in &mut self.views {
            let mut changed = false;
            for frame in view.mailbox.drain() {
                if let Frame::NewMessage { message, .. } = frame {
                    changed |= view.apply_push(self.user_id, message);
                }
            }

            if changed {
                actions.push(ClientAction::TimelineChanged { conversation_id });
            }
        }

        actions
    }

    fn handle_set_active(&mut self, conversation_id: ConversationId) -> Vec<ClientAction> {
        if let Some(previous) = self.active.take() {
            self.teardown(previous);
        }

        let mut actions = Vec::new();
        self.active = Some(conversation_id);
        if self.unread.set_active(Some(conversation_id)) {
            actions.push(ClientAction::UnreadChanged { conversation_id, count: 0 });
        }

        tracing::info!(conversation = %conversation_id, "conversation activated");
        actions.extend(self.open_view(conversation_id));
        actions
    }

    /// Open a fresh view, or reset an existing one, and request page 0.
    fn open_view(&mut self, conversation_id: ConversationId) -> Vec<ClientAction> {
        let view = match self.views.entry(conversation_id) {
            Entry::Occupied(entry) => {
                let view = entry.into_mut();
                view.pager.reset(&mut view.timeline);
                view.outbox.clear();
                view.needs_catch_up = false;
                view
            },
            Entry::Vacant(entry) => {
                let (subscription, mailbox) =
                    self.registry.subscribe_mailbox(Topic::Conversation(conversation_id));
                let generation = self.retired.remove(&conversation_id).unwrap_or(0);
                let pager =
                    HistoryPager::with_generation(conversation_id, self.config.page_size, generation);
                entry.insert(ConversationView::new(conversation_id, pager, subscription, mailbox))
            },
        };

        let mut actions = vec![ClientAction::TimelineChanged { conversation_id }];
        actions.extend(view.pager.load_next_page().map(ClientAction::FetchHistory));
        actions
    }

    /// Drop a view and its subscription. Returns false if it was not open.
    fn teardown(&mut self, conversation_id: ConversationId) -> bool {
        let Some(view) = self.views.remove(&conversation_id) else {
            return false;
        };

        self.registry.unsubscribe(view.subscription);
        self.retired.insert(conversation_id, view.pager.cursor().generation + 1);
        tracing::debug!(
            conversation = %conversation_id,
            messages = view.timeline.len(),
            pending = view.outbox.len(),
            "conversation view closed"
        );
        true
    }

    fn handle_close_conversation(
        &mut self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if !self.teardown(conversation_id) {
            return Err(ClientError::UnknownConversation { conversation_id });
        }

        if self.active == Some(conversation_id) {
            self.active = None;
            self.unread.set_active(None);
        }

        Ok(Vec::new())
    }

    fn handle_history_loaded(
        &mut self,
        request: &PageRequest,
        result: Result<FetchedPage, HistoryError>,
    ) -> Vec<ClientAction> {
        let conversation_id = request.conversation_id;
        let Some(view) = self.views.get_mut(&conversation_id) else {
            tracing::debug!(conversation = %conversation_id, "page for closed conversation dropped");
            return Vec::new();
        };

        let mut actions = Vec::new();
        match view.pager.complete(request, result, &mut view.timeline) {
            PageOutcome::Merged { summary, exhausted, .. } => {
                if summary.changed() || exhausted {
                    actions.push(ClientAction::TimelineChanged { conversation_id });
                }
            },
            PageOutcome::Stale => {},
            PageOutcome::Failed(e) => {
                actions.push(ClientAction::Error {
                    conversation_id: Some(conversation_id),
                    reason: e.to_string(),
                });
            },
        }

        if view.needs_catch_up && !view.pager.is_loading() {
            actions.extend(view.catch_up().map(ClientAction::FetchHistory));
        }

        actions
    }

    fn handle_send_text(
        &mut self,
        conversation_id: ConversationId,
        content: String,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if content.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let draft = Draft::text(self.user_id, content.clone(), self.wall_clock());
        self.submit(conversation_id, draft, OutgoingBody::Text(content))
    }

    fn handle_send_file(
        &mut self,
        conversation_id: ConversationId,
        file: FileUpload,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if file.bytes.is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let draft = Draft {
            sender_id: self.user_id,
            content: None,
            kind: file.kind(),
            attachments: vec![Attachment {
                filename: file.filename.clone(),
                url: String::new(),
                content_type: file.content_type.clone(),
                size: Some(file.bytes.len() as u64),
            }],
            timestamp: self.wall_clock(),
        };
        self.submit(conversation_id, draft, OutgoingBody::File(file))
    }

    fn handle_resend(
        &mut self,
        conversation_id: ConversationId,
        message_id: &MessageId,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let timestamp = self.wall_clock();
        let view = self.view_mut(conversation_id)?;

        let message = view
            .timeline
            .get(message_id)
            .ok_or_else(|| ClientError::UnknownMessage { message_id: message_id.clone() })?;

        if !message.id.is_local() || message.status != DeliveryStatus::Failed {
            return Err(ClientError::NotResendable { message_id: message_id.clone() });
        }

        let body = message
            .correlation
            .as_ref()
            .and_then(|key| view.outbox.get(key).cloned())
            .or_else(|| message.content.clone().map(OutgoingBody::Text))
            .ok_or_else(|| ClientError::NotResendable { message_id: message_id.clone() })?;

        let Some(message) = view.timeline.take_failed(message_id) else {
            return Err(ClientError::NotResendable { message_id: message_id.clone() });
        };
        if let Some(key) = &message.correlation {
            view.outbox.remove(key);
        }

        tracing::info!(conversation = %conversation_id, message = %message_id, "resending");
        let draft = Draft {
            sender_id: message.sender_id,
            content: message.content,
            kind: message.kind,
            attachments: message.attachments,
            timestamp,
        };
        self.submit(conversation_id, draft, body)
    }

    /// Append an optimistic entry and hand the body to the driver.
    ///
    /// Without a live channel the entry fails at once; it can be re-sent.
    fn submit(
        &mut self,
        conversation_id: ConversationId,
        draft: Draft,
        body: OutgoingBody,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let correlation = CorrelationKey::from_u64(self.env.random_u64());
        let connected = self.connection.is_connected();
        let view = self.view_mut(conversation_id)?;

        let local_id = view.timeline.append_local_pending(draft, correlation.clone());
        view.outbox.insert(correlation.clone(), body.clone());

        let mut actions = vec![ClientAction::TimelineChanged { conversation_id }];
        if connected {
            tracing::debug!(conversation = %conversation_id, id = %local_id, %correlation, "send submitted");
            actions.push(ClientAction::SubmitMessage(Submission {
                conversation_id,
                correlation,
                body,
            }));
        } else {
            tracing::warn!(conversation = %conversation_id, id = %local_id, "send while offline");
            view.timeline.fail(&correlation);
            actions.push(ClientAction::Error {
                conversation_id: Some(conversation_id),
                reason: SendError::NotConnected.to_string(),
            });
        }

        Ok(actions)
    }

    fn handle_send_completed(
        &mut self,
        conversation_id: ConversationId,
        correlation: &CorrelationKey,
        result: Result<Message, SendError>,
    ) -> Vec<ClientAction> {
        let Some(view) = self.views.get_mut(&conversation_id) else {
            tracing::debug!(conversation = %conversation_id, %correlation, "send completion for closed conversation");
            return Vec::new();
        };

        match result {
            Ok(message) => {
                view.outbox.remove(correlation);
                if view.timeline.confirm(correlation, message).changed() {
                    return vec![ClientAction::TimelineChanged { conversation_id }];
                }
                Vec::new()
            },
            Err(e) => {
                if !view.timeline.fail(correlation) {
                    tracing::debug!(%correlation, error = %e, "send failure after confirmation ignored");
                    return Vec::new();
                }

                tracing::warn!(conversation = %conversation_id, %correlation, error = %e, "send failed");
                vec![
                    ClientAction::TimelineChanged { conversation_id },
                    ClientAction::Error {
                        conversation_id: Some(conversation_id),
                        reason: e.to_string(),
                    },
                ]
            },
        }
    }

    fn view_mut(
        &mut self,
        conversation_id: ConversationId,
    ) -> Result<&mut ConversationView, ClientError> {
        self.views
            .get_mut(&conversation_id)
            .ok_or(ClientError::UnknownConversation { conversation_id })
    }

    fn wall_clock(&self) -> Timestamp {
        Timestamp::from_millis(self.env.wall_clock_millis())
    }
}

#[cfg(test)]
mod tests {
    use murmur_core::env::test_utils::MockEnv;

    use super::*;

    const ME: UserId = UserId(1);
    const ROOM: ConversationId = ConversationId(7);

    fn client() -> SyncClient<MockEnv> {
        SyncClient::new(MockEnv::new(), ME, ClientConfig::default()).unwrap()
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let config = ClientConfig { endpoint: "http://x".to_string(), ..ClientConfig::default() };
        let result = SyncClient::new(MockEnv::new(), ME, config);
        assert!(matches!(result, Err(ClientError::Connection(ConnectionError::InvalidEndpoint(_)))));
    }

    #[test]
    fn unknown_conversation_operations_are_errors() {
        let mut client = client();

        let result = client.handle(ClientEvent::LoadNextPage { conversation_id: ROOM });
        assert_eq!(result, Err(ClientError::UnknownConversation { conversation_id: ROOM }));

        let result = client.handle(ClientEvent::CloseConversation { conversation_id: ROOM });
        assert_eq!(result, Err(ClientError::UnknownConversation { conversation_id: ROOM }));
    }

    #[test]
    fn blank_text_is_rejected() {
        let mut client = client();
        client.handle(ClientEvent::SetActiveConversation { conversation_id: ROOM }).unwrap();

        let result = client
            .handle(ClientEvent::SendText { conversation_id: ROOM, content: "  ".to_string() });
        assert_eq!(result, Err(ClientError::EmptyMessage));
    }

    #[test]
    fn send_frame_needs_connection() {
        let client = client();
        assert_eq!(client.send_frame(Frame::Ping), None);
    }

    #[test]
    fn open_conversation_is_idempotent() {
        let mut client = client();

        let first = client.handle(ClientEvent::OpenConversation { conversation_id: ROOM }).unwrap();
        assert!(first.iter().any(|a| matches!(a, ClientAction::FetchHistory(_))));

        let second = client.handle(ClientEvent::OpenConversation { conversation_id: ROOM }).unwrap();
        assert!(second.is_empty());
        assert_eq!(client.active_conversation(), None);
    }
}
