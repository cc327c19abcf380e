//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` stands in for the WebSocket/HTTP driver in deterministic
//! tests. It implements [`Driver`] so the same [`murmur_app::Runtime`]
//! orchestration code runs in both production and simulation.
//!
//! Work completes through three sources: UI commands, the push channel (one
//! ordered stream, as a real socket is), and REST completions (which may
//! finish in any order). Each poll picks a non-empty source with the seeded
//! RNG, so a seed fixes one interleaving and different seeds explore others.

use std::collections::VecDeque;

use murmur_app::{Driver, EventQueue, RuntimeEvent, RuntimeHandle, event_channel};
use murmur_client::{ClientAction, ClientEvent, Submission, SyncClient};
use murmur_core::{CloseEvent, Environment, FetchedPage, PageRequest};
use murmur_proto::{ConversationId, DeliveryStatus, Frame, Message, UserId};

use crate::{
    SimEnv, SimServer,
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot},
};

/// Error type for simulation driver.
#[derive(Debug, Clone)]
pub struct SimDriverError(pub String);

impl std::fmt::Display for SimDriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SimDriverError: {}", self.0)
    }
}

impl std::error::Error for SimDriverError {}

type Instant = std::time::Instant;

/// Simulation driver for deterministic testing.
pub struct SimDriver {
    env: SimEnv,
    user_id: UserId,
    server: SimServer,
    handle: RuntimeHandle,
    queue: EventQueue,
    commands: VecDeque<RuntimeEvent>,
    channel: VecDeque<ClientEvent>,
    requests: Vec<ClientEvent>,
    channel_open: bool,
    reorder_requests: bool,
    idle_ticks: u32,
    sent_frames: Vec<Frame>,
    published: Vec<ClientAction>,
    invariants: Option<InvariantRegistry>,
    stopped: bool,
}

impl SimDriver {
    /// Driver for `user_id` talking to an empty [`SimServer`].
    pub fn new(env: SimEnv, user_id: UserId) -> Self {
        let (handle, queue) = event_channel();
        Self {
            server: SimServer::new(env.clone()),
            env,
            user_id,
            handle,
            queue,
            commands: VecDeque::new(),
            channel: VecDeque::new(),
            requests: Vec::new(),
            channel_open: false,
            reorder_requests: true,
            idle_ticks: 0,
            sent_frames: Vec::new(),
            published: Vec::new(),
            invariants: None,
            stopped: false,
        }
    }

    /// Check invariants after every published change.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// Complete REST requests in issue order instead of a seeded shuffle.
    #[must_use]
    pub fn in_order(mut self) -> Self {
        self.reorder_requests = false;
        self
    }

    /// Handle for queueing UI commands.
    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    /// The simulated backend.
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    /// The simulated backend, for arming failures.
    pub fn server_mut(&mut self) -> &mut SimServer {
        &mut self.server
    }

    /// Whether the push channel is up.
    pub fn is_channel_open(&self) -> bool {
        self.channel_open
    }

    /// Frames the client wrote to the channel, oldest first.
    pub fn sent_frames(&self) -> &[Frame] {
        &self.sent_frames
    }

    /// Changes the runtime published, oldest first.
    pub fn published(&self) -> &[ClientAction] {
        &self.published
    }

    /// Take all published changes.
    pub fn take_published(&mut self) -> Vec<ClientAction> {
        std::mem::take(&mut self.published)
    }

    /// Whether [`Driver::stop`] ran.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Let the next `count` empty polls wait out the client's deadline
    /// instead of shutting down.
    pub fn allow_idle_ticks(&mut self, count: u32) {
        self.idle_ticks = count;
    }

    /// Whether any event is waiting to be delivered.
    pub fn has_pending(&mut self) -> bool {
        self.drain_commands();
        !self.commands.is_empty() || !self.channel.is_empty() || !self.requests.is_empty()
    }

    /// Another user posts; the push reaches the client if the channel is up.
    pub fn remote_post(
        &mut self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
    ) -> Result<Message, SimDriverError> {
        let message = self.server.post(conversation_id, sender_id, content);
        self.push(&message)?;
        Ok(message)
    }

    /// Server side of the channel drops without a close handshake.
    ///
    /// Pushes still in flight are lost.
    pub fn drop_channel(&mut self) {
        if !self.channel_open {
            return;
        }
        tracing::debug!("simulated channel drop");
        self.channel_open = false;
        self.channel.clear();
        self.channel.push_back(ClientEvent::ChannelClosed(CloseEvent::abnormal("simulated drop")));
    }

    /// Check invariants against the client's current state.
    pub fn check_invariants<E: Environment>(
        &self,
        client: &SyncClient<E>,
    ) -> Result<(), SimDriverError> {
        let Some(registry) = &self.invariants else {
            return Ok(());
        };

        let snapshot = SystemSnapshot::single(ClientSnapshot::capture(client));
        registry
            .check_all(&snapshot)
            .map_err(|violations| SimDriverError(format!("invariant violation: {violations}")))
    }

    fn drain_commands(&mut self) {
        while let Ok(event) = self.queue.try_recv() {
            self.commands.push_back(event);
        }
    }

    fn push(&mut self, message: &Message) -> Result<(), SimDriverError> {
        if !self.channel_open {
            return Ok(());
        }
        let delivered = Message { status: DeliveryStatus::Delivered, ..message.clone() };
        let text =
            Frame::new_message(delivered).encode().map_err(|e| SimDriverError(e.to_string()))?;
        self.channel.push_back(ClientEvent::TextReceived(text));
        Ok(())
    }

    fn next_event(&mut self) -> Option<RuntimeEvent> {
        let mut sources = Vec::with_capacity(3);
        if !self.commands.is_empty() {
            sources.push(0);
        }
        if !self.channel.is_empty() {
            sources.push(1);
        }
        if !self.requests.is_empty() {
            sources.push(2);
        }
        if sources.is_empty() {
            return None;
        }

        match sources[self.env.pick(sources.len())] {
            0 => self.commands.pop_front(),
            1 => self.channel.pop_front().map(RuntimeEvent::Client),
            _ => {
                let index =
                    if self.reorder_requests { self.env.pick(self.requests.len()) } else { 0 };
                Some(RuntimeEvent::Client(self.requests.remove(index)))
            },
        }
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;
    type Instant = Instant;

    async fn poll_event(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Option<RuntimeEvent>, SimDriverError> {
        self.drain_commands();
        if let Some(event) = self.next_event() {
            return Ok(Some(event));
        }

        match deadline {
            Some(deadline) if self.idle_ticks > 0 => {
                self.idle_ticks -= 1;
                self.env.advance_to(deadline);
                Ok(None)
            },
            _ => Ok(Some(RuntimeEvent::Shutdown)),
        }
    }

    async fn open_channel(&mut self, _url: &str) -> Result<(), SimDriverError> {
        self.channel.clear();
        if self.server.take_connect_rejection() {
            self.channel_open = false;
            self.channel.push_back(ClientEvent::ChannelRejected {
                reason: "HTTP 401 Unauthorized".to_string(),
            });
        } else {
            self.channel_open = true;
            self.channel.push_back(ClientEvent::ChannelOpened);
        }
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), SimDriverError> {
        let frame = Frame::decode(&text).map_err(|e| SimDriverError(e.to_string()))?;
        if frame == Frame::Ping && self.channel_open {
            let pong = Frame::Pong.encode().map_err(|e| SimDriverError(e.to_string()))?;
            self.channel.push_back(ClientEvent::TextReceived(pong));
        }
        self.sent_frames.push(frame);
        Ok(())
    }

    async fn close_channel(&mut self, _reason: &str) -> Result<(), SimDriverError> {
        self.channel_open = false;
        self.channel.clear();
        Ok(())
    }

    fn fetch_history(&mut self, request: PageRequest) -> Result<(), SimDriverError> {
        let result = self.server.page(&request).map(FetchedPage::from);
        self.requests.push(ClientEvent::HistoryLoaded { request, result });
        Ok(())
    }

    fn submit_message(&mut self, submission: Submission) -> Result<(), SimDriverError> {
        let result = self.server.accept(self.user_id, &submission);
        if let Ok(message) = &result {
            self.push(message)?;
        }
        self.requests.push(ClientEvent::SendCompleted {
            conversation_id: submission.conversation_id,
            correlation: submission.correlation,
            result,
        });
        Ok(())
    }

    fn now(&self) -> Instant {
        self.env.now()
    }

    fn publish<E>(&mut self, client: &SyncClient<E>, change: &ClientAction) -> Result<(), SimDriverError>
    where
        E: Environment<Instant = Instant>,
    {
        self.published.push(change.clone());
        self.check_invariants(client)
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.channel_open = false;
    }
}
