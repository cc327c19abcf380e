//! Live driver over WebSocket and HTTP.
//!
//! The push channel is owned here and polled alongside the event queue. REST
//! calls run as spawned tasks whose results come back through the same queue,
//! so the client sees one ordered stream of events.

use std::{
    collections::HashMap,
    io::{self, Write},
    time::Instant,
};

use murmur_app::{Driver, EventQueue, HandleError, RuntimeEvent, RuntimeHandle};
use murmur_client::{
    ClientAction, ClientEvent, Submission, SyncClient,
    rest::RestApi,
    transport::{self, Channel, ChannelEvent, TransportError},
};
use murmur_core::{CloseEvent, Environment, PageRequest};
use murmur_proto::{ConversationId, DeliveryStatus, MessageId};
use thiserror::Error;

use crate::render;

/// Errors that stop the live runtime.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Writing to stdout failed.
    #[error("output failed: {0}")]
    Io(#[from] io::Error),

    /// Every sender of the event queue is gone.
    #[error("event queue closed")]
    QueueClosed,

    /// The runtime's queue no longer accepts events.
    #[error(transparent)]
    Handle(#[from] HandleError),
}

/// What woke the poll loop.
enum Wake {
    Queue(Option<RuntimeEvent>),
    Channel(Option<ChannelEvent>),
    Deadline,
}

/// Wait for the first of a queued event, channel input, or the deadline.
///
/// The queue is polled first: `ChannelOpened` is queued before the channel
/// is polled, and the client must see it before any frame that follows.
async fn next_wake(
    queue: &mut EventQueue,
    inbound: impl Future<Output = Option<ChannelEvent>>,
    deadline: Option<Instant>,
) -> Wake {
    let timer = async move {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        event = queue.recv() => Wake::Queue(event),
        event = inbound => Wake::Channel(event),
        () = timer => Wake::Deadline,
    }
}

/// Driver for a real server.
pub struct LiveDriver {
    api: RestApi,
    handle: RuntimeHandle,
    queue: EventQueue,
    channel: Option<Channel>,
    /// Conversation the printed lines belong to.
    shown_for: Option<ConversationId>,
    /// Status last printed per message of `shown_for`.
    shown: HashMap<MessageId, DeliveryStatus>,
}

impl LiveDriver {
    /// Driver that completes requests through `handle` and reads them from
    /// `queue`.
    pub fn new(api: RestApi, handle: RuntimeHandle, queue: EventQueue) -> Self {
        Self { api, handle, queue, channel: None, shown_for: None, shown: HashMap::new() }
    }

    fn enqueue(&self, event: ClientEvent) -> Result<(), LiveError> {
        self.handle.send(event).map_err(LiveError::from)
    }

    fn print_active<E: Environment>(
        &mut self,
        client: &SyncClient<E>,
        out: &mut impl Write,
    ) -> io::Result<()> {
        let Some(active) = client.active_conversation() else {
            return Ok(());
        };
        let Some(timeline) = client.timeline(active) else {
            return Ok(());
        };

        if self.shown_for != Some(active) {
            self.shown_for = Some(active);
            self.shown.clear();
        }

        for message in timeline.messages() {
            if self.shown.get(&message.id) != Some(&message.status) {
                writeln!(out, "{}", render::message_line(message))?;
                self.shown.insert(message.id.clone(), message.status);
            }
        }
        Ok(())
    }
}

impl Driver for LiveDriver {
    type Error = LiveError;
    type Instant = Instant;

    async fn poll_event(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Option<RuntimeEvent>, LiveError> {
        let wake = {
            let Self { queue, channel, .. } = self;

            let inbound = async move {
                match channel {
                    Some(channel) => channel.recv().await,
                    None => std::future::pending().await,
                }
            };
            next_wake(queue, inbound, deadline).await
        };

        match wake {
            Wake::Queue(Some(event)) => Ok(Some(event)),
            Wake::Queue(None) => Err(LiveError::QueueClosed),
            Wake::Channel(event) => {
                let event = event
                    .unwrap_or_else(|| ChannelEvent::Closed(CloseEvent::abnormal("reader stopped")));
                if matches!(event, ChannelEvent::Closed(_) | ChannelEvent::Error(_)) {
                    self.channel = None;
                }
                Ok(Some(RuntimeEvent::Client(event.into())))
            },
            Wake::Deadline => Ok(None),
        }
    }

    async fn open_channel(&mut self, url: &str) -> Result<(), LiveError> {
        self.channel = None;

        let event = match transport::open(url).await {
            Ok(channel) => {
                self.channel = Some(channel);
                ClientEvent::ChannelOpened
            },
            Err(TransportError::Rejected { status }) => {
                ClientEvent::ChannelRejected { reason: format!("handshake status {status}") }
            },
            Err(e) => ClientEvent::ChannelError { reason: e.to_string() },
        };
        self.enqueue(event)
    }

    async fn send_text(&mut self, text: String) -> Result<(), LiveError> {
        let Some(channel) = &self.channel else {
            tracing::debug!("frame dropped, no channel");
            return Ok(());
        };

        if channel.send_text(text).await.is_err() {
            self.channel = None;
            self.enqueue(ClientEvent::ChannelError { reason: "channel writer stopped".to_string() })?;
        }
        Ok(())
    }

    async fn close_channel(&mut self, reason: &str) -> Result<(), LiveError> {
        if let Some(channel) = self.channel.take() {
            channel.close(reason.to_string()).await;
        }
        Ok(())
    }

    fn fetch_history(&mut self, request: PageRequest) -> Result<(), LiveError> {
        let api = self.api.clone();
        let handle = self.handle.clone();

        tokio::spawn(async move {
            let result = api.fetch_history(&request).await;
            if handle.send(ClientEvent::HistoryLoaded { request, result }).is_err() {
                tracing::debug!("history page dropped, runtime stopped");
            }
        });
        Ok(())
    }

    fn submit_message(&mut self, submission: Submission) -> Result<(), LiveError> {
        let api = self.api.clone();
        let handle = self.handle.clone();

        tokio::spawn(async move {
            let result = api.submit(&submission).await;
            let completed = ClientEvent::SendCompleted {
                conversation_id: submission.conversation_id,
                correlation: submission.correlation,
                result,
            };
            if handle.send(completed).is_err() {
                tracing::debug!("send result dropped, runtime stopped");
            }
        });
        Ok(())
    }

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn publish<E>(&mut self, client: &SyncClient<E>, change: &ClientAction) -> Result<(), LiveError>
    where
        E: Environment<Instant = Instant>,
    {
        let mut out = io::stdout().lock();

        match change {
            ClientAction::TimelineChanged { conversation_id } => {
                if client.active_conversation() == Some(*conversation_id) {
                    self.print_active(client, &mut out)?;
                }
            },
            ClientAction::UnreadChanged { conversation_id, count } if *count > 0 => {
                writeln!(out, "{}", render::unread_line(*conversation_id, *count))?;
            },
            ClientAction::ConnectionChanged { state, error } => {
                writeln!(out, "{}", render::connection_line(*state, error.as_ref()))?;
            },
            ClientAction::Error { reason, .. } => {
                writeln!(out, "!! {reason}")?;
            },
            _ => {},
        }

        out.flush()?;
        Ok(())
    }

    fn stop(&mut self) {
        self.channel = None;
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use murmur_app::event_channel;

    use super::*;

    #[tokio::test]
    async fn queued_open_wins_over_ready_frame() {
        let (handle, mut queue) = event_channel();
        handle.send(ClientEvent::ChannelOpened).unwrap();
        handle.send(ClientEvent::ChannelOpened).unwrap();

        for _ in 0..2 {
            let frame = std::future::ready(Some(ChannelEvent::Text("{}".to_string())));
            let wake = next_wake(&mut queue, frame, None).await;
            assert!(matches!(
                wake,
                Wake::Queue(Some(RuntimeEvent::Client(ClientEvent::ChannelOpened)))
            ));
        }

        let frame = std::future::ready(Some(ChannelEvent::Text("{}".to_string())));
        let wake = next_wake(&mut queue, frame, None).await;
        assert!(matches!(wake, Wake::Channel(Some(ChannelEvent::Text(_)))));
    }

    #[tokio::test]
    async fn deadline_wakes_an_idle_loop() {
        let (_handle, mut queue) = event_channel();
        let wake = next_wake(&mut queue, std::future::pending(), Some(Instant::now())).await;
        assert!(matches!(wake, Wake::Deadline));
    }
}
