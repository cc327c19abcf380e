//! Topic-filtered fan-out of inbound frames.
//!
//! Listeners are isolated from each other and from the connection: an error
//! from one listener is logged and counted, and every other matching listener
//! still runs. Subscriptions are identified by opaque tokens, so removing one
//! never depends on closure identity.
//!
//! The registry is a cheap-to-clone handle over shared single-threaded state.
//! It is deliberately `!Send`: all dispatch happens on the client's event loop.

use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    rc::Rc,
};

use murmur_proto::{ConversationId, Frame, FrameKind};

use crate::error::ListenerError;

/// Listener callback.
pub type Listener = Box<dyn FnMut(&Frame) -> Result<(), ListenerError>>;

/// Which frames a subscription receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Every frame
    All,
    /// Frames of one kind
    Kind(FrameKind),
    /// Frames concerning one conversation
    Conversation(ConversationId),
}

impl Topic {
    /// Whether `frame` belongs to this topic.
    pub fn matches(&self, frame: &Frame) -> bool {
        match self {
            Self::All => true,
            Self::Kind(kind) => frame.kind() == *kind,
            Self::Conversation(id) => frame.conversation_id() == Some(*id),
        }
    }
}

/// Token returned by [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of one [`SubscriptionRegistry::dispatch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Listeners that returned `Ok`
    pub delivered: usize,
    /// Listeners that returned `Err`
    pub failed: usize,
    /// Listeners skipped because they were already running
    pub skipped: usize,
}

type SharedListener = Rc<RefCell<Listener>>;

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    listener: SharedListener,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

/// Shared subscription table.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Rc<RefCell<Inner>>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry").field("subscriptions", &self.len()).finish()
    }
}

impl SubscriptionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for frames matching `topic`.
    pub fn subscribe<F>(&self, topic: Topic, listener: F) -> SubscriptionId
    where
        F: FnMut(&Frame) -> Result<(), ListenerError> + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);

        let listener: Listener = Box::new(listener);
        inner.subscriptions.push(Subscription {
            id,
            topic,
            listener: Rc::new(RefCell::new(listener)),
        });

        tracing::debug!(%id, ?topic, "subscribed");
        id
    }

    /// Register a FIFO inbox for frames matching `topic`.
    pub fn subscribe_mailbox(&self, topic: Topic) -> (SubscriptionId, Mailbox) {
        let mailbox = Mailbox::default();
        let sink = mailbox.clone();

        let id = self.subscribe(topic, move |frame| {
            sink.queue.borrow_mut().push_back(frame.clone());
            Ok(())
        });

        (id, mailbox)
    }

    /// Remove exactly the subscription `id`. Returns false if it was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|sub| sub.id != id);

        let removed = inner.subscriptions.len() != before;
        if removed {
            tracing::debug!(%id, "unsubscribed");
        }
        removed
    }

    /// Whether `id` is currently registered.
    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.borrow().subscriptions.iter().any(|sub| sub.id == id)
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner.borrow().subscriptions.len()
    }

    /// True if nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `frame` to every matching listener.
    ///
    /// The listener set is snapshotted first: subscriptions added during
    /// dispatch see only later frames, and subscriptions removed during
    /// dispatch are not invoked. A listener that is already running further
    /// up the stack is skipped.
    pub fn dispatch(&self, frame: &Frame) -> DispatchReport {
        let snapshot: Vec<(SubscriptionId, SharedListener)> = self
            .inner
            .borrow()
            .subscriptions
            .iter()
            .filter(|sub| sub.topic.matches(frame))
            .map(|sub| (sub.id, Rc::clone(&sub.listener)))
            .collect();

        let mut report = DispatchReport::default();

        for (id, listener) in snapshot {
            if !self.is_subscribed(id) {
                continue;
            }

            let Ok(mut listener) = listener.try_borrow_mut() else {
                tracing::warn!(%id, kind = %frame.kind(), "re-entrant dispatch skipped listener");
                report.skipped += 1;
                continue;
            };

            match (*listener)(frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(%id, kind = %frame.kind(), error = %e, "listener failed");
                    report.failed += 1;
                },
            }
        }

        report
    }
}

/// FIFO inbox filled by a mailbox subscription.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    queue: Rc<RefCell<VecDeque<Frame>>>,
}

impl Mailbox {
    /// Take every queued frame in arrival order.
    pub fn drain(&self) -> Vec<Frame> {
        self.queue.borrow_mut().drain(..).collect()
    }

    /// Take the oldest queued frame.
    pub fn pop(&self) -> Option<Frame> {
        self.queue.borrow_mut().pop_front()
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use murmur_proto::{DeliveryStatus, Message, MessageId, MessageKind, Timestamp, UserId};

    use super::*;

    fn new_message(conversation: u64, id: &str) -> Frame {
        Frame::new_message(Message {
            id: MessageId::server(id),
            conversation_id: ConversationId(conversation),
            sender_id: UserId(9),
            sender_name: None,
            content: Some("hi".to_string()),
            kind: MessageKind::Text,
            attachments: Vec::new(),
            timestamp: Timestamp::from_millis(1),
            status: DeliveryStatus::Delivered,
            correlation: None,
        })
    }

    fn counter(registry: &SubscriptionRegistry, topic: Topic) -> (SubscriptionId, Rc<Cell<u32>>) {
        let hits = Rc::new(Cell::new(0));
        let sink = Rc::clone(&hits);
        let id = registry.subscribe(topic, move |_| {
            sink.set(sink.get() + 1);
            Ok(())
        });
        (id, hits)
    }

    #[test]
    fn routes_by_topic() {
        let registry = SubscriptionRegistry::new();
        let (_, all) = counter(&registry, Topic::All);
        let (_, pings) = counter(&registry, Topic::Kind(FrameKind::Ping));
        let (_, room_one) = counter(&registry, Topic::Conversation(ConversationId(1)));

        registry.dispatch(&Frame::Ping);
        registry.dispatch(&new_message(1, "a"));
        registry.dispatch(&new_message(2, "b"));

        assert_eq!(all.get(), 3);
        assert_eq!(pings.get(), 1);
        assert_eq!(room_one.get(), 1);
    }

    #[test]
    fn failing_listener_does_not_stop_others() {
        let registry = SubscriptionRegistry::new();
        let (_, before) = counter(&registry, Topic::All);
        registry.subscribe(Topic::All, |_| Err(ListenerError::new("boom")));
        let (_, after) = counter(&registry, Topic::All);

        let report = registry.dispatch(&Frame::Ping);

        assert_eq!(report, DispatchReport { delivered: 2, failed: 1, skipped: 0 });
        assert_eq!(before.get(), 1);
        assert_eq!(after.get(), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_token() {
        let registry = SubscriptionRegistry::new();
        let (first, first_hits) = counter(&registry, Topic::All);
        let (_, second_hits) = counter(&registry, Topic::All);

        assert!(registry.unsubscribe(first));
        assert!(!registry.unsubscribe(first));
        registry.dispatch(&Frame::Pong);

        assert_eq!(first_hits.get(), 0);
        assert_eq!(second_hits.get(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn subscriptions_added_during_dispatch_see_later_frames_only() {
        let registry = SubscriptionRegistry::new();
        let late_hits = Rc::new(Cell::new(0));

        let handle = registry.clone();
        let sink = Rc::clone(&late_hits);
        let added = Rc::new(Cell::new(false));
        registry.subscribe(Topic::All, move |_| {
            if !added.replace(true) {
                let sink = Rc::clone(&sink);
                handle.subscribe(Topic::All, move |_| {
                    sink.set(sink.get() + 1);
                    Ok(())
                });
            }
            Ok(())
        });

        registry.dispatch(&Frame::Ping);
        assert_eq!(late_hits.get(), 0);

        registry.dispatch(&Frame::Ping);
        assert_eq!(late_hits.get(), 1);
    }

    #[test]
    fn listener_removed_mid_dispatch_is_not_invoked() {
        let registry = SubscriptionRegistry::new();
        let victim = Rc::new(Cell::new(None));

        let handle = registry.clone();
        let target = Rc::clone(&victim);
        registry.subscribe(Topic::All, move |_| {
            if let Some(id) = target.get() {
                handle.unsubscribe(id);
            }
            Ok(())
        });
        let (id, hits) = counter(&registry, Topic::All);
        victim.set(Some(id));

        let report = registry.dispatch(&Frame::Ping);

        assert_eq!(hits.get(), 0);
        assert_eq!(report.delivered, 1);
    }

    #[test]
    fn reentrant_dispatch_skips_running_listener() {
        let registry = SubscriptionRegistry::new();
        let inner_report = Rc::new(Cell::new(None));

        let handle = registry.clone();
        let sink = Rc::clone(&inner_report);
        registry.subscribe(Topic::Kind(FrameKind::Ping), move |_| {
            sink.set(Some(handle.dispatch(&Frame::Ping)));
            Ok(())
        });

        let outer = registry.dispatch(&Frame::Ping);

        assert_eq!(outer.delivered, 1);
        assert_eq!(inner_report.get(), Some(DispatchReport { delivered: 0, failed: 0, skipped: 1 }));
    }

    #[test]
    fn mailbox_preserves_arrival_order() {
        let registry = SubscriptionRegistry::new();
        let (id, mailbox) = registry.subscribe_mailbox(Topic::Conversation(ConversationId(4)));

        registry.dispatch(&new_message(4, "1"));
        registry.dispatch(&new_message(5, "x"));
        registry.dispatch(&new_message(4, "2"));

        let ids: Vec<_> = mailbox
            .drain()
            .into_iter()
            .filter_map(|frame| match frame {
                Frame::NewMessage { message, .. } => Some(message.id),
                Frame::Ping | Frame::Pong => None,
            })
            .collect();
        assert_eq!(ids, vec![MessageId::server("1"), MessageId::server("2")]);
        assert!(mailbox.is_empty());

        registry.unsubscribe(id);
        registry.dispatch(&new_message(4, "3"));
        assert!(mailbox.is_empty());
    }
}
