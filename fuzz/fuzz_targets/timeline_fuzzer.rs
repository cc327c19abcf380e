//! Fuzz target for MessageTimeline reconciliation
//!
//! # Strategy
//!
//! - Live pushes and history pages with colliding timestamps
//! - Optimistic sends, their echoes, failures and resends in any order
//! - Messages addressed to another conversation
//!
//! # Invariants
//!
//! - Entries stay strictly ordered by `(timestamp, id)`
//! - No id appears twice
//! - Every entry is reachable by id and the pending count matches
//! - A send, once echoed, has at most one non-failed entry

#![no_main]

use std::collections::HashSet;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use murmur_core::{Draft, MessageTimeline};
use murmur_proto::{
    ConversationId, CorrelationKey, DeliveryStatus, Message, MessageId, MessageKind, Timestamp,
    UserId,
};

const ROOM: ConversationId = ConversationId(1);
const ME: UserId = UserId(1);

#[derive(Debug, Clone, Arbitrary)]
enum TimelineOp {
    Push { n: u8, status: StatusChoice },
    Page { from: u8, len: u8 },
    Foreign { n: u8 },
    Send { at: u8 },
    Echo { send: u8, via_push: bool },
    Fail { send: u8 },
    Resend { send: u8 },
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum StatusChoice {
    Sent,
    Delivered,
}

fn server_message(n: u8, status: DeliveryStatus) -> Message {
    Message {
        id: MessageId::server(format!("s{n:03}")),
        conversation_id: ROOM,
        sender_id: UserId(2),
        sender_name: None,
        content: None,
        kind: MessageKind::Text,
        attachments: Vec::new(),
        timestamp: Timestamp::from_millis(i64::from(n / 5) * 1000),
        status,
        correlation: None,
    }
}

fn echo_of(send: u64, at: i64) -> Message {
    Message {
        id: MessageId::server(format!("echo{send}")),
        sender_id: ME,
        timestamp: Timestamp::from_millis(at),
        status: DeliveryStatus::Sent,
        ..server_message(0, DeliveryStatus::Sent)
    }
}

fuzz_target!(|ops: Vec<TimelineOp>| {
    let mut timeline = MessageTimeline::new(ROOM);
    // Sends made so far: (nonce, local id, timestamp).
    let mut sends: Vec<(u64, MessageId, i64)> = Vec::new();

    for op in ops {
        match op {
            TimelineOp::Push { n, status } => {
                let status = match status {
                    StatusChoice::Sent => DeliveryStatus::Sent,
                    StatusChoice::Delivered => DeliveryStatus::Delivered,
                };
                timeline.append(server_message(n, status));
            },
            TimelineOp::Page { from, len } => {
                let page = (0..len % 16)
                    .map(|i| server_message(from.wrapping_add(i), DeliveryStatus::Delivered));
                timeline.merge_history_page(page);
            },
            TimelineOp::Foreign { n } => {
                let before = timeline.len();
                let mut message = server_message(n, DeliveryStatus::Delivered);
                message.conversation_id = ConversationId(2);
                timeline.append(message);
                assert_eq!(timeline.len(), before, "foreign message stored");
            },
            TimelineOp::Send { at } => {
                let nonce = sends.len() as u64;
                let at = i64::from(at) * 500;
                let draft = Draft::text(ME, "hi", Timestamp::from_millis(at));
                let id = timeline.append_local_pending(draft, CorrelationKey::from_u64(nonce));
                sends.push((nonce, id, at));
            },
            TimelineOp::Echo { send, via_push } => {
                let Some((nonce, _, at)) = pick(&sends, send) else { continue };
                let key = CorrelationKey::from_u64(nonce);
                let mut echo = echo_of(nonce, at);
                if via_push {
                    echo.correlation = Some(key);
                    timeline.append(echo);
                } else {
                    timeline.confirm(&key, echo);
                }
            },
            TimelineOp::Fail { send } => {
                let Some((nonce, _, _)) = pick(&sends, send) else { continue };
                timeline.fail(&CorrelationKey::from_u64(nonce));
            },
            TimelineOp::Resend { send } => {
                let Some((_, id, _)) = pick(&sends, send) else { continue };
                if let Some(message) = timeline.take_failed(&id) {
                    assert_eq!(message.status, DeliveryStatus::Failed);
                    assert!(timeline.get(&id).is_none());
                }
            },
        }

        check(&timeline, &sends);
    }
});

fn pick(sends: &[(u64, MessageId, i64)], index: u8) -> Option<(u64, MessageId, i64)> {
    if sends.is_empty() {
        return None;
    }
    sends.get(usize::from(index) % sends.len()).cloned()
}

fn check(timeline: &MessageTimeline, sends: &[(u64, MessageId, i64)]) {
    let messages = timeline.messages();

    for pair in messages.windows(2) {
        assert!(pair[0].sort_key() < pair[1].sort_key(), "timeline out of order");
    }

    let mut ids = HashSet::new();
    for message in messages {
        assert!(ids.insert(&message.id), "duplicate id {}", message.id);
        assert!(timeline.get(&message.id).is_some(), "entry not indexed");
    }

    let pending = messages.iter().filter(|m| m.status == DeliveryStatus::Pending).count();
    assert_eq!(timeline.pending_count(), pending);

    for (nonce, _, _) in sends {
        let key = CorrelationKey::from_u64(*nonce);
        let live = messages
            .iter()
            .filter(|m| m.correlation.as_ref() == Some(&key))
            .filter(|m| m.status != DeliveryStatus::Failed)
            .count();
        assert!(live <= 1, "send {nonce} has {live} live entries");
    }
}
