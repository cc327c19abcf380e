//! Property-based tests for MessageTimeline.
//!
//! Whatever order messages arrive in, and however often they are repeated,
//! the timeline stays sorted by `(timestamp, id)` with one entry per message.

use std::collections::HashSet;

use murmur_core::{Draft, MessageTimeline};
use murmur_proto::{
    ConversationId, CorrelationKey, DeliveryStatus, Message, MessageId, MessageKind, Timestamp,
    UserId,
};
use proptest::prelude::*;

const ROOM: ConversationId = ConversationId(1);
const ME: UserId = UserId(1);

#[derive(Debug, Clone)]
enum Op {
    /// Live push of server message `n`
    Push(u8),
    /// History page holding server messages `from..from + len`
    Page { from: u8, len: u8 },
    /// Optimistic send with nonce `n`
    Send(u8),
    /// Echo of send `n`, as server message `200 + n`
    Echo(u8),
    /// Send `n` failed
    Fail(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..60).prop_map(Op::Push),
        2 => (0u8..60, 1u8..10).prop_map(|(from, len)| Op::Page { from, len }),
        2 => (0u8..20).prop_map(Op::Send),
        2 => (0u8..20).prop_map(Op::Echo),
        1 => (0u8..20).prop_map(Op::Fail),
    ]
}

/// Server message `n`. Timestamps collide every 7 ids to exercise tie-breaks.
fn server_message(n: u8) -> Message {
    Message {
        id: MessageId::server(format!("s{n:03}")),
        conversation_id: ROOM,
        sender_id: UserId(2),
        sender_name: None,
        content: None,
        kind: MessageKind::Text,
        attachments: Vec::new(),
        timestamp: Timestamp::from_millis(i64::from(n / 7) * 1000),
        status: DeliveryStatus::Delivered,
        correlation: None,
    }
}

fn nonce(n: u8) -> CorrelationKey {
    CorrelationKey::from_u64(u64::from(n))
}

fn apply(timeline: &mut MessageTimeline, op: &Op) {
    match op {
        Op::Push(n) => {
            timeline.append(server_message(*n));
        },
        Op::Page { from, len } => {
            let page = (*from..from.saturating_add(*len)).map(server_message);
            timeline.merge_history_page(page);
        },
        Op::Send(n) => {
            if timeline.find_by_correlation(&nonce(*n)).is_none() {
                let draft = Draft::text(ME, "draft", Timestamp::from_millis(i64::from(*n) * 500));
                timeline.append_local_pending(draft, nonce(*n));
            }
        },
        Op::Echo(n) => {
            let echo = Message {
                sender_id: ME,
                correlation: Some(nonce(*n)),
                ..server_message(n.saturating_add(200))
            };
            timeline.confirm(&nonce(*n), echo);
        },
        Op::Fail(n) => {
            timeline.fail(&nonce(*n));
        },
    }
}

proptest! {
    #[test]
    fn prop_timeline_sorted_and_unique(ops in prop::collection::vec(op_strategy(), 0..120)) {
        let mut timeline = MessageTimeline::new(ROOM);

        for op in &ops {
            apply(&mut timeline, op);

            let messages = timeline.messages();
            prop_assert!(
                messages.windows(2).all(|w| w[0].sort_key() <= w[1].sort_key()),
                "timeline out of order after {:?}", op
            );

            let ids: HashSet<&MessageId> = messages.iter().map(|m| &m.id).collect();
            prop_assert_eq!(ids.len(), messages.len(), "duplicate id after {:?}", op);
        }
    }

    #[test]
    fn prop_echo_never_duplicates_a_send(n in 0u8..20, echo_twice in any::<bool>()) {
        let mut timeline = MessageTimeline::new(ROOM);
        apply(&mut timeline, &Op::Send(n));
        apply(&mut timeline, &Op::Echo(n));
        if echo_twice {
            apply(&mut timeline, &Op::Echo(n));
        }

        prop_assert_eq!(timeline.len(), 1);
        prop_assert_eq!(timeline.messages()[0].status, DeliveryStatus::Delivered);
        prop_assert_eq!(timeline.pending_count(), 0);
    }

    #[test]
    fn prop_final_entries_never_change(ops in prop::collection::vec(op_strategy(), 0..80)) {
        let mut timeline = MessageTimeline::new(ROOM);
        let mut finalized: Vec<Message> = Vec::new();

        for op in &ops {
            apply(&mut timeline, op);

            for earlier in &finalized {
                if let Some(now) = timeline.get(&earlier.id) {
                    prop_assert_eq!(now, earlier);
                }
            }

            finalized = timeline
                .messages()
                .iter()
                .filter(|m| m.status.is_final())
                .cloned()
                .collect();
        }
    }
}
