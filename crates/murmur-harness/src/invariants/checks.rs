//! Standard invariant checks.
//!
//! These invariants capture properties of a client's observable state that
//! must hold after every event, whatever order pushes, pages and send results
//! arrive in.

use std::collections::HashSet;

use murmur_proto::DeliveryStatus;

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Timeline entries are strictly ordered by `(timestamp, id)`.
pub struct TimelineOrdered;

impl Invariant for TimelineOrdered {
    fn name(&self) -> &'static str {
        "timeline_ordered"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (conversation_id, conversation) in &client.conversations {
                for pair in conversation.messages.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    if (a.timestamp, &a.id) >= (b.timestamp, &b.id) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "user {} conversation {}: {} ({}) before {} ({})",
                                client.user_id, conversation_id, a.id, a.timestamp, b.id, b.timestamp
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// No message appears twice, by id or by send nonce.
///
/// A duplicate nonce means an optimistic entry and its echo both survived.
/// Failed entries are exempt: a late echo for one is kept beside it.
pub struct TimelineUnique;

impl Invariant for TimelineUnique {
    fn name(&self) -> &'static str {
        "timeline_unique"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            for (conversation_id, conversation) in &client.conversations {
                let mut ids = HashSet::new();
                let mut nonces = HashSet::new();

                for message in &conversation.messages {
                    if !ids.insert(&message.id) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "user {} conversation {}: id {} twice",
                                client.user_id, conversation_id, message.id
                            ),
                        });
                    }
                    if let Some(nonce) = &message.correlation
                        && message.status != DeliveryStatus::Failed
                        && !nonces.insert(nonce)
                    {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "user {} conversation {}: nonce {} twice",
                                client.user_id,
                                conversation_id,
                                nonce.as_str()
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// The conversation on screen has an open view.
pub struct ActiveViewOpen;

impl Invariant for ActiveViewOpen {
    fn name(&self) -> &'static str {
        "active_view_open"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if let Some(active) = client.active
                && !client.conversations.contains_key(&active)
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "user {}: active conversation {} has no view, open: {:?}",
                        client.user_id,
                        active,
                        client.conversations.keys().collect::<Vec<_>>()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The conversation on screen never counts as unread.
pub struct ActiveUnreadZero;

impl Invariant for ActiveUnreadZero {
    fn name(&self) -> &'static str {
        "active_unread_zero"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            if let Some(active) = client.active
                && let Some(count) = client.unread.get(&active)
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "user {}: active conversation {} shows {} unread",
                        client.user_id, active, count
                    ),
                });
            }
        }
        Ok(())
    }
}
