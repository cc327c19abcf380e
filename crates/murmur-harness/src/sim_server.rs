//! In-memory chat backend for simulation.
//!
//! `SimServer` stores every conversation in posting order and answers the
//! same requests the real backend does: newest-first history pages, message
//! submissions, and channel opens. Tests script failures by arming counters
//! that make the next N requests of a kind fail.

use std::collections::BTreeMap;

use murmur_client::{OutgoingBody, Submission};
use murmur_core::{Environment, HistoryError, PageRequest, SendError};
use murmur_proto::{
    Attachment, ConversationId, DeliveryStatus, Message, MessageId, MessageKind, Timestamp, UserId,
};

use crate::SimEnv;

/// Simulated backend.
#[derive(Debug)]
pub struct SimServer {
    env: SimEnv,
    conversations: BTreeMap<ConversationId, Vec<Message>>,
    next_id: u64,
    last_timestamp: i64,
    reject_connects: u32,
    fail_fetches: u32,
    fail_sends: u32,
}

impl SimServer {
    /// Empty backend stamping messages with `env`'s wall clock.
    pub fn new(env: SimEnv) -> Self {
        Self {
            env,
            conversations: BTreeMap::new(),
            next_id: 0,
            last_timestamp: i64::MIN,
            reject_connects: 0,
            fail_fetches: 0,
            fail_sends: 0,
        }
    }

    /// Messages of a conversation in posting order.
    pub fn messages(&self, conversation_id: ConversationId) -> &[Message] {
        self.conversations.get(&conversation_id).map_or(&[], Vec::as_slice)
    }

    /// Post a text message on behalf of `sender_id` and return it as stored.
    pub fn post(
        &mut self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: impl Into<String>,
    ) -> Message {
        let mut message = self.stamp(conversation_id, sender_id);
        message.content = Some(content.into());
        self.store(message)
    }

    /// Accept a submission from `sender_id`.
    ///
    /// Returns the stored message as the send endpoint reports it.
    pub fn accept(
        &mut self,
        sender_id: UserId,
        submission: &Submission,
    ) -> Result<Message, SendError> {
        if self.fail_sends > 0 {
            self.fail_sends -= 1;
            return Err(SendError::Transport("simulated send failure".to_string()));
        }

        let mut message = self.stamp(submission.conversation_id, sender_id);
        message.correlation = Some(submission.correlation.clone());
        match &submission.body {
            OutgoingBody::Text(text) => message.content = Some(text.clone()),
            OutgoingBody::File(file) => {
                message.kind = file.kind();
                message.attachments.push(Attachment {
                    filename: file.filename.clone(),
                    url: format!("sim://files/{}", message.id),
                    content_type: file.content_type.clone(),
                    size: Some(file.bytes.len() as u64),
                });
            },
        }

        let stored = self.store(message);
        Ok(Message { status: DeliveryStatus::Sent, ..stored })
    }

    /// Answer a history request, newest message first.
    pub fn page(&mut self, request: &PageRequest) -> Result<Vec<Message>, HistoryError> {
        if self.fail_fetches > 0 {
            self.fail_fetches -= 1;
            return Err(HistoryError::Status(503));
        }

        let size = request.page_size as usize;
        let skip = request.page_index as usize * size;
        let messages = self.messages(request.conversation_id);
        Ok(messages.iter().rev().skip(skip).take(size).cloned().collect())
    }

    /// Whether the next channel open should be refused. Consumes one armed
    /// rejection.
    pub fn take_connect_rejection(&mut self) -> bool {
        if self.reject_connects > 0 {
            self.reject_connects -= 1;
            return true;
        }
        false
    }

    /// Refuse the next `count` channel opens.
    pub fn reject_next_connects(&mut self, count: u32) {
        self.reject_connects = count;
    }

    /// Fail the next `count` history requests with a 503.
    pub fn fail_next_fetches(&mut self, count: u32) {
        self.fail_fetches = count;
    }

    /// Fail the next `count` submissions with a transport error.
    pub fn fail_next_sends(&mut self, count: u32) {
        self.fail_sends = count;
    }

    /// Fresh delivered message with a unique id and a strictly increasing
    /// timestamp, so server order and timeline order agree.
    fn stamp(&mut self, conversation_id: ConversationId, sender_id: UserId) -> Message {
        self.next_id += 1;
        let millis = self.env.wall_clock_millis().max(self.last_timestamp.saturating_add(1));
        self.last_timestamp = millis;

        Message {
            id: MessageId::server(format!("m{:06}", self.next_id)),
            conversation_id,
            sender_id,
            sender_name: None,
            content: None,
            kind: MessageKind::Text,
            attachments: Vec::new(),
            timestamp: Timestamp::from_millis(millis),
            status: DeliveryStatus::Delivered,
            correlation: None,
        }
    }

    fn store(&mut self, message: Message) -> Message {
        tracing::trace!(id = %message.id, conversation = %message.conversation_id, "stored");
        self.conversations.entry(message.conversation_id).or_default().push(message.clone());
        message
    }
}

#[cfg(test)]
mod tests {
    use murmur_core::FetchPurpose;
    use murmur_proto::CorrelationKey;

    use super::*;

    const ROOM: ConversationId = ConversationId(1);

    fn request(page_index: u32, page_size: u32) -> PageRequest {
        PageRequest {
            conversation_id: ROOM,
            page_index,
            page_size,
            generation: 0,
            purpose: FetchPurpose::Backfill,
        }
    }

    #[test]
    fn pages_run_newest_first() {
        let mut server = SimServer::new(SimEnv::new());
        let posted: Vec<_> = (0..5).map(|n| server.post(ROOM, UserId(2), format!("{n}"))).collect();

        let first = server.page(&request(0, 2)).unwrap();
        let last = server.page(&request(2, 2)).unwrap();

        assert_eq!(first, vec![posted[4].clone(), posted[3].clone()]);
        assert_eq!(last, vec![posted[0].clone()]);
    }

    #[test]
    fn timestamps_strictly_increase() {
        let mut server = SimServer::new(SimEnv::new());
        let a = server.post(ROOM, UserId(2), "a");
        let b = server.post(ROOM, UserId(2), "b");

        assert!(a.timestamp < b.timestamp);
        assert!(a.id < b.id);
    }

    #[test]
    fn accepted_submission_echoes_nonce() {
        let mut server = SimServer::new(SimEnv::new());
        let submission = Submission {
            conversation_id: ROOM,
            correlation: CorrelationKey::new("n1"),
            body: OutgoingBody::Text("hi".to_string()),
        };

        let reply = server.accept(UserId(1), &submission).unwrap();

        assert_eq!(reply.status, DeliveryStatus::Sent);
        assert_eq!(reply.correlation, Some(CorrelationKey::new("n1")));
        assert_eq!(server.messages(ROOM)[0].status, DeliveryStatus::Delivered);
    }

    #[test]
    fn armed_failures_are_consumed() {
        let mut server = SimServer::new(SimEnv::new());
        server.fail_next_fetches(1);

        assert_eq!(server.page(&request(0, 10)), Err(HistoryError::Status(503)));
        assert_eq!(server.page(&request(0, 10)), Ok(Vec::new()));
    }
}
