//! Backward pagination over the history endpoint.
//!
//! One pager per open conversation. At most one fetch is in flight at a time;
//! a second request while one is outstanding is a no-op, not queued. The
//! server returns pages newest first, and page `n + 1` is older than page `n`.
//!
//! Every request carries the cursor generation it was issued under. A
//! [`HistoryPager::reset`] bumps the generation, so completions of requests
//! issued before the reset are recognized as stale and dropped.

use murmur_proto::{ConversationId, Message};

use crate::{
    error::HistoryError,
    timeline::{MergeSummary, MessageTimeline},
};

/// Messages requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 30;

/// Why a page is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchPurpose {
    /// Extend the timeline backwards; advances the cursor.
    Backfill,
    /// Re-read the newest page after a gap; leaves the cursor alone.
    CatchUp,
}

/// A history fetch for the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Conversation to fetch
    pub conversation_id: ConversationId,
    /// Zero-based page index, 0 being the newest page
    pub page_index: u32,
    /// Items per page
    pub page_size: u32,
    /// Cursor generation this request belongs to
    pub generation: u64,
    /// Why the page is fetched
    pub purpose: FetchPurpose,
}

/// Pagination cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// Page the next backfill will request
    pub next_page_index: u32,
    /// Items per page
    pub page_size: u32,
    /// False once a short page has been received
    pub has_more: bool,
    /// A request is outstanding
    pub fetch_in_flight: bool,
    /// Bumped by every reset
    pub generation: u64,
}

impl PageCursor {
    fn fresh(page_size: u32, generation: u64) -> Self {
        Self { next_page_index: 0, page_size, has_more: true, fetch_in_flight: false, generation }
    }
}

/// A fetched history page, after invalid items were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    /// Valid items in server order (newest first)
    pub messages: Vec<Message>,
    /// Items the server returned, dropped ones included
    pub received: usize,
}

impl FetchedPage {
    /// Number of valid items.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if no item survived validation.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<Message>> for FetchedPage {
    fn from(messages: Vec<Message>) -> Self {
        Self { received: messages.len(), messages }
    }
}

/// Result of [`HistoryPager::complete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Page merged into the timeline
    Merged {
        /// What the merge changed
        summary: MergeSummary,
        /// Items the server returned
        received: usize,
        /// This page exhausted the history
        exhausted: bool,
    },
    /// Completion of a request from an earlier generation; dropped
    Stale,
    /// Fetch failed; cursor unchanged
    Failed(HistoryError),
}

/// Pagination state machine for one conversation.
#[derive(Debug, Clone)]
pub struct HistoryPager {
    conversation_id: ConversationId,
    cursor: PageCursor,
    in_flight: Option<FetchPurpose>,
}

impl HistoryPager {
    /// Fresh pager for `conversation_id`. A `page_size` of 0 is raised to 1.
    pub fn new(conversation_id: ConversationId, page_size: u32) -> Self {
        Self::with_generation(conversation_id, page_size, 0)
    }

    /// Fresh pager whose requests carry `generation`.
    ///
    /// A conversation re-opened after teardown starts past its old
    /// generation, so completions issued for the old view are stale.
    pub fn with_generation(conversation_id: ConversationId, page_size: u32, generation: u64) -> Self {
        Self {
            conversation_id,
            cursor: PageCursor::fresh(page_size.max(1), generation),
            in_flight: None,
        }
    }

    /// Conversation this pager reads.
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    /// Current cursor.
    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    /// Whether older history may exist.
    pub fn has_more(&self) -> bool {
        self.cursor.has_more
    }

    /// Whether a request is outstanding.
    pub fn is_loading(&self) -> bool {
        self.cursor.fetch_in_flight
    }

    /// Request the next older page.
    ///
    /// Returns `None` while a fetch is in flight or once history is exhausted.
    pub fn load_next_page(&mut self) -> Option<PageRequest> {
        if self.cursor.fetch_in_flight {
            tracing::debug!(conversation = %self.conversation_id, "page fetch already in flight");
            return None;
        }

        if !self.cursor.has_more {
            tracing::debug!(conversation = %self.conversation_id, "history exhausted");
            return None;
        }

        Some(self.issue(self.cursor.next_page_index, FetchPurpose::Backfill))
    }

    /// Request the newest page again without moving the cursor.
    ///
    /// Used after a reconnect to pick up messages pushed while the channel
    /// was down. Subject to the same single-flight rule.
    pub fn catch_up(&mut self) -> Option<PageRequest> {
        if self.cursor.fetch_in_flight {
            tracing::debug!(conversation = %self.conversation_id, "catch-up deferred, fetch in flight");
            return None;
        }

        Some(self.issue(0, FetchPurpose::CatchUp))
    }

    /// Apply the result of `request`.
    ///
    /// `result` holds the page in server order (newest first). It is merged
    /// oldest first in a single batch. Exhaustion is judged on the number of
    /// items the server returned, so dropped items never end the history.
    pub fn complete(
        &mut self,
        request: &PageRequest,
        result: Result<FetchedPage, HistoryError>,
        timeline: &mut MessageTimeline,
    ) -> PageOutcome {
        let current = request.conversation_id == self.conversation_id
            && request.generation == self.cursor.generation
            && self.in_flight == Some(request.purpose);

        if !current {
            tracing::debug!(
                conversation = %request.conversation_id,
                page = request.page_index,
                generation = request.generation,
                current_generation = self.cursor.generation,
                "stale page completion dropped"
            );
            return PageOutcome::Stale;
        }

        self.cursor.fetch_in_flight = false;
        self.in_flight = None;

        let FetchedPage { mut messages, received } = match result {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    conversation = %self.conversation_id,
                    page = request.page_index,
                    error = %e,
                    "history fetch failed"
                );
                return PageOutcome::Failed(e);
            },
        };

        let received = received.max(messages.len());
        messages.reverse();
        let summary = timeline.merge_history_page(messages);

        let exhausted = match request.purpose {
            FetchPurpose::Backfill => {
                self.cursor.next_page_index += 1;
                if received < self.cursor.page_size as usize {
                    self.cursor.has_more = false;
                }
                !self.cursor.has_more
            },
            FetchPurpose::CatchUp => false,
        };

        tracing::debug!(
            conversation = %self.conversation_id,
            page = request.page_index,
            received,
            inserted = summary.inserted,
            exhausted,
            "history page merged"
        );

        PageOutcome::Merged { summary, received, exhausted }
    }

    /// Start over: cursor back to page 0, generation bumped, timeline cleared.
    pub fn reset(&mut self, timeline: &mut MessageTimeline) {
        self.cursor = PageCursor::fresh(self.cursor.page_size, self.cursor.generation + 1);
        self.in_flight = None;
        timeline.clear();
    }

    fn issue(&mut self, page_index: u32, purpose: FetchPurpose) -> PageRequest {
        self.cursor.fetch_in_flight = true;
        self.in_flight = Some(purpose);

        PageRequest {
            conversation_id: self.conversation_id,
            page_index,
            page_size: self.cursor.page_size,
            generation: self.cursor.generation,
            purpose,
        }
    }
}

#[cfg(test)]
mod tests {
    use murmur_proto::{DeliveryStatus, MessageId, MessageKind, Timestamp, UserId};

    use super::*;

    const ROOM: ConversationId = ConversationId(3);

    fn message(n: i64) -> Message {
        Message {
            id: MessageId::server(format!("m{n:03}")),
            conversation_id: ROOM,
            sender_id: UserId(1),
            sender_name: None,
            content: None,
            kind: MessageKind::Text,
            attachments: Vec::new(),
            timestamp: Timestamp::from_millis(n),
            status: DeliveryStatus::Delivered,
            correlation: None,
        }
    }

    /// Page `index` of a history of `total` messages, newest first.
    fn page(total: i64, index: u32, size: u32) -> FetchedPage {
        let newest = total - i64::from(index * size);
        let oldest = (newest - i64::from(size)).max(0);
        (oldest..newest).rev().map(message).collect::<Vec<_>>().into()
    }

    #[test]
    fn first_request_is_page_zero() {
        let mut pager = HistoryPager::new(ROOM, 30);

        let request = pager.load_next_page().unwrap();

        assert_eq!(request.page_index, 0);
        assert_eq!(request.page_size, 30);
        assert_eq!(request.purpose, FetchPurpose::Backfill);
        assert!(pager.is_loading());
    }

    #[test]
    fn single_flight() {
        let mut pager = HistoryPager::new(ROOM, 30);

        assert!(pager.load_next_page().is_some());
        assert!(pager.load_next_page().is_none());
        assert!(pager.catch_up().is_none());
    }

    #[test]
    fn pages_merge_in_ascending_order() {
        let mut pager = HistoryPager::new(ROOM, 5);
        let mut timeline = MessageTimeline::new(ROOM);

        let request = pager.load_next_page().unwrap();
        pager.complete(&request, Ok(page(12, 0, 5)), &mut timeline);
        let request = pager.load_next_page().unwrap();
        assert_eq!(request.page_index, 1);
        pager.complete(&request, Ok(page(12, 1, 5)), &mut timeline);

        let stamps: Vec<i64> = timeline.messages().iter().map(|m| m.timestamp.as_millis()).collect();
        assert_eq!(stamps, (2..12).collect::<Vec<_>>());
        assert!(pager.has_more());
    }

    #[test]
    fn short_page_exhausts_history() {
        let mut pager = HistoryPager::new(ROOM, 30);
        let mut timeline = MessageTimeline::new(ROOM);

        let request = pager.load_next_page().unwrap();
        let outcome = pager.complete(&request, Ok(page(12, 0, 30)), &mut timeline);

        assert!(matches!(outcome, PageOutcome::Merged { received: 12, exhausted: true, .. }));
        assert!(!pager.has_more());
        assert_eq!(timeline.len(), 12);
        assert!(pager.load_next_page().is_none());
    }

    #[test]
    fn dropped_items_do_not_end_history() {
        let mut pager = HistoryPager::new(ROOM, 5);
        let mut timeline = MessageTimeline::new(ROOM);

        let mut fetched = page(12, 0, 5);
        fetched.messages.remove(2);
        assert_eq!(fetched.received, 5);

        let request = pager.load_next_page().unwrap();
        let outcome = pager.complete(&request, Ok(fetched), &mut timeline);

        assert!(matches!(outcome, PageOutcome::Merged { received: 5, exhausted: false, .. }));
        assert_eq!(timeline.len(), 4);
        assert!(pager.has_more());
        assert_eq!(pager.load_next_page().map(|r| r.page_index), Some(1));
    }

    #[test]
    fn failure_keeps_cursor_and_allows_retry() {
        let mut pager = HistoryPager::new(ROOM, 30);
        let mut timeline = MessageTimeline::new(ROOM);

        let request = pager.load_next_page().unwrap();
        let outcome =
            pager.complete(&request, Err(HistoryError::Transport("timeout".into())), &mut timeline);

        assert!(matches!(outcome, PageOutcome::Failed(_)));
        assert!(!pager.is_loading());
        assert!(pager.has_more());
        assert_eq!(pager.load_next_page().map(|r| r.page_index), Some(0));
    }

    #[test]
    fn completions_from_before_reset_are_stale() {
        let mut pager = HistoryPager::new(ROOM, 30);
        let mut timeline = MessageTimeline::new(ROOM);

        let old = pager.load_next_page().unwrap();
        pager.reset(&mut timeline);
        let fresh = pager.load_next_page().unwrap();

        assert_eq!(pager.complete(&old, Ok(page(40, 0, 30)), &mut timeline), PageOutcome::Stale);
        assert!(timeline.is_empty());
        assert!(pager.is_loading());

        let outcome = pager.complete(&fresh, Ok(page(40, 0, 30)), &mut timeline);
        assert!(matches!(outcome, PageOutcome::Merged { received: 30, exhausted: false, .. }));
    }

    #[test]
    fn reset_clears_timeline_and_cursor() {
        let mut pager = HistoryPager::new(ROOM, 5);
        let mut timeline = MessageTimeline::new(ROOM);
        let request = pager.load_next_page().unwrap();
        pager.complete(&request, Ok(page(3, 0, 5)), &mut timeline);

        pager.reset(&mut timeline);

        let cursor = pager.cursor();
        assert_eq!(cursor.next_page_index, 0);
        assert!(cursor.has_more);
        assert!(!cursor.fetch_in_flight);
        assert_eq!(cursor.generation, 1);
        assert!(timeline.is_empty());
    }

    #[test]
    fn catch_up_does_not_move_cursor() {
        let mut pager = HistoryPager::new(ROOM, 5);
        let mut timeline = MessageTimeline::new(ROOM);
        let request = pager.load_next_page().unwrap();
        pager.complete(&request, Ok(page(20, 0, 5)), &mut timeline);

        let catch_up = pager.catch_up().unwrap();
        assert_eq!(catch_up.page_index, 0);
        let outcome = pager.complete(&catch_up, Ok(page(22, 0, 5)), &mut timeline);

        assert!(matches!(outcome, PageOutcome::Merged { exhausted: false, .. }));
        assert_eq!(pager.cursor().next_page_index, 1);
        assert_eq!(timeline.len(), 7);
    }

    #[test]
    fn catch_up_works_after_exhaustion() {
        let mut pager = HistoryPager::new(ROOM, 30);
        let mut timeline = MessageTimeline::new(ROOM);
        let request = pager.load_next_page().unwrap();
        pager.complete(&request, Ok(page(2, 0, 30)), &mut timeline);

        assert!(pager.catch_up().is_some());
    }

    #[test]
    fn later_generation_rejects_earlier_requests() {
        let mut first = HistoryPager::new(ROOM, 30);
        let old = first.load_next_page().unwrap();

        let mut second = HistoryPager::with_generation(ROOM, 30, first.cursor().generation + 1);
        let mut timeline = MessageTimeline::new(ROOM);
        second.load_next_page().unwrap();

        assert_eq!(second.complete(&old, Ok(page(5, 0, 30)), &mut timeline), PageOutcome::Stale);
        assert!(second.is_loading());
    }
}
