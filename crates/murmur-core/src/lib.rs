//! Core sync engine for Murmur
//!
//! Sans-IO state machines that keep per-conversation timelines consistent
//! while messages arrive from a live push channel and from paginated history.
//!
//! # Architecture
//!
//! Every component is a pure state machine: methods take the current time
//! where they need it and return actions or outcomes for the caller to
//! execute. No component performs I/O, spawns tasks, or reads the clock.
//!
//! # Components
//!
//! - [`ConnectionManager`]: push-channel lifecycle with keepalive and backoff
//!   reconnect
//! - [`SubscriptionRegistry`]: topic-filtered fan-out with listener isolation
//! - [`HistoryPager`]: single-flight backward pagination
//! - [`MessageTimeline`]: ordered, deduplicated per-conversation store
//! - [`UnreadTracker`]: unread counters derived from new-message events
//! - [`Environment`]: time and randomness, swapped for virtual ones in tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;
pub mod pager;
pub mod registry;
pub mod timeline;
pub mod unread;

pub use connection::{
    Backoff, CloseEvent, ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState,
};
pub use env::{Environment, Moment};
pub use error::{ConnectionError, HistoryError, ListenerError, SendError};
pub use pager::{FetchPurpose, FetchedPage, HistoryPager, PageCursor, PageOutcome, PageRequest};
pub use registry::{DispatchReport, Mailbox, SubscriptionId, SubscriptionRegistry, Topic};
pub use timeline::{AppendOutcome, Draft, MergeSummary, MessageTimeline};
pub use unread::UnreadTracker;
