//! Driver trait for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the runtime from specific I/O
//! implementations. The production binary implements it over WebSocket and
//! HTTP, the simulation harness over a scripted in-memory server, while the
//! generic [`crate::Runtime`] handles all orchestration.

use std::future::Future;

use murmur_client::{ClientAction, Submission, SyncClient};
use murmur_core::{Environment, Moment, PageRequest};

use crate::handle::RuntimeEvent;

/// Abstracts I/O operations for the runtime.
///
/// Every completion (channel open/close, inbound text, history pages, send
/// results) and every UI command arrives through [`poll_event`]. Drivers
/// keep one FIFO queue so events are handled in the order they happened.
///
/// Operations that take time (`fetch_history`, `submit_message`) start work
/// and return at once; their results come back later as client events.
///
/// # Associated Types
///
/// - [`Error`](Driver::Error): Platform-specific error type
/// - [`Instant`](Driver::Instant): Time representation (real or virtual)
///
/// [`poll_event`]: Driver::poll_event
pub trait Driver {
    /// Platform-specific error type. Returning it stops the runtime.
    type Error: std::error::Error + 'static;

    /// Time instant type. Enables virtual time in simulation.
    type Instant: Moment;

    /// Wait for the next event, or until `deadline` passes.
    ///
    /// Returns `None` when the deadline passed with nothing queued; the
    /// runtime then ticks the client.
    fn poll_event(
        &mut self,
        deadline: Option<Self::Instant>,
    ) -> impl Future<Output = Result<Option<RuntimeEvent<Self::Instant>>, Self::Error>>;

    /// Start opening the push channel.
    ///
    /// Completes with `ChannelOpened`, `ChannelRejected`, or `ChannelError`.
    fn open_channel(&mut self, url: &str) -> impl Future<Output = Result<(), Self::Error>>;

    /// Write a text frame to the open channel.
    ///
    /// A lost channel is reported as an event, not as an error.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), Self::Error>>;

    /// Close the current channel, if any.
    fn close_channel(&mut self, reason: &str) -> impl Future<Output = Result<(), Self::Error>>;

    /// Start a history fetch. Completes with `HistoryLoaded`.
    fn fetch_history(&mut self, request: PageRequest) -> Result<(), Self::Error>;

    /// Start delivering a message. Completes with `SendCompleted`.
    fn submit_message(&mut self, submission: Submission) -> Result<(), Self::Error>;

    /// Current time instant.
    fn now(&self) -> Self::Instant;

    /// Show a state change to the user.
    ///
    /// `client` is the state after the change.
    fn publish<E>(&mut self, client: &SyncClient<E>, change: &ClientAction) -> Result<(), Self::Error>
    where
        E: Environment<Instant = Self::Instant>;

    /// Stop all I/O and clean up resources.
    fn stop(&mut self);
}
