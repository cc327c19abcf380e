//! Wire protocol for Murmur
//!
//! Types exchanged over the push channel and the history/send REST endpoints,
//! plus the schema validation that turns raw JSON into typed values.
//!
//! # Components
//!
//! - [`Frame`]: closed set of push-channel frames (`PING`, `PONG`,
//!   `NEW_MESSAGE`), decoded with [`Frame::decode`]
//! - [`Message`]: a conversation message as the engine stores it
//! - [`HistoryPage`]: one page of the paginated history endpoint
//! - [`Timestamp`]: millisecond instant accepting both epoch numbers and
//!   ISO-8601 strings on the wire
//!
//! Validation happens here, at the boundary. Anything that fails to decode is
//! reported as a [`ProtocolError`] and never reaches engine state.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
mod frame;
mod ids;
mod message;
mod rest;
mod timestamp;

pub use errors::{ProtocolError, Result};
pub use frame::{Frame, FrameKind, MAX_FRAME_LEN, NewMessagePayload};
pub use ids::{ConversationId, CorrelationKey, MessageId, UserId};
pub use message::{Attachment, DeliveryStatus, Message, MessageKind};
pub use rest::{HistoryPage, SendTextRequest, WireMessage};
pub use timestamp::Timestamp;
